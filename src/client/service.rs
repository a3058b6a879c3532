//! Bridging callback-style requests into futures.
//!
//! [`Connection::request`] reports its outcome through a callback. [`call`]
//! suspends the calling task until that callback has run, and
//! [`ClientService`] exposes the same thing as a [`tower::Service`].

use std::fmt;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::conn::{Connection, Outcome, Responder};
use super::{ClientError, PendingRequest, Response};
use crate::BoxFuture;

/// Issue `request` on `connection` and wait for the outcome.
///
/// Resumes exactly once, with either the response or the error the driver
/// reported. If the driver drops the request without reporting anything, this
/// resolves to [`ClientError::InternalInvariant`].
///
/// Dropping the returned future abandons the request; drivers notice and skip
/// or abort it where they can.
pub async fn call(connection: &Connection, request: PendingRequest) -> Outcome {
    let (tx, rx) = oneshot::channel();
    connection.dispatch(request, Responder::Channel(tx));

    match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err(ClientError::InternalInvariant("result is unset".into())),
    }
}

/// A [`tower::Service`] issuing requests on a [`Connection`].
#[derive(Clone)]
pub struct ClientService {
    connection: Connection,
}

impl fmt::Debug for ClientService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientService").field(&self.connection).finish()
    }
}

impl ClientService {
    /// Wrap `connection` as a service.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// The connection requests are issued on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl From<Connection> for ClientService {
    fn from(connection: Connection) -> Self {
        Self::new(connection)
    }
}

impl tower::Service<PendingRequest> for ClientService {
    type Response = Response;
    type Error = ClientError;
    type Future = BoxFuture<'static, Outcome>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.connection.is_closed() {
            Poll::Ready(Err(ClientError::closed()))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, request: PendingRequest) -> Self::Future {
        let connection = self.connection.clone();
        Box::pin(async move { call(&connection, request).await })
    }
}
