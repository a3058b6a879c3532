//! Connections and the drivers behind them.
//!
//! A [`Connection`] is a cheap, cloneable handle onto a driver task which owns
//! the socket(s) for one [`Endpoint`]. Requests are queued to the driver along
//! with a responder, and the driver resolves every responder exactly once.
//!
//! ## Strategies
//!
//! - [one-shot][oneshot]: a new socket per request, closed after the response.
//! - [persistent][persistent]: one socket, requests strictly serialized.
//! - [pipelined][pipelined]: one socket, requests written ahead of responses in
//!   batches, responses matched to requests in arrival order.
//!
//! One-shot and persistent connections speak HTTP/1.1 through hyper. hyper's
//! client never pipelines, so the pipelined driver uses the [codec] in this
//! module directly.

use std::fmt;
use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot as channel};

use super::{ClientError, Endpoint, PendingRequest, Response};
use crate::client::transport::Transport;
use crate::notify;

pub mod codec;
pub(crate) mod http1;
pub mod oneshot;
pub mod persistent;
pub mod pipelined;

/// Result delivered to a request's callback.
pub type Outcome = Result<Response, ClientError>;

/// Where a driver delivers the outcome of a request.
pub(crate) enum Responder {
    /// A caller-supplied callback.
    Callback(Box<dyn FnOnce(Outcome) + Send + 'static>),

    /// A waiting task; see [`crate::client::service::call`].
    Channel(channel::Sender<Outcome>),
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Responder::Callback(_) => f.write_str("Responder::Callback"),
            Responder::Channel(_) => f.write_str("Responder::Channel"),
        }
    }
}

impl Responder {
    /// Deliver the outcome. Consumes the responder, so this happens once.
    pub(crate) fn respond(self, outcome: Outcome) {
        match self {
            Responder::Callback(callback) => callback(outcome),
            Responder::Channel(sender) => {
                if sender.send(outcome).is_err() {
                    tracing::trace!("caller went away before the response was delivered");
                }
            }
        }
    }

    /// True when nobody is waiting for the outcome any more.
    ///
    /// Callbacks are never considered cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        match self {
            Responder::Callback(_) => false,
            Responder::Channel(sender) => sender.is_closed(),
        }
    }

    /// Resolves when the waiting caller goes away.
    pub(crate) async fn cancelled(&mut self) {
        match self {
            Responder::Callback(_) => pending().await,
            Responder::Channel(sender) => sender.closed().await,
        }
    }
}

/// A request queued to a connection driver.
#[derive(Debug)]
pub(crate) struct RequestContext {
    pub(crate) request: PendingRequest,
    pub(crate) responder: Responder,
}

impl RequestContext {
    pub(crate) fn fail(self, error: ClientError) {
        self.responder.respond(Err(error));
    }
}

/// Signals shared by every driver a client spawns.
///
/// The driver holds its `finished` sender until it exits, which is how the
/// client knows when all drivers have terminated.
#[derive(Debug, Clone)]
pub(crate) struct DriverSignals {
    pub(crate) shutdown: notify::Receiver,
    pub(crate) finished: notify::Sender,
}

/// Start the driver for `endpoint` and return a handle to it.
pub(crate) fn spawn(
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    signals: DriverSignals,
) -> Connection {
    let endpoint = Arc::new(endpoint);
    let (sender, receiver) = mpsc::unbounded_channel();

    match endpoint.strategy() {
        super::ConnectionStrategy::OneShot => {
            tokio::spawn(oneshot::run(endpoint.clone(), transport, receiver, signals));
        }
        super::ConnectionStrategy::Persistent => {
            tokio::spawn(persistent::run(endpoint.clone(), transport, receiver, signals));
        }
        super::ConnectionStrategy::Pipelined(config) => {
            tokio::spawn(pipelined::run(
                endpoint.clone(),
                config,
                transport,
                receiver,
                signals,
            ));
        }
    }

    Connection::from_parts(endpoint, sender)
}

/// Fail every request still queued on `receiver`.
pub(crate) fn drain(receiver: &mut mpsc::UnboundedReceiver<RequestContext>, error: &ClientError) {
    receiver.close();
    while let Ok(ctx) = receiver.try_recv() {
        ctx.fail(error.clone());
    }
}

struct ConnectionRef {
    endpoint: Arc<Endpoint>,
    sender: mpsc::UnboundedSender<RequestContext>,
}

/// A handle for issuing requests to one endpoint.
///
/// Every clone shares the same driver and therefore the same socket(s). Once
/// all handles are dropped the driver finishes outstanding work and exits.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionRef>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &crate::DebugLiteral(self.inner.endpoint.base_url()))
            .field("strategy", &self.inner.endpoint.strategy())
            .finish()
    }
}

impl Connection {
    pub(crate) fn from_parts(
        endpoint: Arc<Endpoint>,
        sender: mpsc::UnboundedSender<RequestContext>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionRef { endpoint, sender }),
        }
    }

    /// The endpoint this connection talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// True once the driver has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.inner.sender.is_closed()
    }

    /// Issue `request`, invoking `callback` exactly once with the outcome.
    ///
    /// The callback runs on the driver task (or immediately, on the calling
    /// thread, if the driver has already stopped). Failures are only ever
    /// reported through the callback.
    pub fn request<F>(&self, request: PendingRequest, callback: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.dispatch(request, Responder::Callback(Box::new(callback)));
    }

    /// Issue `request` and wait for its response.
    pub async fn send(&self, request: PendingRequest) -> Outcome {
        super::service::call(self, request).await
    }

    pub(crate) fn dispatch(&self, request: PendingRequest, responder: Responder) {
        tracing::trace!(method = %request.method(), path = request.path(), "queue request");
        if let Err(mpsc::error::SendError(ctx)) =
            self.inner.sender.send(RequestContext { request, responder })
        {
            ctx.fail(ClientError::closed());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Connection: Send, Sync, Clone);

    #[test]
    fn closed_connection_fails_through_callback() {
        let endpoint = Arc::new(Endpoint::parse("http://example.com/").unwrap());
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);

        let connection = Connection::from_parts(endpoint, sender);
        assert!(connection.is_closed());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        connection.request(PendingRequest::get("x"), move |outcome| {
            assert_eq!(outcome, Err(ClientError::closed()));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_responder_reports_cancellation() {
        let (tx, rx) = channel::channel();
        let responder = Responder::Channel(tx);
        assert!(!responder.is_cancelled());
        drop(rx);
        assert!(responder.is_cancelled());

        let callback = Responder::Callback(Box::new(|_| {}));
        assert!(!callback.is_cancelled());
    }

    #[test]
    fn drain_fails_queued_requests() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let (tx, mut rx) = channel::channel();
        sender
            .send(RequestContext {
                request: PendingRequest::get("x"),
                responder: Responder::Channel(tx),
            })
            .unwrap();

        drain(&mut receiver, &ClientError::shut_down());
        assert_eq!(rx.try_recv().unwrap(), Err(ClientError::shut_down()));
        assert!(sender.is_closed());
    }
}
