//! Persistent connections: one socket, one request at a time.
//!
//! The next request is not written until the previous response has been read
//! in full, so requests and responses pair up strictly one-to-one. The socket
//! is opened on first use and reopened on the next request after it closes or
//! fails.

use std::future::IntoFuture;
use std::pin::pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{drain, http1, DriverSignals, Outcome, RequestContext};
use crate::client::transport::Transport;
use crate::client::{ClientError, Endpoint, PendingRequest};

#[tracing::instrument(name = "persistent", skip_all, fields(endpoint = %endpoint))]
pub(crate) async fn run(
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn Transport>,
    mut receiver: mpsc::UnboundedReceiver<RequestContext>,
    signals: DriverSignals,
) {
    let mut shutdown = pin!(signals.shutdown.clone().into_future());
    let mut sender: Option<http1::SendRequest> = None;

    loop {
        let RequestContext {
            request,
            mut responder,
        } = tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("shutdown");
                drain(&mut receiver, &ClientError::shut_down());
                break;
            }
            ctx = receiver.recv() => match ctx {
                Some(ctx) => ctx,
                None => break,
            },
        };

        if responder.is_cancelled() {
            trace!("skipping cancelled request");
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("shutdown with a request in flight");
                responder.respond(Err(ClientError::shut_down()));
                drain(&mut receiver, &ClientError::shut_down());
                break;
            }
            _ = responder.cancelled() => {
                // The response may still be in flight, so the socket is out
                // of step with the next request.
                trace!("request cancelled in flight, dropping connection");
                sender = None;
                continue;
            }
            outcome = exchange(
                &mut sender,
                &endpoint,
                transport.as_ref(),
                &request,
                &signals,
            ) => outcome,
        };

        responder.respond(outcome);
    }
    trace!("driver finished");
}

async fn exchange(
    sender: &mut Option<http1::SendRequest>,
    endpoint: &Endpoint,
    transport: &dyn Transport,
    request: &PendingRequest,
    signals: &DriverSignals,
) -> Outcome {
    // An idle connection the peer has since closed is replaced before anything
    // is written to it.
    if let Some(conn) = sender.as_mut() {
        if conn.ready().await.is_err() {
            trace!("idle connection closed");
            *sender = None;
        }
    }

    if sender.is_none() {
        trace!("connecting");
        *sender = Some(http1::handshake(endpoint, transport, signals).await?);
    }

    let Some(conn) = sender.as_mut() else {
        return Err(ClientError::InternalInvariant("no connection after handshake".into()));
    };

    let outcome = http1::send(conn, endpoint, request).await;
    if let Err(error) = &outcome {
        if http1::is_fatal(error) {
            trace!(%error, "discarding connection");
            *sender = None;
        }
    }
    outcome
}
