//! One-shot connections: a fresh socket for every request.
//!
//! Each request runs in its own task, so requests to the same endpoint proceed
//! independently. The socket is closed once the response has been delivered.

use std::future::IntoFuture;
use std::pin::pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, Instrument};

use super::{drain, http1, DriverSignals, RequestContext};
use crate::client::transport::Transport;
use crate::client::{ClientError, Endpoint};

#[tracing::instrument(name = "oneshot", skip_all, fields(endpoint = %endpoint))]
pub(crate) async fn run(
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn Transport>,
    mut receiver: mpsc::UnboundedReceiver<RequestContext>,
    signals: DriverSignals,
) {
    let mut shutdown = pin!(signals.shutdown.clone().into_future());

    loop {
        let ctx = tokio::select! {
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

        if ctx.responder.is_cancelled() {
            trace!("skipping cancelled request");
            continue;
        }

        tokio::spawn(
            exchange(endpoint.clone(), transport.clone(), ctx, signals.clone()).in_current_span(),
        );
    }
    trace!("driver finished");
}

async fn exchange(
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn Transport>,
    ctx: RequestContext,
    signals: DriverSignals,
) {
    let RequestContext {
        request,
        mut responder,
    } = ctx;
    let shutdown = signals.shutdown.clone();

    let outcome = tokio::select! {
        outcome = async {
            let mut sender = http1::handshake(&endpoint, transport.as_ref(), &signals).await?;
            http1::send(&mut sender, &endpoint, &request).await
        } => outcome,
        _ = responder.cancelled() => {
            trace!("request cancelled");
            return;
        }
        _ = shutdown.into_future() => Err(ClientError::shut_down()),
    };

    responder.respond(outcome);
}
