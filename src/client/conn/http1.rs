//! hyper HTTP/1.1 plumbing shared by the one-shot and persistent drivers.

use std::future::IntoFuture;
use std::pin::pin;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::{debug, trace};

use super::{DriverSignals, Outcome};
use crate::bridge::TokioIo;
use crate::client::transport::Transport;
use crate::client::{ClientError, Endpoint, PendingRequest, Response, ResponseBody};

pub(crate) type SendRequest = hyper::client::conn::http1::SendRequest<Empty<Bytes>>;

/// Open a stream to `endpoint` and perform the HTTP/1.1 handshake.
///
/// The hyper connection future is spawned; it ends when the returned sender is
/// dropped, when the peer closes, or on client shutdown.
pub(crate) async fn handshake(
    endpoint: &Endpoint,
    transport: &dyn Transport,
    signals: &DriverSignals,
) -> Result<SendRequest, ClientError> {
    let stream = transport
        .connect(endpoint)
        .await
        .map_err(ClientError::transport)?;

    trace!("handshake h1");
    let (sender, conn) = hyper::client::conn::http1::Builder::new()
        .handshake(TokioIo::new(stream))
        .await?;

    let shutdown = signals.shutdown.clone();
    let finished = signals.finished.clone();
    tokio::spawn(async move {
        let shutdown = pin!(shutdown.into_future());
        tokio::select! {
            rv = conn => {
                if let Err(err) = rv {
                    debug!(%err, "h1 connection driver error");
                }
            }
            _ = shutdown => {
                debug!("closing h1 connection on shutdown");
            }
        }
        drop(finished);
    });
    trace!("handshake complete");
    Ok(sender)
}

/// Send `request` and collect the full response.
pub(crate) async fn send(
    sender: &mut SendRequest,
    endpoint: &Endpoint,
    request: &PendingRequest,
) -> Outcome {
    sender.ready().await?;
    let response = sender.send_request(request.to_http(endpoint)?).await?;

    let (parts, body) = response.into_parts();
    let bytes = body.collect().await?.to_bytes();
    trace!(status = %parts.status, len = bytes.len(), "response received");

    let body = ResponseBody::decode(request.kind(), bytes)?;
    Ok(Response::new(parts.status, parts.headers, body))
}

/// Whether an error means the socket can no longer be used.
pub(crate) fn is_fatal(error: &ClientError) -> bool {
    matches!(
        error,
        ClientError::Transport(_) | ClientError::Protocol(_) | ClientError::Cancelled
    )
}
