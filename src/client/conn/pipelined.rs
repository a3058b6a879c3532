//! Pipelined connections: one socket, many requests in flight.
//!
//! The driver serializes requests into a write buffer and flushes it to the
//! socket once per [flush interval][crate::client::PipelineConfig], so bursts
//! of small requests share writes. A separate reader task decodes responses as
//! they arrive.
//!
//! Responses are matched to requests purely by position. Every request's
//! context is pushed onto a FIFO queue before its bytes can reach the wire, and
//! the reader pops one context per decoded response. This relies on the peer
//! answering in request order, as HTTP/1.1 requires; a transport that may
//! reorder responses cannot be used with this strategy.
//!
//! A request whose caller has gone away is still written if it was already
//! buffered, and its response is still read (to keep the queue aligned) and
//! then discarded.

use std::future::IntoFuture;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, Instrument};

use super::{codec, drain, DriverSignals, RequestContext, Responder};
use crate::client::transport::{Transport, TransportStream};
use crate::client::{ClientError, Endpoint, PipelineConfig, Response, ResponseBody, ResponseKind};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// A request that has been buffered for writing and awaits its response.
#[derive(Debug)]
struct Outstanding {
    method: Method,
    kind: ResponseKind,
    responder: Responder,
}

/// One socket and the reader task draining it.
struct Session {
    writer: WriteHalf<TransportStream>,
    outstanding: mpsc::UnboundedSender<Outstanding>,
    abort: Option<oneshot::Sender<ClientError>>,
    reader: JoinHandle<()>,
}

impl Session {
    async fn connect(
        endpoint: &Endpoint,
        transport: &dyn Transport,
        signals: &DriverSignals,
    ) -> Result<Self, ClientError> {
        let stream = transport
            .connect(endpoint)
            .await
            .map_err(ClientError::transport)?;
        trace!("connected");

        let (reader, writer) = tokio::io::split(stream);
        let (outstanding, queue) = mpsc::unbounded_channel();
        let (abort, aborted) = oneshot::channel();
        let reader = tokio::spawn(
            read_responses(reader, queue, aborted, signals.clone()).in_current_span(),
        );

        Ok(Self {
            writer,
            outstanding,
            abort: Some(abort),
            reader,
        })
    }

    /// True once the reader has stopped; nothing more can be sent here.
    fn is_closed(&self) -> bool {
        self.outstanding.is_closed()
    }

    /// Encode `ctx` onto `buffer` and register it with the reader.
    fn enqueue(&self, endpoint: &Endpoint, ctx: RequestContext, buffer: &mut BytesMut) {
        let RequestContext { request, responder } = ctx;

        let mark = buffer.len();
        if let Err(error) = codec::encode_request(endpoint, &request, buffer) {
            responder.respond(Err(error));
            return;
        }

        let outstanding = Outstanding {
            method: request.method().clone(),
            kind: request.kind(),
            responder,
        };
        if let Err(mpsc::error::SendError(outstanding)) = self.outstanding.send(outstanding) {
            buffer.truncate(mark);
            outstanding.responder.respond(Err(ClientError::closed()));
        }
    }

    /// Tear the session down, failing everything outstanding with `error`.
    fn abort(mut self, error: ClientError) {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(error);
        }
    }

    /// Stop sending, and wait for outstanding responses to be delivered.
    async fn finish(self) {
        let Session {
            writer,
            outstanding,
            abort,
            reader,
        } = self;

        drop(outstanding);
        if let Err(error) = reader.await {
            debug!(%error, "reader task failed");
        }
        drop(abort);
        drop(writer);
    }
}

#[tracing::instrument(name = "pipelined", skip_all, fields(endpoint = %endpoint))]
pub(crate) async fn run(
    endpoint: Arc<Endpoint>,
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    mut receiver: mpsc::UnboundedReceiver<RequestContext>,
    signals: DriverSignals,
) {
    let mut shutdown = pin!(signals.shutdown.clone().into_future());
    let mut session: Option<Session> = None;
    let mut buffer = BytesMut::new();
    let mut open = true;

    let mut ticker = tokio::time::interval(config.flush_interval.max(MIN_FLUSH_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                stop(&mut receiver, &mut session);
                break;
            }
            ctx = receiver.recv(), if open => {
                let Some(ctx) = ctx else {
                    trace!("all handles dropped");
                    open = false;
                    if buffer.is_empty() {
                        break;
                    }
                    continue;
                };

                if ctx.responder.is_cancelled() {
                    trace!("skipping cancelled request");
                    continue;
                }

                if let Err(error) = codec::request_target(&endpoint, &ctx.request) {
                    debug!(%error, "rejecting request");
                    ctx.fail(error);
                    continue;
                }

                if session.as_ref().map_or(true, Session::is_closed) {
                    if let Some(stale) = session.take() {
                        stale.abort(ClientError::closed());
                    }
                    buffer.clear();

                    let connected = tokio::select! {
                        biased;
                        _ = &mut shutdown => {
                            ctx.fail(ClientError::shut_down());
                            stop(&mut receiver, &mut session);
                            break;
                        }
                        connected = Session::connect(&endpoint, transport.as_ref(), &signals) => {
                            connected
                        }
                    };

                    match connected {
                        Ok(connected) => session = Some(connected),
                        Err(error) => {
                            ctx.fail(error);
                            continue;
                        }
                    }
                }

                if let Some(current) = session.as_ref() {
                    if buffer.is_empty() {
                        ticker.reset();
                    }
                    current.enqueue(&endpoint, ctx, &mut buffer);
                }
            }
            _ = ticker.tick(), if !buffer.is_empty() => {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        stop(&mut receiver, &mut session);
                        break;
                    }
                    _ = flush(&mut session, &mut buffer) => {}
                }
                if !open {
                    break;
                }
            }
        }
    }

    if let Some(session) = session.take() {
        session.finish().await;
    }
    trace!("driver finished");
}

fn stop(receiver: &mut mpsc::UnboundedReceiver<RequestContext>, session: &mut Option<Session>) {
    debug!("shutdown");
    drain(receiver, &ClientError::shut_down());
    if let Some(session) = session.take() {
        session.abort(ClientError::shut_down());
    }
}

/// Write the buffered requests to the socket.
async fn flush(session: &mut Option<Session>, buffer: &mut BytesMut) {
    let Some(current) = session.as_mut() else {
        buffer.clear();
        return;
    };

    trace!(len = buffer.len(), "flush");
    let result = match current.writer.write_all(&buffer[..]).await {
        Ok(()) => current.writer.flush().await,
        Err(error) => Err(error),
    };
    buffer.clear();

    if let Err(error) = result {
        if let Some(failed) = session.take() {
            failed.abort(ClientError::transport(error));
        }
    }
}

/// Decode responses in arrival order, delivering each to the oldest
/// outstanding request.
async fn read_responses(
    mut reader: ReadHalf<TransportStream>,
    mut queue: mpsc::UnboundedReceiver<Outstanding>,
    mut aborted: oneshot::Receiver<ClientError>,
    signals: DriverSignals,
) {
    let mut shutdown = pin!(signals.shutdown.clone().into_future());
    let mut buf = BytesMut::with_capacity(8 * 1024);

    // The queue is closed before the last caller hears back, so a request
    // issued in response is routed to a fresh session.
    let (error, current) = loop {
        let next = tokio::select! {
            biased;
            _ = &mut shutdown => break (ClientError::shut_down(), None),
            error = &mut aborted => break (error.unwrap_or_else(|_| ClientError::closed()), None),
            next = queue.recv() => match next {
                Some(next) => next,
                None => {
                    trace!("no further requests");
                    return;
                }
            },
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    trace!("peer closed idle connection");
                    break (ClientError::closed(), None);
                }
                Ok(_) => break (ClientError::Protocol("unsolicited response".into()), None),
                Err(error) => break (ClientError::transport(error), None),
            },
        };

        let result = tokio::select! {
            biased;
            _ = &mut shutdown => break (ClientError::shut_down(), Some(next)),
            error = &mut aborted => {
                break (error.unwrap_or_else(|_| ClientError::closed()), Some(next));
            }
            result = codec::read_response(&mut reader, &mut buf, &next.method) => result,
        };

        match result {
            Ok(raw) => {
                let keep_alive = raw.keep_alive;
                trace!(status = %raw.status, len = raw.body.len(), "response received");
                if next.responder.is_cancelled() {
                    trace!("discarding response for cancelled request");
                }

                let outcome = ResponseBody::decode(next.kind, raw.body)
                    .map(|body| Response::new(raw.status, raw.headers, body));

                if !keep_alive {
                    trace!("peer is closing the connection");
                    queue.close();
                    next.responder.respond(outcome);
                    break (ClientError::closed(), None);
                }
                next.responder.respond(outcome);
            }
            Err(error) => break (error, Some(next)),
        }
    };

    queue.close();
    if let Some(current) = current {
        current.responder.respond(Err(error.clone()));
    }
    while let Ok(outstanding) = queue.try_recv() {
        outstanding.responder.respond(Err(error.clone()));
    }
    drop(signals);
}
