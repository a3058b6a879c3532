//! HTTP/1.1 client built on top of [hyper].
//!
//! There are three levels to this client:
//!
//! 1. The [`Client`], which owns a [transport][self::transport::Transport] and
//!    opens [`Connection`]s. It also controls shutdown of every connection it
//!    has opened.
//! 2. The [`Connection`], which issues requests to a single [`Endpoint`] using
//!    the endpoint's [`ConnectionStrategy`]. Outcomes are delivered to a
//!    callback, or awaited with [`Connection::send`].
//! 3. The [service][self::service] layer, which bridges callbacks into futures
//!    and exposes a connection as a `tower::Service`.
//!
//! ```no_run
//! # async fn demo() -> Result<(), hyperpage::client::ClientError> {
//! use hyperpage::client::{Client, Endpoint, PendingRequest};
//!
//! let client = Client::new_tcp()?;
//! let connection = client.open(Endpoint::parse("http://example.com/api/")?);
//! let response = connection.send(PendingRequest::get("status")).await?;
//! println!("{}", response.text().unwrap_or_default());
//! client.shutdown_and_wait().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use parking_lot::Mutex;

use self::transport::{TcpTransport, Transport};
use crate::notify;

pub mod conn;
pub mod endpoint;
mod error;
pub mod request;
pub mod service;
pub mod transport;

pub use self::conn::Connection;
pub use self::endpoint::{ConnectionStrategy, Endpoint, EndpointBuilder, PipelineConfig, Scheme};
pub use self::error::ClientError;
pub use self::request::{PendingRequest, Response, ResponseBody, ResponseKind};
pub use self::service::ClientService;

struct ClientRef {
    transport: Arc<dyn Transport>,
    shutdown: Mutex<notify::Sender>,
    shutdown_rx: notify::Receiver,
    finished: Mutex<Option<notify::Sender>>,
    finished_rx: notify::Receiver,
}

/// Opens connections and controls their lifetime.
///
/// Cloning a client is cheap; clones share the transport and shutdown state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.inner.transport)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Client {
    /// A client opening streams with `transport`.
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport,
    {
        let (shutdown, shutdown_rx) = notify::channel();
        let (finished, finished_rx) = notify::channel();
        Self {
            inner: Arc::new(ClientRef {
                transport: Arc::new(transport),
                shutdown: Mutex::new(shutdown),
                shutdown_rx,
                finished: Mutex::new(Some(finished)),
                finished_rx,
            }),
        }
    }

    /// A client connecting over TCP with the default configuration.
    ///
    /// With the `tls` feature, `https` endpoints trust the platform's native
    /// certificates.
    pub fn new_tcp() -> Result<Self, ClientError> {
        let transport = TcpTransport::default();

        #[cfg(feature = "tls")]
        let transport = transport.with_tls(self::transport::tcp::default_tls_config()?);

        Ok(Self::new(transport))
    }

    /// Open a connection to `endpoint`.
    ///
    /// No socket is opened until the first request. A connection opened after
    /// [`shutdown`][Client::shutdown] fails every request it is given.
    ///
    /// Must be called from within a tokio runtime, since the connection's
    /// driver task is spawned here.
    pub fn open(&self, endpoint: Endpoint) -> Connection {
        let finished = self.inner.finished.lock().clone();
        let Some(finished) = finished else {
            tracing::debug!(%endpoint, "opening connection on a shut down client");
            let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
            drop(receiver);
            return Connection::from_parts(Arc::new(endpoint), sender);
        };

        tracing::debug!(%endpoint, strategy = ?endpoint.strategy(), "open connection");
        conn::spawn(
            endpoint,
            self.inner.transport.clone(),
            conn::DriverSignals {
                shutdown: self.inner.shutdown_rx.clone(),
                finished,
            },
        )
    }

    /// Ask every connection to stop.
    ///
    /// Queued and in-flight requests fail with a "client shut down" transport
    /// error. Returns immediately; see [`wait_for_termination`][Client::wait_for_termination].
    pub fn shutdown(&self) {
        tracing::debug!("client shutdown");
        self.inner.shutdown.lock().send();
        if let Some(mut finished) = self.inner.finished.lock().take() {
            finished.send();
        }
    }

    /// True once [`shutdown`][Client::shutdown] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown_rx.is_closed()
    }

    /// Wait until every connection driver has exited.
    ///
    /// This only resolves after [`shutdown`][Client::shutdown], or once every
    /// connection has been dropped and the client has been shut down.
    pub async fn wait_for_termination(&self) {
        self.inner.finished_rx.clone().into_future().await;
        tracing::trace!("all connections terminated");
    }

    /// Shut down, then wait until every connection driver has exited.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        self.wait_for_termination().await;
    }
}
