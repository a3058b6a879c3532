//! TCP transport, with TLS for `https` endpoints behind the `tls` feature.

use std::io;
#[cfg(feature = "tls")]
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{trace, Instrument};

use super::{Transport, TransportStream};
use crate::client::endpoint::{Endpoint, Scheme};
use crate::BoxFuture;

/// Configuration for TCP connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTransportConfig {
    /// Give up connecting after this long.
    pub connect_timeout: Option<Duration>,

    /// Set `TCP_NODELAY` on new sockets.
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
        }
    }
}

/// Connects to endpoints over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: TcpTransportConfig,
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl TcpTransport {
    /// A TCP transport with the given configuration and no TLS support.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Use `tls` for `https` endpoints.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: rustls::ClientConfig) -> Self {
        self.tls = Some(Arc::new(tls));
        self
    }

    /// The TCP configuration.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }
}

#[cfg(feature = "tls")]
/// A TLS client configuration trusting the platform's native certificates.
pub fn default_tls_config() -> Result<rustls::ClientConfig, crate::client::ClientError> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(%error, "could not load platform certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    trace!(added, ignored, "loaded platform certificates");
    if added == 0 {
        return Err(crate::client::ClientError::Transport(
            "no platform certificates available".into(),
        ));
    }

    let mut cfg = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    Ok(cfg)
}

impl Transport for TcpTransport {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, io::Result<TransportStream>> {
        let transport = self.clone();
        let host = endpoint.host().to_owned();
        let port = endpoint.port();
        let scheme = endpoint.scheme();
        let span = tracing::debug_span!("tcp-connect", %host, port);

        Box::pin(
            async move {
                let connect = TcpStream::connect((host.as_str(), port));
                let stream = match transport.config.connect_timeout {
                    Some(timeout) => tokio::time::timeout(timeout, connect)
                        .await
                        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??,
                    None => connect.await?,
                };
                stream.set_nodelay(transport.config.nodelay)?;
                trace!(peer = ?stream.peer_addr().ok(), "connected");

                match scheme {
                    Scheme::Http => Ok(Box::new(stream) as TransportStream),
                    Scheme::Https => transport.handshake(host, stream).await,
                }
            }
            .instrument(span),
        )
    }
}

impl TcpTransport {
    #[cfg(feature = "tls")]
    async fn handshake(&self, host: String, stream: TcpStream) -> io::Result<TransportStream> {
        let config = self.tls.clone().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "no TLS configuration for https")
        })?;
        let domain = rustls::pki_types::ServerName::try_from(host)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;
        let stream = tokio_rustls::TlsConnector::from(config)
            .connect(domain, stream)
            .await?;
        trace!("tls handshake complete");
        Ok(Box::new(stream))
    }

    #[cfg(not(feature = "tls"))]
    async fn handshake(&self, _host: String, _stream: TcpStream) -> io::Result<TransportStream> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unsupported protocol: https",
        ))
    }
}
