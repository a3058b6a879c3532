//! Transports establish the byte streams connections run over.
//!
//! A transport turns an [`Endpoint`] into a bidirectional stream. Connection
//! drivers ask their transport for a new stream whenever they need a socket:
//! once per request for one-shot connections, and on first use (or after a
//! failure) for persistent and pipelined ones.
//!
//! Two transports are provided:
//! - [`TcpTransport`]: TCP, with TLS for `https` endpoints when the `tls`
//!   feature is enabled.
//! - [`DuplexTransport`]: in-memory streams, for tests and for wiring a client
//!   to a server in the same process.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use super::Endpoint;
use crate::BoxFuture;

pub mod duplex;
pub mod tcp;

pub use self::duplex::{DuplexIncoming, DuplexTransport};
pub use self::tcp::{TcpTransport, TcpTransportConfig};

/// Byte stream returned by a transport.
pub trait TransportIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed transport stream.
pub type TransportStream = Box<dyn TransportIo>;

/// Opens byte streams to endpoints.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// Open a new stream to `endpoint`.
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, io::Result<TransportStream>>;
}
