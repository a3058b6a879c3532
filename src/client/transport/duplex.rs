//! In-memory transport.
//!
//! Each connect produces a fresh [`tokio::io::DuplexStream`] pair: the client
//! half is returned from [`Transport::connect`], and the server half is handed
//! to whoever is accepting on the matching [`DuplexIncoming`].
//!
//! The accept side must be polled for connects to complete:
//! ```
//! # use hyperpage::client::transport::{duplex, Transport};
//! # use hyperpage::client::Endpoint;
//! # async fn demo() {
//! let (transport, mut incoming) = duplex::pair(1024);
//! let endpoint = Endpoint::parse("http://in-memory/").unwrap();
//!
//! let (client, server) = tokio::join!(transport.connect(&endpoint), incoming.accept());
//! # }
//! ```

use std::io;

use tokio::io::DuplexStream;
use tokio::sync::{mpsc, oneshot};

use super::{Transport, TransportStream};
use crate::client::Endpoint;
use crate::BoxFuture;

/// Create a connected transport / acceptor pair.
///
/// `max_buf_size` bounds the in-memory buffer in each direction.
pub fn pair(max_buf_size: usize) -> (DuplexTransport, DuplexIncoming) {
    let (sender, receiver) = mpsc::channel(32);
    (
        DuplexTransport {
            max_buf_size,
            sender,
        },
        DuplexIncoming { receiver },
    )
}

/// Client side of an in-memory transport.
#[derive(Debug, Clone)]
pub struct DuplexTransport {
    max_buf_size: usize,
    sender: mpsc::Sender<DuplexConnectionRequest>,
}

/// Gets sent to the accepting side to create a connection.
#[derive(Debug)]
struct DuplexConnectionRequest {
    ack: oneshot::Sender<DuplexStream>,
    max_buf_size: usize,
    authority: String,
}

impl Transport for DuplexTransport {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, io::Result<TransportStream>> {
        let sender = self.sender.clone();
        let max_buf_size = self.max_buf_size;
        let authority = endpoint.authority();

        Box::pin(async move {
            let (ack, rx) = oneshot::channel();
            sender
                .send(DuplexConnectionRequest {
                    ack,
                    max_buf_size,
                    authority,
                })
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
            let stream = rx
                .await
                .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))?;
            Ok(Box::new(stream) as TransportStream)
        })
    }
}

/// Server side of an in-memory transport.
#[derive(Debug)]
pub struct DuplexIncoming {
    receiver: mpsc::Receiver<DuplexConnectionRequest>,
}

impl DuplexIncoming {
    /// Wait for the next connection.
    ///
    /// Returns `None` once every [`DuplexTransport`] clone has been dropped.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.accept_from().await.map(|(stream, _)| stream)
    }

    /// Wait for the next connection, along with the authority the client
    /// asked for.
    pub async fn accept_from(&mut self) -> Option<(DuplexStream, String)> {
        loop {
            let request = self.receiver.recv().await?;
            let (client, server) = tokio::io::duplex(request.max_buf_size);
            if request.ack.send(client).is_ok() {
                tracing::trace!(authority = %request.authority, "accepted duplex connection");
                return Some((server, request.authority));
            }
        }
    }
}
