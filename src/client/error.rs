use thiserror::Error;

use crate::BoxError;

/// Client error type.
///
/// Every failure in this crate is reported through this type, carrying a
/// diagnostic message. It never wraps a partial response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ClientError {
    /// Connecting, writing to, or reading from the underlying socket failed.
    #[error("transport: {0}")]
    Transport(String),

    /// The peer sent something that is not a valid HTTP/1.1 response.
    #[error("protocol: {0}")]
    Protocol(String),

    /// The response status was outside the accepted range.
    #[error("bad status: {status}")]
    BadStatus {
        /// The status code that was returned.
        status: u16,
    },

    /// A response body could not be decoded (malformed JSON, text or image).
    #[error("decode: {0}")]
    Decode(String),

    /// The caller supplied an argument that violates a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The request was abandoned before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// A result was expected but never produced. This indicates a bug.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl ClientError {
    pub(crate) fn transport<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let error = error.into();
        tracing::debug!(%error, "transport error");
        ClientError::Transport(error.to_string())
    }

    pub(crate) fn protocol<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let error = error.into();
        tracing::debug!(%error, "protocol error");
        ClientError::Protocol(error.to_string())
    }

    pub(crate) fn decode<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let error = error.into();
        tracing::debug!(%error, "decode error");
        ClientError::Decode(error.to_string())
    }

    /// Error delivered to requests still queued when the client shuts down.
    pub(crate) fn shut_down() -> Self {
        ClientError::Transport("client shut down".into())
    }

    /// Error delivered when a connection driver is no longer running.
    pub(crate) fn closed() -> Self {
        ClientError::Transport("connection closed".into())
    }
}

impl From<hyper::Error> for ClientError {
    fn from(error: hyper::Error) -> Self {
        if error.is_parse() || error.is_parse_status() || error.is_incomplete_message() {
            ClientError::protocol(error)
        } else if error.is_canceled() {
            ClientError::Cancelled
        } else {
            ClientError::transport(error)
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(error: std::io::Error) -> Self {
        ClientError::transport(error)
    }
}
