//! HTTP/1.1 framing for pipelined connections.
//!
//! Requests are serialized straight into a write buffer. Responses are decoded
//! incrementally from a read buffer: the head with `httparse`, then the body by
//! `Content-Length`, chunked transfer coding, or until the peer closes.
//!
//! Bytes belonging to the next response are left in the buffer, which is what
//! lets several pipelined responses arrive in one read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{self, HeaderName, HeaderValue};
use http::uri::PathAndQuery;
use http::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::client::{ClientError, Endpoint, PendingRequest};

const MAX_HEADERS: usize = 100;

/// The request-line target for `request`.
///
/// Fails with [`ClientError::InvalidArgument`] when the target contains
/// characters that cannot appear on a request line, such as spaces or line
/// breaks.
pub fn request_target(
    endpoint: &Endpoint,
    request: &PendingRequest,
) -> Result<PathAndQuery, ClientError> {
    let target = request.target(endpoint);
    PathAndQuery::try_from(target.as_str()).map_err(|error| {
        ClientError::InvalidArgument(format!("invalid request target {target:?}: {error}"))
    })
}

/// Serialize `request` for `endpoint` onto `dst`.
///
/// Nothing is written if the request target is invalid.
pub fn encode_request(
    endpoint: &Endpoint,
    request: &PendingRequest,
    dst: &mut BytesMut,
) -> Result<(), ClientError> {
    let target = request_target(endpoint, request)?;

    dst.put_slice(request.method().as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(target.as_str().as_bytes());
    dst.put_slice(b" HTTP/1.1\r\n");

    put_header(dst, &header::HOST, endpoint.authority().as_bytes());
    for (name, value) in request.merged_headers(endpoint).iter() {
        put_header(dst, name, value.as_bytes());
    }

    if matches!(*request.method(), Method::POST | Method::PUT | Method::PATCH) {
        put_header(dst, &header::CONTENT_LENGTH, b"0");
    }
    dst.put_slice(b"\r\n");
    Ok(())
}

fn put_header(dst: &mut BytesMut, name: &HeaderName, value: &[u8]) {
    dst.put_slice(name.as_str().as_bytes());
    dst.put_slice(b": ");
    dst.put_slice(value);
    dst.put_slice(b"\r\n");
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body with any transfer coding removed.
    pub body: Bytes,
    /// Whether the peer will accept more requests on this connection.
    pub keep_alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked(Chunk),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

#[derive(Debug)]
struct Head {
    status: StatusCode,
    headers: HeaderMap,
    keep_alive: bool,
}

#[derive(Debug)]
enum State {
    Head,
    Body {
        head: Head,
        framing: Framing,
        body: BytesMut,
    },
}

/// Incremental decoder for one response.
#[derive(Debug)]
pub struct ResponseDecoder {
    method: Method,
    state: State,
}

impl ResponseDecoder {
    /// Decoder for the response to a request with `method`.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            state: State::Head,
        }
    }

    /// Consume as much of `src` as belongs to this response.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawResponse>, ClientError> {
        if let State::Head = self.state {
            match parse_head(src, &self.method)? {
                Some((head, framing)) => {
                    self.state = State::Body {
                        head,
                        framing,
                        body: BytesMut::new(),
                    };
                }
                None => return Ok(None),
            }
        }

        if let State::Body { framing, body, .. } = &mut self.state {
            if !decode_body(framing, body, src)? {
                return Ok(None);
            }
        }
        Ok(self.take_response())
    }

    /// The peer closed the connection; complete the response if its framing
    /// allows it.
    pub fn decode_eof(&mut self, src: &mut BytesMut) -> Result<RawResponse, ClientError> {
        if let Some(response) = self.decode(src)? {
            return Ok(response);
        }

        let until_close = matches!(
            self.state,
            State::Body {
                framing: Framing::UntilClose,
                ..
            }
        );
        if until_close {
            return self
                .take_response()
                .ok_or_else(|| ClientError::InternalInvariant("response head missing".into()));
        }

        if matches!(self.state, State::Head) && src.is_empty() {
            Err(ClientError::closed())
        } else {
            Err(ClientError::Protocol(
                "connection closed before message completed".into(),
            ))
        }
    }

    fn take_response(&mut self) -> Option<RawResponse> {
        match std::mem::replace(&mut self.state, State::Head) {
            State::Body { head, body, .. } => Some(RawResponse {
                status: head.status,
                headers: head.headers,
                body: body.freeze(),
                keep_alive: head.keep_alive,
            }),
            State::Head => None,
        }
    }
}

/// Parse a response head, skipping interim `1xx` responses.
fn parse_head(
    src: &mut BytesMut,
    method: &Method,
) -> Result<Option<(Head, Framing)>, ClientError> {
    loop {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut slots);
        let len = match response.parse(&src[..]) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(error) => return Err(ClientError::protocol(error)),
        };

        let code = response
            .code
            .ok_or_else(|| ClientError::Protocol("missing status code".into()))?;
        let status = StatusCode::from_u16(code).map_err(ClientError::protocol)?;

        let mut headers = HeaderMap::with_capacity(response.headers.len());
        for slot in response.headers.iter() {
            let name = HeaderName::from_bytes(slot.name.as_bytes()).map_err(ClientError::protocol)?;
            let value = HeaderValue::from_bytes(slot.value).map_err(ClientError::protocol)?;
            headers.append(name, value);
        }
        let http10 = response.version == Some(0);
        src.advance(len);

        if status == StatusCode::SWITCHING_PROTOCOLS {
            return Err(ClientError::Protocol("protocol upgrades are not supported".into()));
        }
        if status.is_informational() {
            tracing::trace!(%status, "skipping interim response");
            continue;
        }

        let keep_alive = keep_alive(&headers, http10);
        let framing = framing(&headers, status, method)?;
        let keep_alive = keep_alive && framing != Framing::UntilClose;

        return Ok(Some((
            Head {
                status,
                headers,
                keep_alive,
            },
            framing,
        )));
    }
}

fn keep_alive(headers: &HeaderMap, http10: bool) -> bool {
    let connection = |token: &str| {
        headers.get_all(header::CONNECTION).iter().any(|value| {
            value
                .to_str()
                .map(|value| {
                    value
                        .split(',')
                        .any(|part| part.trim().eq_ignore_ascii_case(token))
                })
                .unwrap_or(false)
        })
    };

    if http10 {
        connection("keep-alive")
    } else {
        !connection("close")
    }
}

fn framing(
    headers: &HeaderMap,
    status: StatusCode,
    method: &Method,
) -> Result<Framing, ClientError> {
    if *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Framing::Empty);
    }

    if let Some(encoding) = headers.get_all(header::TRANSFER_ENCODING).iter().last() {
        let chunked = encoding
            .to_str()
            .ok()
            .and_then(|value| value.rsplit(',').next())
            .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        return Ok(if chunked {
            Framing::Chunked(Chunk::Size)
        } else {
            Framing::UntilClose
        });
    }

    if let Some(length) = headers.get(header::CONTENT_LENGTH) {
        let length = length
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or_else(|| ClientError::Protocol("invalid content-length".into()))?;
        return Ok(if length == 0 {
            Framing::Empty
        } else {
            Framing::Length(length)
        });
    }

    Ok(Framing::UntilClose)
}

/// Move body bytes from `src` to `body`. Returns true once the body is complete.
fn decode_body(
    framing: &mut Framing,
    body: &mut BytesMut,
    src: &mut BytesMut,
) -> Result<bool, ClientError> {
    match framing {
        Framing::Empty => Ok(true),
        Framing::Length(remaining) => {
            let take = (*remaining).min(src.len());
            body.extend_from_slice(&src.split_to(take));
            *remaining -= take;
            Ok(*remaining == 0)
        }
        Framing::UntilClose => {
            body.extend_from_slice(&src.split());
            Ok(false)
        }
        Framing::Chunked(chunk) => decode_chunked(chunk, body, src),
    }
}

fn decode_chunked(
    chunk: &mut Chunk,
    body: &mut BytesMut,
    src: &mut BytesMut,
) -> Result<bool, ClientError> {
    loop {
        match chunk {
            Chunk::Size => match httparse::parse_chunk_size(&src[..]) {
                Ok(httparse::Status::Complete((consumed, size))) => {
                    src.advance(consumed);
                    let size = usize::try_from(size)
                        .map_err(|_| ClientError::Protocol("chunk too large".into()))?;
                    *chunk = if size == 0 {
                        Chunk::Trailers
                    } else {
                        Chunk::Data(size)
                    };
                }
                Ok(httparse::Status::Partial) => return Ok(false),
                Err(_) => return Err(ClientError::Protocol("invalid chunk size".into())),
            },
            Chunk::Data(remaining) => {
                let take = (*remaining).min(src.len());
                body.extend_from_slice(&src.split_to(take));
                *remaining -= take;
                if *remaining > 0 {
                    return Ok(false);
                }
                *chunk = Chunk::DataEnd;
            }
            Chunk::DataEnd => {
                if src.len() < 2 {
                    return Ok(false);
                }
                if &src[..2] != b"\r\n" {
                    return Err(ClientError::Protocol("missing chunk terminator".into()));
                }
                src.advance(2);
                *chunk = Chunk::Size;
            }
            Chunk::Trailers => {
                let Some(end) = src.windows(2).position(|window| window == b"\r\n") else {
                    return Ok(false);
                };
                src.advance(end + 2);
                if end == 0 {
                    return Ok(true);
                }
            }
        }
    }
}

/// Read one complete response from `reader`, buffering through `buf`.
///
/// Leftover bytes (the start of the next pipelined response) stay in `buf`.
pub async fn read_response<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    method: &Method,
) -> Result<RawResponse, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ResponseDecoder::new(method.clone());
    loop {
        if let Some(response) = decoder.decode(buf)? {
            return Ok(response);
        }
        if reader.read_buf(buf).await? == 0 {
            return decoder.decode_eof(buf);
        }
    }
}
