//! Test peers for the integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http_body_util::Full;
use hyper::body::Incoming;
use hyperpage::bridge::TokioIo;
use hyperpage::client::transport::DuplexIncoming;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type TestResponse = http::Response<Full<Bytes>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A hyper HTTP/1.1 server accepting every in-memory connection.
#[derive(Debug)]
pub struct TestServer {
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub fn serve<F, Fut>(mut incoming: DuplexIncoming, handler: F) -> Self
    where
        F: Fn(http::Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = TestResponse> + Send + 'static,
    {
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        let task = tokio::spawn(async move {
            while let Some(stream) = incoming.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req| {
                        let response = handler(req);
                        async move { Ok::<_, Infallible>(response.await) }
                    });

                    if let Err(error) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        tracing::debug!(%error, "test server connection failed");
                    }
                });
            }
        });

        Self { connections, task }
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn response(status: u16, body: impl Into<Bytes>) -> TestResponse {
    http::Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap()
}

/// Path and query of a request, as the server saw it.
pub fn target(req: &http::Request<Incoming>) -> String {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_default()
}

/// Query parameters of a request.
pub fn query(req: &http::Request<Incoming>) -> Vec<(String, String)> {
    url::form_urlencoded::parse(req.uri().query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in bytes {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

fn png_chunk(data: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    data.extend_from_slice(&(body.len() as u32).to_be_bytes());
    let start = data.len();
    data.extend_from_slice(kind);
    data.extend_from_slice(body);
    let crc = crc32(&data[start..]);
    data.extend_from_slice(&crc.to_be_bytes());
}

/// A structurally complete PNG of the given size. The image data is a
/// placeholder and is never inflated.
pub fn png(width: u32, height: u32) -> Bytes {
    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    png_chunk(&mut data, b"IHDR", &ihdr);
    png_chunk(&mut data, b"IDAT", &[0x78, 0x9c, 0x63, 0x00, 0x00]);
    png_chunk(&mut data, b"IEND", &[]);
    data.into()
}

/// Read one request head from a raw stream, returning its target.
///
/// Requests in these tests never carry a body. Returns `None` at end of
/// stream.
pub async fn read_request<S>(stream: &mut S, buf: &mut BytesMut) -> Option<String>
where
    S: AsyncRead + Unpin,
{
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut request = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(len) = request.parse(&buf[..]).unwrap() {
            let target = request.path.unwrap().to_owned();
            let _ = buf.split_to(len);
            return Some(target);
        }

        if stream.read_buf(buf).await.unwrap() == 0 {
            return None;
        }
    }
}

/// A raw HTTP/1.1 response with a fixed length body.
pub fn raw_response(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} X\r\ncontent-length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}
