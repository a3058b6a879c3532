//! Requests waiting to be sent, and the responses they produce.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::Empty;

use super::{ClientError, Endpoint};

/// How a response body should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseKind {
    /// Decode the body as UTF-8 text.
    #[default]
    Text,
    /// Hand back the raw bytes.
    Binary,
}

/// A request that has not been sent yet.
///
/// The path is relative to the base path of the endpoint it is sent to. Query
/// parameters have unique keys; setting a key twice keeps the last value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    method: Method,
    path: String,
    query: BTreeMap<String, String>,
    headers: HeaderMap,
    kind: ResponseKind,
}

impl PendingRequest {
    /// Create a request with the given method and relative path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            kind: ResponseKind::default(),
        }
    }

    /// A `GET` for the given relative path.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Set a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add an extra header for this request only.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Deliver the body as text.
    pub fn text(mut self) -> Self {
        self.kind = ResponseKind::Text;
        self
    }

    /// Deliver the body as raw bytes.
    pub fn binary(mut self) -> Self {
        self.kind = ResponseKind::Binary;
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the endpoint's base path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters.
    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Extra headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Requested body delivery.
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// The origin-form request target (`/base/path?query`) on `endpoint`.
    ///
    /// A query string already present in the path is kept, and the encoded
    /// parameters are appended after it.
    pub fn target(&self, endpoint: &Endpoint) -> String {
        let mut target = endpoint.resolve(&self.path);
        if !self.query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            target.push(if target.contains('?') { '&' } else { '?' });
            target.push_str(&encoded);
        }
        target
    }

    /// All headers to send: endpoint defaults, then `User-Agent`, then the
    /// request's own headers, which override defaults of the same name.
    pub(crate) fn merged_headers(&self, endpoint: &Endpoint) -> HeaderMap {
        let mut headers = endpoint.headers().clone();
        headers.insert(header::USER_AGENT, endpoint.user_agent().clone());

        let mut last = None;
        for (name, value) in self.headers.iter() {
            if last.as_ref() != Some(name) {
                headers.remove(name);
                last = Some(name.clone());
            }
            headers.append(name.clone(), value.clone());
        }
        headers
    }

    /// Build the hyper request for `endpoint`.
    pub(crate) fn to_http(
        &self,
        endpoint: &Endpoint,
    ) -> Result<http::Request<Empty<Bytes>>, ClientError> {
        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.target(endpoint))
            .header(header::HOST, endpoint.authority());

        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.merged_headers(endpoint));
        }

        builder
            .body(Empty::new())
            .map_err(|error| ClientError::InvalidArgument(error.to_string()))
    }
}

/// A response body in the form the request asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// UTF-8 decoded text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl ResponseBody {
    /// Decode raw body bytes according to `kind`.
    pub(crate) fn decode(kind: ResponseKind, bytes: Bytes) -> Result<Self, ClientError> {
        match kind {
            ResponseKind::Binary => Ok(ResponseBody::Binary(bytes)),
            ResponseKind::Text => String::from_utf8(bytes.to_vec())
                .map(ResponseBody::Text)
                .map_err(ClientError::decode),
        }
    }

    /// View the body as bytes, regardless of kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Text(text) => text.as_bytes(),
            ResponseBody::Binary(bytes) => bytes,
        }
    }
}

/// A complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl Response {
    /// Assemble a response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status code as an integer.
    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Take the body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// The body as text, if the request asked for text.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Binary(_) => None,
        }
    }

    /// The body as bytes, whatever its kind.
    pub fn bytes(&self) -> Bytes {
        match &self.body {
            ResponseBody::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            ResponseBody::Binary(bytes) => bytes.clone(),
        }
    }
}
