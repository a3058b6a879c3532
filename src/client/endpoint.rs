//! Endpoints describe where and how a connection talks to a server.

use std::fmt;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use super::ClientError;

/// Default `User-Agent` sent by every endpoint unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("hyperpage/", env!("CARGO_PKG_VERSION"));

/// Protocol used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Port used when the URL does not name one.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// The scheme as it appears in a URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for pipelined connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    /// Requests are buffered and written to the socket once per interval.
    pub flush_interval: Duration,
}

impl PipelineConfig {
    /// Default flush interval.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5);
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval: Self::DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// How requests issued through one connection share sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStrategy {
    /// A new socket per request, closed once the response is delivered.
    OneShot,

    /// One socket, one request in flight at a time.
    #[default]
    Persistent,

    /// One socket, requests written ahead of responses and matched to them
    /// in arrival order.
    Pipelined(PipelineConfig),
}

impl ConnectionStrategy {
    /// Pipelined strategy with the default flush interval.
    pub fn pipelined() -> Self {
        ConnectionStrategy::Pipelined(PipelineConfig::default())
    }
}

/// A configured target: scheme, authority, base path and connection strategy.
///
/// The base path always ends with `/`, and request paths are resolved relative
/// to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    strategy: ConnectionStrategy,
    base_path: String,
    headers: HeaderMap,
    user_agent: HeaderValue,
}

impl Endpoint {
    /// Parse a base URL into an endpoint with default settings.
    pub fn parse(base_url: &str) -> Result<Self, ClientError> {
        Self::builder(base_url).build()
    }

    /// Start building an endpoint for the given base URL.
    pub fn builder(base_url: &str) -> EndpointBuilder {
        EndpointBuilder::new(base_url)
    }

    /// URL scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port, defaulted from the scheme when the URL omits it.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection strategy.
    pub fn strategy(&self) -> ConnectionStrategy {
        self.strategy
    }

    /// Base path, always ending with `/`.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Headers sent with every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `User-Agent` sent with every request.
    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme default.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The base URL this endpoint serves, e.g. `https://example.com/images/`.
    pub fn base_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority(), self.base_path)
    }

    /// Resolve a request path against the base path.
    ///
    /// A leading `/` on `path` is ignored so the result always stays beneath
    /// the base path.
    pub fn resolve(&self, path: &str) -> String {
        let mut resolved = self.base_path.clone();
        resolved.push_str(path.trim_start_matches('/'));
        resolved
    }

    /// If `url` lies under this endpoint's base URL, the remainder relative to it.
    ///
    /// `url` is normalized before it is compared, so an explicit default port,
    /// an upper-case host or unescaped path characters still match. The
    /// remainder keeps the query string and drops any fragment.
    pub fn relative_to_base(&self, url: &str) -> Option<String> {
        let url = url::Url::parse(url).ok()?;
        if url.scheme() != self.scheme.as_str()
            || url.host_str() != Some(self.host.as_str())
            || url.port_or_known_default() != Some(self.port)
        {
            return None;
        }

        let mut remainder = url.path().strip_prefix(self.base_path.as_str())?.to_owned();
        if let Some(query) = url.query() {
            remainder.push('?');
            remainder.push_str(query);
        }
        Some(remainder)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// Builder for [`Endpoint`].
#[derive(Debug)]
pub struct EndpointBuilder {
    base_url: String,
    strategy: ConnectionStrategy,
    headers: HeaderMap,
    user_agent: Option<String>,
    error: Option<ClientError>,
}

impl EndpointBuilder {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            strategy: ConnectionStrategy::default(),
            headers: HeaderMap::new(),
            user_agent: None,
            error: None,
        }
    }

    /// Set the connection strategy.
    pub fn strategy(mut self, strategy: ConnectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                self.error.get_or_insert_with(|| {
                    ClientError::InvalidArgument(format!("invalid header: {name}"))
                });
            }
        }
        self
    }

    /// Override the `User-Agent`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Validate the base URL and produce the endpoint.
    pub fn build(self) -> Result<Endpoint, ClientError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let url = url::Url::parse(&self.base_url).map_err(|error| {
            ClientError::InvalidArgument(format!("invalid base url {}: {error}", self.base_url))
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ClientError::InvalidArgument(format!(
                    "unsupported protocol: {other}"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| ClientError::InvalidArgument(format!("no host in {}", self.base_url)))?
            .to_owned();
        let port = url.port().unwrap_or(scheme.default_port());

        let mut base_path = url.path().to_owned();
        if !base_path.ends_with('/') {
            base_path.push('/');
        }

        let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = HeaderValue::from_str(user_agent).map_err(|_| {
            ClientError::InvalidArgument(format!("invalid user agent: {user_agent}"))
        })?;

        Ok(Endpoint {
            scheme,
            host,
            port,
            strategy: self.strategy,
            base_path,
            headers: self.headers,
            user_agent,
        })
    }
}
