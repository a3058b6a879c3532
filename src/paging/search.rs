//! Remote photo search API.
//!
//! [`SearchService`] issues search queries over a single connection to the
//! API root, and downloads thumbnails. Thumbnails served from under the API
//! root share that connection; thumbnails on other hosts are fetched over one
//! connection per origin, opened on first use and reused afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::client::{
    Client, ClientError, Connection, ConnectionStrategy, Endpoint, PendingRequest,
};

/// Default API root.
pub const DEFAULT_API_ROOT: &str = "https://api.unsplash.com/";

const SEARCH_PHOTOS: &str = "search/photos";

/// Configuration for [`SearchService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Base URL of the search API.
    pub api_root: String,

    /// Access key, sent as the `client_id` query parameter.
    pub access_key: String,

    /// Connection strategy for thumbnail hosts other than the API root.
    pub download_strategy: ConnectionStrategy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_owned(),
            access_key: String::new(),
            download_strategy: ConnectionStrategy::OneShot,
        }
    }
}

impl SearchConfig {
    /// Default configuration with the given access key.
    pub fn with_access_key(access_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            ..Default::default()
        }
    }
}

/// Image URLs for a search result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PhotoUrls {
    /// Thumbnail-sized image.
    pub small: String,
}

/// The photographer credited for a search result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Photographer {
    /// Display name.
    pub name: String,

    /// Account name, used to build the attribution link.
    pub username: String,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchItem {
    /// Stable identifier.
    pub id: String,

    /// Image URLs.
    pub urls: PhotoUrls,

    /// Attribution metadata.
    pub user: Photographer,
}

impl SearchItem {
    /// URL of the thumbnail to download.
    pub fn thumbnail_url(&self) -> &str {
        &self.urls.small
    }

    /// Link to the photographer's profile, with referral parameters.
    pub fn attribution_url(&self) -> String {
        format!(
            "https://unsplash.com/{}?utm_source=hyperpage&utm_medium=referral",
            self.user.username
        )
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchItem>,
    total_pages: u32,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Results, in the order the API returned them.
    pub items: Vec<SearchItem>,

    /// Index of this page.
    pub page: u32,

    /// Number of pages the API reports for the query.
    pub total_pages: u32,
}

struct SearchServiceRef {
    client: Client,
    api: Connection,
    config: SearchConfig,
    downloads: Mutex<HashMap<String, Connection>>,
}

/// Client for the photo search API.
#[derive(Clone)]
pub struct SearchService {
    inner: Arc<SearchServiceRef>,
}

impl fmt::Debug for SearchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchService")
            .field("api", &self.inner.api)
            .field("download_strategy", &self.inner.config.download_strategy)
            .finish()
    }
}

impl SearchService {
    /// Open a connection to the API root on `client`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(client: &Client, config: SearchConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::builder(&config.api_root)
            .header("accept-version", "v1")
            .build()?;
        let api = client.open(endpoint);

        Ok(Self {
            inner: Arc::new(SearchServiceRef {
                client: client.clone(),
                api,
                config,
                downloads: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The connection to the API root.
    pub fn connection(&self) -> &Connection {
        &self.inner.api
    }

    /// Search for photos matching `query`.
    ///
    /// Fails with [`ClientError::BadStatus`] when the API answers with a
    /// status of 400 or above, and with [`ClientError::Decode`] when the body
    /// is not a valid search response.
    #[tracing::instrument(skip(self))]
    pub async fn search_photos(
        &self,
        query: &str,
        page: u32,
        per_page: usize,
    ) -> Result<SearchPage, ClientError> {
        let request = PendingRequest::get(SEARCH_PHOTOS)
            .query("query", query)
            .query("page", page.to_string())
            .query("per_page", per_page.to_string())
            .query("client_id", self.inner.config.access_key.as_str())
            .text();

        let response = self.inner.api.send(request).await?;
        if response.code() >= 400 {
            debug!(status = %response.status(), "search rejected");
            return Err(ClientError::BadStatus {
                status: response.code(),
            });
        }

        let body = response
            .text()
            .ok_or_else(|| ClientError::Decode("search response has no text body".into()))?;
        let body: SearchResponse = serde_json::from_str(body).map_err(ClientError::decode)?;
        trace!(
            results = body.results.len(),
            total_pages = body.total_pages,
            "search complete"
        );

        Ok(SearchPage {
            items: body.results,
            page,
            total_pages: body.total_pages,
        })
    }

    /// Download the raw bytes at `url`.
    ///
    /// Fails with [`ClientError::BadStatus`] unless the status is a success.
    pub async fn download_photo(&self, url: &str) -> Result<Bytes, ClientError> {
        let (connection, resource) = self.route(url)?;
        trace!(%url, endpoint = %connection.endpoint(), "download");

        let response = connection
            .send(PendingRequest::get(resource).binary())
            .await?;
        if !response.status().is_success() {
            debug!(status = %response.status(), %url, "download rejected");
            return Err(ClientError::BadStatus {
                status: response.code(),
            });
        }

        Ok(response.bytes())
    }

    /// Pick the connection serving `url`, and the path to request on it.
    fn route(&self, url: &str) -> Result<(Connection, String), ClientError> {
        let api = &self.inner.api;
        if let Some(resource) = api.endpoint().relative_to_base(url) {
            return Ok((api.clone(), resource));
        }

        let parsed = match url::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Ok((api.clone(), url.to_owned()));
            }
            Err(error) => {
                return Err(ClientError::InvalidArgument(format!(
                    "invalid download url {url}: {error}"
                )))
            }
        };

        let origin = format!("{}/", parsed.origin().ascii_serialization());
        let mut resource = parsed.path().trim_start_matches('/').to_owned();
        if let Some(query) = parsed.query() {
            resource.push('?');
            resource.push_str(query);
        }

        let mut downloads = self.inner.downloads.lock();
        if let Some(connection) = downloads.get(&origin).filter(|c| !c.is_closed()) {
            return Ok((connection.clone(), resource));
        }

        let endpoint = Endpoint::builder(&origin)
            .strategy(self.inner.config.download_strategy)
            .build()?;
        debug!(%endpoint, "opening download connection");
        let connection = self.inner.client.open(endpoint);
        downloads.insert(origin, connection.clone());
        Ok((connection, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::duplex;

    fn service() -> SearchService {
        let (transport, _incoming) = duplex::pair(1024);
        let client = Client::new(transport);
        SearchService::new(
            &client,
            SearchConfig {
                api_root: "http://api.test/v1/".into(),
                ..SearchConfig::with_access_key("key")
            },
        )
        .unwrap()
    }

    #[test]
    fn search_response_ignores_unknown_fields() {
        let body = r#"{
            "total": 1,
            "total_pages": 7,
            "results": [{
                "id": "abc",
                "width": 100,
                "urls": {"raw": "http://img.test/raw", "small": "http://img.test/small"},
                "user": {"name": "Ada", "username": "ada", "bio": null}
            }]
        }"#;

        let response: SearchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.total_pages, 7);
        assert_eq!(response.results[0].thumbnail_url(), "http://img.test/small");
        assert_eq!(
            response.results[0].attribution_url(),
            "https://unsplash.com/ada?utm_source=hyperpage&utm_medium=referral"
        );
    }

    #[tokio::test]
    async fn thumbnails_under_api_root_share_its_connection() {
        let service = service();
        let (connection, resource) = service.route("http://api.test/v1/photos/1.jpg").unwrap();
        assert_eq!(resource, "photos/1.jpg");
        assert_eq!(connection.endpoint(), service.connection().endpoint());
    }

    #[tokio::test]
    async fn other_origins_get_one_cached_connection() {
        let service = service();
        let (first, resource) = service
            .route("http://img.test/photo-1?w=400&fm=jpg")
            .unwrap();
        assert_eq!(resource, "photo-1?w=400&fm=jpg");
        assert_eq!(first.endpoint().base_url(), "http://img.test/");
        assert_eq!(first.endpoint().strategy(), ConnectionStrategy::OneShot);

        let (second, _) = service.route("http://img.test/photo-2").unwrap();
        assert_eq!(first.endpoint(), second.endpoint());
        assert_eq!(service.inner.downloads.lock().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_download_scheme_is_rejected() {
        let service = service();
        assert!(matches!(
            service.route("ftp://img.test/photo"),
            Err(ClientError::InvalidArgument(_))
        ));
    }
}
