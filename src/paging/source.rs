//! Paging over search results, with thumbnails downloaded per page.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{try_join_all, Shared};
use futures_util::FutureExt;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, trace, Instrument};

use super::search::{SearchItem, SearchService};
use super::{LoadParams, Page, PagingSource, PagingState};
use crate::client::ClientError;
use crate::image::{ContainerDecoder, DecodedImage, ImageDecoder};
use crate::BoxFuture;

/// Key of the first page.
pub const STARTING_PAGE_INDEX: u32 = 1;

type DownloadOutcome = Result<Arc<DecodedImage>, ClientError>;

/// A thumbnail download, started as soon as its item was created.
///
/// Resolves exactly once; every clone observes the same outcome. The download
/// is never retried.
#[derive(Clone)]
pub struct DownloadHandle {
    inner: Shared<BoxFuture<'static, DownloadOutcome>>,
}

impl fmt::Debug for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.peek() {
            None => "pending",
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "failed",
        };
        f.debug_tuple("DownloadHandle").field(&state).finish()
    }
}

impl DownloadHandle {
    fn spawn<F>(download: F) -> (Self, AbortHandle)
    where
        F: Future<Output = Result<DecodedImage, ClientError>> + Send + 'static,
    {
        let task = tokio::spawn(download.in_current_span());
        let abort = task.abort_handle();

        let inner = async move {
            match task.await {
                Ok(outcome) => outcome.map(Arc::new),
                Err(error) => Err(join_error(error)),
            }
        }
        .boxed()
        .shared();

        (Self { inner }, abort)
    }

    /// The outcome, if the download has settled.
    pub fn peek(&self) -> Option<&DownloadOutcome> {
        self.inner.peek()
    }
}

impl Future for DownloadHandle {
    type Output = DownloadOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

fn join_error(error: JoinError) -> ClientError {
    if error.is_cancelled() {
        ClientError::Cancelled
    } else {
        ClientError::InternalInvariant(format!("download task failed: {error}"))
    }
}

/// A search result together with its thumbnail download.
#[derive(Debug, Clone)]
pub struct DownloadableItem {
    /// The search result.
    pub item: SearchItem,

    /// The thumbnail.
    pub content: DownloadHandle,
}

/// Aborts every download it holds when dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Pages of search results for one query.
///
/// Each page load searches first, then downloads every thumbnail on the page
/// concurrently. A page is only returned once every download has succeeded;
/// if the search or any download fails, the page fails and the remaining
/// downloads are aborted.
#[derive(Clone)]
pub struct SearchPagingSource {
    service: SearchService,
    query: String,
    decoder: Arc<dyn ImageDecoder>,
}

impl fmt::Debug for SearchPagingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchPagingSource")
            .field("query", &self.query)
            .field("decoder", &self.decoder)
            .finish()
    }
}

impl SearchPagingSource {
    /// Page through the results for `query`.
    pub fn new(service: SearchService, query: impl Into<String>) -> Self {
        Self {
            service,
            query: query.into(),
            decoder: Arc::new(ContainerDecoder),
        }
    }

    /// Decode thumbnails with `decoder`.
    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The query being paged.
    pub fn query(&self) -> &str {
        &self.query
    }

    #[tracing::instrument(name = "load", skip(self), fields(query = %self.query))]
    async fn load_page(
        &self,
        page: u32,
        load_size: usize,
    ) -> Result<Page<u32, DownloadableItem>, ClientError> {
        if page < STARTING_PAGE_INDEX {
            return Err(ClientError::InvalidArgument(format!(
                "page {page} is before the first page ({STARTING_PAGE_INDEX})"
            )));
        }

        let response = self
            .service
            .search_photos(&self.query, page, load_size)
            .await?;

        let mut aborts = Vec::with_capacity(response.items.len());
        let items: Vec<DownloadableItem> = response
            .items
            .into_iter()
            .map(|item| {
                let service = self.service.clone();
                let decoder = self.decoder.clone();
                let url = item.thumbnail_url().to_owned();

                let (content, abort) = DownloadHandle::spawn(async move {
                    let bytes = service.download_photo(&url).await?;
                    decoder.decode(bytes)
                });
                aborts.push(abort);
                DownloadableItem { item, content }
            })
            .collect();
        let _downloads = AbortOnDrop(aborts);

        trace!(downloads = items.len(), "downloads in flight");
        if let Err(error) = try_join_all(items.iter().map(|item| item.content.clone())).await {
            debug!(%error, "page failed");
            return Err(error);
        }

        Ok(Page {
            data: items,
            prev_key: (page > STARTING_PAGE_INDEX).then(|| page - 1),
            next_key: (page < response.total_pages).then(|| page + 1),
        })
    }
}

impl PagingSource for SearchPagingSource {
    type Key = u32;
    type Value = DownloadableItem;

    fn load(
        &self,
        params: LoadParams<u32>,
    ) -> BoxFuture<'_, Result<Page<u32, DownloadableItem>, ClientError>> {
        let page = params.key.unwrap_or(STARTING_PAGE_INDEX);
        Box::pin(self.load_page(page, params.load_size))
    }

    fn refresh_key(&self, state: &PagingState<u32, DownloadableItem>) -> Option<u32> {
        let anchor = state.anchor_position?;
        state.closest_page_to_position(anchor)?.prev_key
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SearchPagingSource: Send, Sync, Clone);
    assert_impl_all!(DownloadableItem: Send, Sync, Clone);

    #[tokio::test]
    async fn handle_resolves_once_for_every_clone() {
        let (handle, _abort) = DownloadHandle::spawn(async {
            Ok(DecodedImage::new(
                crate::image::ImageFormat::Png,
                1,
                1,
                bytes::Bytes::new(),
            ))
        });
        let other = handle.clone();

        let first = handle.await.unwrap();
        let second = other.clone().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(other.peek(), Some(Ok(_))));
    }

    #[tokio::test]
    async fn aborted_download_is_cancelled() {
        let (handle, abort) = DownloadHandle::spawn(async {
            std::future::pending::<()>().await;
            Err(ClientError::InternalInvariant("unreachable".into()))
        });
        abort.abort();
        assert_eq!(handle.await.unwrap_err(), ClientError::Cancelled);
    }
}
