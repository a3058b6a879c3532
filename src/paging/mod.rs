//! Paged loading of remote data.
//!
//! A [`PagingSource`] loads one [`Page`] at a time, keyed by an opaque page
//! key. Each page records the keys of its neighbours, so a consumer walks the
//! data set by following `prev_key` and `next_key`. When the consumer needs to
//! start over (for example after invalidation), [`PagingSource::refresh_key`]
//! picks a key near whatever the consumer was last looking at.
//!
//! [`search`] talks to the remote photo search API, and [`source`] builds a
//! paging source on top of it which downloads every item's thumbnail while
//! the page loads.

use crate::client::ClientError;
use crate::BoxFuture;

pub mod search;
pub mod source;

pub use self::search::{SearchConfig, SearchItem, SearchPage, SearchService};
pub use self::source::{DownloadHandle, DownloadableItem, SearchPagingSource};

/// Parameters for loading a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParams<K> {
    /// The page to load; `None` loads the first page.
    pub key: Option<K>,

    /// Number of items requested.
    pub load_size: usize,
}

impl<K> LoadParams<K> {
    /// Load the first page.
    pub fn initial(load_size: usize) -> Self {
        Self {
            key: None,
            load_size,
        }
    }

    /// Load the page at `key`.
    pub fn at(key: K, load_size: usize) -> Self {
        Self {
            key: Some(key),
            load_size,
        }
    }
}

/// One loaded page.
#[derive(Debug, Clone)]
pub struct Page<K, V> {
    /// Items, in the order the remote returned them.
    pub data: Vec<V>,

    /// Key of the preceding page, if there is one.
    pub prev_key: Option<K>,

    /// Key of the following page, if there is one.
    pub next_key: Option<K>,
}

/// What the consumer has loaded so far, used to choose a refresh key.
#[derive(Debug, Clone)]
pub struct PagingState<K, V> {
    /// Loaded pages, in order.
    pub pages: Vec<Page<K, V>>,

    /// Index of the item most recently accessed, counted across all pages and
    /// including leading placeholders.
    pub anchor_position: Option<usize>,

    /// Number of placeholder items before the first loaded page.
    pub leading_placeholders: usize,
}

impl<K, V> PagingState<K, V> {
    /// The loaded page nearest to item `position`.
    ///
    /// Positions inside the leading placeholders map to the first page, and
    /// positions past the end map to the last page. Empty pages never contain
    /// a position but can still be the nearest.
    pub fn closest_page_to_position(&self, position: usize) -> Option<&Page<K, V>> {
        if self.pages.is_empty() {
            return None;
        }
        let mut remaining = position.saturating_sub(self.leading_placeholders);

        for page in &self.pages {
            if remaining < page.data.len() {
                return Some(page);
            }
            remaining -= page.data.len();
        }

        self.pages.last()
    }
}

/// A source of pages.
pub trait PagingSource: Send + Sync {
    /// Page key type.
    type Key: Clone + Send + 'static;

    /// Item type.
    type Value: Send + 'static;

    /// Load one page.
    ///
    /// Either the whole page loads or the load fails; a page is never returned
    /// with some of its items missing.
    fn load(
        &self,
        params: LoadParams<Self::Key>,
    ) -> BoxFuture<'_, Result<Page<Self::Key, Self::Value>, ClientError>>;

    /// Key to reload from, given what has been loaded so far.
    fn refresh_key(&self, state: &PagingState<Self::Key, Self::Value>) -> Option<Self::Key>;
}
