//! The page source seam and its request/response types.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::error::FetchError;

/// Caller-supplied query parameters forwarded to the source untouched.
///
/// Keys are kept sorted so request URLs and logs are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page index.
    pub page_number: u32,
    /// Items per page.
    pub page_size: u32,
    pub query: QueryParams,
}

impl PageRequest {
    #[must_use]
    pub fn new(page_number: u32, page_size: u32, query: QueryParams) -> Self {
        Self {
            page_number,
            page_size,
            query,
        }
    }
}

/// Items of one page plus the source's total-count hint.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    /// Total items the source reports for the whole query; only page 1's hint is used.
    pub total_count: Option<u64>,
}

impl<T> PageResult<T> {
    #[must_use]
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            total_count: None,
        }
    }

    #[must_use]
    pub fn with_total_count(mut self, total_count: u64) -> Self {
        self.total_count = Some(total_count);
        self
    }
}

/// A remote source of ranked items, fetched one page at a time.
///
/// Implementations report every non-success condition as a [`FetchError`],
/// typically built from a [`RawFailure`](super::RawFailure) so the
/// classifier picks the kind.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Item type produced by this source.
    type Item: Send;

    /// Fetches a single page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult<Self::Item>, FetchError>;
}

#[async_trait]
impl<S: PageSource> PageSource for Arc<S> {
    type Item = S::Item;

    async fn fetch_page(
        &self,
        request: &PageRequest,
    ) -> Result<PageResult<Self::Item>, FetchError> {
        (**self).fetch_page(request).await
    }
}
