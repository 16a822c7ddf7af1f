//! Multi-page fetch orchestration.
//!
//! [`PaginatedFetcher::fetch_all`] fetches page 1 directly to learn the
//! total-count hint, plans the remaining pages, and hands them to a
//! [`BatchAggregator`]. A failure on page 1 is returned as an error since the
//! page plan cannot be derived without it; failures on later pages are folded
//! into the [`BatchResult`].

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::batch::{BatchAggregator, BatchOptions, BatchResult};
use super::cancel::CancellationSignal;
use super::error::{ErrorKind, FetchError, ParameterErrorKind};
use super::metrics::{ErrorMetrics, MetricsCollector};
use super::pacer::Pacer;
use super::page::{PageRequest, PageSource, QueryParams};
use super::retry::{RetryError, RetryExecutor, RetryObserver, RetryPolicy, TracingRetryObserver};

/// Fetches every page of a ranked listing from a [`PageSource`].
///
/// Each fetcher owns its [`MetricsCollector`] unless one is shared in through
/// [`with_metrics`](Self::with_metrics).
pub struct PaginatedFetcher<S> {
    source: S,
    metrics: Arc<MetricsCollector>,
    observer: Arc<dyn RetryObserver>,
    signal: CancellationSignal,
    max_pages: Option<u32>,
}

impl<S> std::fmt::Debug for PaginatedFetcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedFetcher")
            .field("max_pages", &self.max_pages)
            .field("cancelled", &self.signal.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<S: PageSource> PaginatedFetcher<S> {
    /// Creates a fetcher with its own metrics and a `tracing` retry observer.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            metrics: Arc::new(MetricsCollector::new()),
            observer: Arc::new(TracingRetryObserver),
            signal: CancellationSignal::new(),
            max_pages: None,
        }
    }

    /// Shares an existing metrics collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the retry observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Attaches a cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Caps the page plan, for upstreams that refuse pages beyond a limit.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages.max(1));
        self
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Snapshot of this fetcher's request and error counters.
    #[must_use]
    pub fn metrics(&self) -> ErrorMetrics {
        self.metrics.snapshot()
    }

    /// Zeroes this fetcher's counters.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Fetches up to `max_items` items across as many pages as needed.
    ///
    /// # Errors
    ///
    /// Returns the classified error when page 1 cannot be fetched, and a
    /// `Parameter(InvalidPage)` error when `page_size` is zero. Failures on
    /// later pages never surface here; they are reported in the result.
    #[instrument(skip_all, fields(max_items = max_items, page_size = page_size))]
    pub async fn fetch_all(
        &self,
        max_items: usize,
        page_size: u32,
        query: &QueryParams,
        policy: &RetryPolicy,
        options: &BatchOptions,
    ) -> Result<BatchResult<S::Item>, FetchError> {
        if page_size == 0 {
            return Err(FetchError::new(
                ErrorKind::Parameter(ParameterErrorKind::InvalidPage),
                "page size must be at least 1",
            ));
        }
        if max_items == 0 {
            return Ok(BatchResult::from_parts(
                Vec::new(),
                Vec::new(),
                0,
                options.min_success_rate(),
                None,
            ));
        }

        let executor = RetryExecutor::new(policy.clone(), Arc::clone(&self.metrics))
            .with_observer(Arc::clone(&self.observer))
            .with_cancellation(self.signal.clone());

        let source = &self.source;
        let first_request = PageRequest::new(1, page_size, query.clone());
        let first_started = Instant::now();

        let first = match executor
            .execute(|| source.fetch_page(&first_request))
            .await
        {
            Ok(page) => page,
            Err(RetryError::Failed(error)) => {
                error!(kind = %error.kind(), error = %error, "first page failed");
                return Err(error);
            }
            Err(RetryError::Cancelled) => {
                warn!("cancelled while fetching the first page");
                return Ok(BatchResult::cancelled());
            }
        };

        let page_count =
            self.plan_page_count(max_items, page_size, first.items.len(), first.total_count);
        info!(
            total_count = ?first.total_count,
            first_page_items = first.items.len(),
            page_count,
            "planned fetch"
        );

        let mut items = first.items;
        if page_count <= 1 {
            items.truncate(max_items);
            return Ok(BatchResult::from_parts(
                items,
                Vec::new(),
                1,
                options.min_success_rate(),
                None,
            ));
        }

        let operations: Vec<_> = (2..=page_count)
            .map(|page_number| {
                let request = PageRequest::new(page_number, page_size, query.clone());
                move || {
                    let request = request.clone();
                    async move { source.fetch_page(&request).await.map(|page| page.items) }
                }
            })
            .collect();

        let pacer = Arc::new(Pacer::started_at(options.request_interval(), first_started));
        let batch = BatchAggregator::new(executor, options.clone())
            .with_pacer(pacer)
            .run_batch(operations)
            .await;

        items.extend(batch.items);
        items.truncate(max_items);

        info!(
            items = items.len(),
            failed_pages = batch.errors.len(),
            success = batch.success,
            "fetch finished"
        );

        Ok(BatchResult { items, ..batch })
    }

    fn plan_page_count(
        &self,
        max_items: usize,
        page_size: u32,
        first_page_len: usize,
        total_count: Option<u64>,
    ) -> u32 {
        let target = match total_count {
            Some(total) => usize::try_from(total).unwrap_or(usize::MAX).min(max_items),
            None => {
                warn!("source reported no total count, fetching only the first page");
                first_page_len.min(max_items)
            }
        };

        let pages = target.div_ceil(page_size as usize);
        let pages = u32::try_from(pages).unwrap_or(u32::MAX);
        match self.max_pages {
            Some(limit) if pages > limit => {
                warn!(pages, limit, "page plan capped by the source's page limit");
                limit
            }
            _ => pages,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::batch::AbortReason;
    use crate::fetch::error::RawFailure;
    use crate::fetch::page::PageResult;

    /// Numbered items out of `total`; pages listed in `failures` fail with the given status.
    struct NumberedSource {
        total: Option<u64>,
        failures: HashMap<u32, u16>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl NumberedSource {
        fn new(total: Option<u64>) -> Self {
            Self {
                total,
                failures: HashMap::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, page: u32, status: u16) -> Self {
            self.failures.insert(page, status);
            self
        }

        fn pages_requested(&self) -> Vec<u32> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.page_number)
                .collect()
        }
    }

    #[async_trait]
    impl PageSource for NumberedSource {
        type Item = u64;

        async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult<u64>, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(status) = self.failures.get(&request.page_number) {
                return Err(RawFailure::http(*status, None).into());
            }
            let start = u64::from(request.page_number - 1) * u64::from(request.page_size);
            let end = (start + u64::from(request.page_size)).min(self.total.unwrap_or(u64::MAX));
            let page = PageResult::new((start..end).collect());
            Ok(match (request.page_number, self.total) {
                (1, Some(total)) => page.with_total_count(total),
                _ => page,
            })
        }
    }

    fn quick_options() -> BatchOptions {
        BatchOptions::default().with_request_interval(Duration::ZERO)
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::no_retry()
    }

    #[tokio::test]
    async fn test_single_page_is_trivially_successful() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(12)));
        let result = fetcher
            .fetch_all(30, 30, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert_eq!(result.items.len(), 12);
        assert_eq!(result.total_requested, 1);
        assert!(result.success);
        assert_eq!(fetcher.source().pages_requested(), vec![1]);
    }

    #[tokio::test]
    async fn test_max_items_bounds_page_plan() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(1000)));
        let result = fetcher
            .fetch_all(95, 30, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert_eq!(fetcher.source().pages_requested(), vec![1, 2, 3, 4]);
        assert_eq!(result.items, (0..95).collect::<Vec<u64>>());
        assert_eq!(result.total_requested, 3);
    }

    #[tokio::test]
    async fn test_missing_total_count_fetches_first_page_only() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(None));
        let result = fetcher
            .fetch_all(100, 10, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert_eq!(result.items.len(), 10);
        assert_eq!(fetcher.source().pages_requested(), vec![1]);
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_max_pages_caps_plan() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(500))).with_max_pages(3);
        let result = fetcher
            .fetch_all(500, 10, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert_eq!(fetcher.source().pages_requested(), vec![1, 2, 3]);
        assert_eq!(result.items.len(), 30);
    }

    #[tokio::test]
    async fn test_first_page_failure_propagates() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(100)).failing(1, 403));
        let error = fetcher
            .fetch_all(100, 10, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Authentication);
        assert_eq!(fetcher.metrics().total_errors, 1);
    }

    #[tokio::test]
    async fn test_zero_page_size_rejected() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(100)));
        let error = fetcher
            .fetch_all(100, 0, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Parameter(ParameterErrorKind::InvalidPage));
        assert!(fetcher.source().pages_requested().is_empty());
    }

    #[tokio::test]
    async fn test_zero_max_items_makes_no_requests() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(100)));
        let result = fetcher
            .fetch_all(0, 10, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert!(result.items.is_empty());
        assert!(result.success);
        assert!(fetcher.source().pages_requested().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let signal = CancellationSignal::new();
        signal.cancel();
        let fetcher =
            PaginatedFetcher::new(NumberedSource::new(Some(100))).with_cancellation(signal);

        let result = fetcher
            .fetch_all(100, 10, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert!(result.items.is_empty());
        assert!(!result.success);
        assert_eq!(result.abort_reason, Some(AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn test_query_forwarded_to_every_page() {
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(25)));
        let query = QueryParams::new().with("genreId", "100283");
        fetcher
            .fetch_all(25, 10, &query, &quick_policy(), &quick_options())
            .await
            .unwrap();

        let requests = fetcher.source().requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.query == query && r.page_size == 10));
    }

    #[tokio::test]
    async fn test_shared_metrics_and_reset() {
        let metrics = Arc::new(MetricsCollector::new());
        let fetcher = PaginatedFetcher::new(NumberedSource::new(Some(20)))
            .with_metrics(Arc::clone(&metrics));
        fetcher
            .fetch_all(20, 10, &QueryParams::new(), &quick_policy(), &quick_options())
            .await
            .unwrap();

        assert_eq!(metrics.snapshot().total_requests, 2);
        fetcher.reset_metrics();
        assert_eq!(fetcher.metrics().total_requests, 0);
    }
}
