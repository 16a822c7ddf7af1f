//! Resilient paginated fetch engine.
//!
//! This module turns an unreliable, rate-limited page source into a single
//! ordered result with partial-failure reporting.
//!
//! # Features
//!
//! - Classification of HTTP, transport, and payload failures into [`ErrorKind`]s
//! - Retry with exponential backoff and jitter ([`RetryPolicy`], [`RetryExecutor`])
//! - Batch aggregation with success-rate and early-abort rules ([`BatchAggregator`])
//! - Request pacing and optional bounded concurrency
//! - Cooperative cancellation with deadlines ([`CancellationSignal`])
//! - Per-fetcher request and error counters ([`MetricsCollector`])
//!
//! # Example
//!
//! ```no_run
//! use rankfetch_core::fetch::{BatchOptions, PaginatedFetcher, QueryParams, RetryPolicy};
//! use rankfetch_core::source::{HttpPageSource, HttpSourceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpSourceConfig::default().with_application_id("my-app-id");
//! let fetcher = PaginatedFetcher::new(HttpPageSource::new(config)?);
//!
//! let query = QueryParams::new().with("genreId", "100283");
//! let result = fetcher
//!     .fetch_all(90, 30, &query, &RetryPolicy::default(), &BatchOptions::default())
//!     .await?;
//! println!("{} items, success={}", result.items.len(), result.success);
//! # Ok(())
//! # }
//! ```

mod batch;
mod cancel;
pub mod classify;
pub mod constants;
mod error;
mod metrics;
mod pacer;
mod page;
mod paginated;
mod retry;

pub use batch::{AbortReason, BatchAggregator, BatchOptions, BatchResult};
pub use cancel::{CancellationSignal, Cancelled};
pub use classify::{PageBody, classify, classify_response, parse_response};
pub use error::{ErrorKind, FetchError, ParameterErrorKind, RawFailure};
pub use metrics::{ErrorMetrics, MetricsCollector, MetricsWindow};
pub use pacer::Pacer;
pub use page::{PageRequest, PageResult, PageSource, QueryParams};
pub use paginated::PaginatedFetcher;
pub use retry::{
    RetryError, RetryEvent, RetryExecutor, RetryObserver, RetryPolicy, TracingRetryObserver,
};
