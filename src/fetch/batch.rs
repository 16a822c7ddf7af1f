//! Partial-success aggregation over a sequence of page operations.
//!
//! [`BatchAggregator::run_batch`] drives each operation through the
//! [`RetryExecutor`], paces request starts, and folds the outcomes into a
//! [`BatchResult`]. Failures are tolerated until an abort condition triggers:
//!
//! - a fatal error kind while `stop_on_fatal_error` is set, or
//! - `max_consecutive_errors` failed operations in a row.
//!
//! With `concurrency > 1`, up to that many operations are in flight at once.
//! Outcomes are still folded by a single owner loop in completion order, and
//! the final items always follow operation order.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::cancel::Cancelled;
use super::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MIN_SUCCESS_RATE,
    DEFAULT_REQUEST_INTERVAL, MAX_CONCURRENCY,
};
use super::error::{ErrorKind, FetchError};
use super::pacer::Pacer;
use super::retry::{RetryError, RetryExecutor};

/// Policy knobs for a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    min_success_rate: f64,
    max_consecutive_errors: u32,
    stop_on_fatal_error: bool,
    request_interval: Duration,
    concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            min_success_rate: DEFAULT_MIN_SUCCESS_RATE,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            stop_on_fatal_error: true,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl BatchOptions {
    /// Returns a copy with a different success threshold, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_min_success_rate(mut self, rate: f64) -> Self {
        self.min_success_rate = if rate.is_nan() {
            DEFAULT_MIN_SUCCESS_RATE
        } else {
            rate.clamp(0.0, 1.0)
        };
        self
    }

    /// Returns a copy with a different consecutive-failure limit.
    #[must_use]
    pub fn with_max_consecutive_errors(mut self, count: u32) -> Self {
        self.max_consecutive_errors = count;
        self
    }

    /// Returns a copy with fatal-error aborts switched on or off.
    #[must_use]
    pub fn with_stop_on_fatal_error(mut self, stop: bool) -> Self {
        self.stop_on_fatal_error = stop;
        self
    }

    /// Returns a copy with a different minimum spacing between request starts.
    #[must_use]
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    /// Returns a copy with a different in-flight limit, clamped to `1..=16`.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    #[must_use]
    pub fn min_success_rate(&self) -> f64 {
        self.min_success_rate
    }

    #[must_use]
    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    #[must_use]
    pub fn stop_on_fatal_error(&self) -> bool {
        self.stop_on_fatal_error
    }

    #[must_use]
    pub fn request_interval(&self) -> Duration {
        self.request_interval
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Why a batch stopped before running every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// An operation failed with a fatal error kind.
    FatalError { kind: ErrorKind },
    /// Too many operations failed back to back.
    ConsecutiveErrors { count: u32 },
    /// The cancellation signal fired.
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalError { kind } => write!(f, "fatal error ({kind})"),
            Self::ConsecutiveErrors { count } => write!(f, "{count} consecutive errors"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    /// Items from successful operations, in operation order.
    pub items: Vec<T>,
    /// Final errors of failed operations, in operation order.
    pub errors: Vec<FetchError>,
    /// Operations that ran to a success or a final failure.
    pub total_requested: usize,
    /// `(total_requested - errors.len()) / total_requested`, 1.0 when nothing ran.
    pub success_rate: f64,
    /// Rate met the threshold and nothing aborted the batch.
    pub success: bool,
    /// Set when the batch stopped early.
    pub abort_reason: Option<AbortReason>,
}

impl<T> BatchResult<T> {
    /// Builds a result, deriving the rate and success flag from the counts.
    pub(crate) fn from_parts(
        items: Vec<T>,
        errors: Vec<FetchError>,
        total_requested: usize,
        min_success_rate: f64,
        abort_reason: Option<AbortReason>,
    ) -> Self {
        let success_rate = success_rate(total_requested, errors.len());
        Self {
            items,
            errors,
            total_requested,
            success_rate,
            success: success_rate >= min_success_rate && abort_reason.is_none(),
            abort_reason,
        }
    }

    /// Empty result for a run cancelled before anything completed.
    pub(crate) fn cancelled() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
            total_requested: 0,
            success_rate: 1.0,
            success: false,
            abort_reason: Some(AbortReason::Cancelled),
        }
    }

    /// Number of operations that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    /// Whether some operations failed or the batch stopped early.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty() || self.abort_reason.is_some()
    }
}

#[allow(clippy::cast_precision_loss)]
fn success_rate(total_requested: usize, failed: usize) -> f64 {
    if total_requested == 0 {
        1.0
    } else {
        total_requested.saturating_sub(failed) as f64 / total_requested as f64
    }
}

/// Runs page operations under retry, pacing, and abort rules.
#[derive(Debug)]
pub struct BatchAggregator {
    executor: RetryExecutor,
    options: BatchOptions,
    pacer: Arc<Pacer>,
}

impl BatchAggregator {
    /// Creates an aggregator with a fresh pacer built from `options`.
    #[must_use]
    pub fn new(executor: RetryExecutor, options: BatchOptions) -> Self {
        let pacer = Arc::new(Pacer::new(options.request_interval()));
        Self {
            executor,
            options,
            pacer,
        }
    }

    /// Replaces the pacer, e.g. one that already saw an earlier request.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Arc<Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// The options in use.
    #[must_use]
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Runs `operations` and aggregates their outcomes.
    ///
    /// Each operation is a retryable closure producing one page of items.
    /// This never fails: per-operation errors end up in
    /// [`BatchResult::errors`], and an early stop in
    /// [`BatchResult::abort_reason`].
    #[instrument(
        level = "debug",
        skip_all,
        fields(operations = operations.len(), concurrency = self.options.concurrency())
    )]
    pub async fn run_batch<T, E, F, Fut>(&self, operations: Vec<F>) -> BatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
        E: Into<FetchError>,
    {
        let total = operations.len();
        let concurrency = self.options.concurrency();
        let signal = self.executor.signal();
        let executor = &self.executor;
        let pacer = &*self.pacer;

        info!(operations = total, concurrency, "starting batch");

        let mut slots: Vec<Option<Vec<T>>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        let mut errors: Vec<(usize, FetchError)> = Vec::new();
        let mut completed = 0usize;
        let mut consecutive_errors = 0u32;
        let mut abort: Option<AbortReason> = None;

        let mut pending = operations.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while abort.is_none() && in_flight.len() < concurrency {
                if signal.is_cancelled() {
                    abort = Some(AbortReason::Cancelled);
                    break;
                }
                let Some((index, operation)) = pending.next() else {
                    break;
                };
                in_flight.push(async move {
                    let outcome = match pacer.acquire(signal).await {
                        Ok(()) => executor.execute(operation).await,
                        Err(Cancelled) => Err(RetryError::Cancelled),
                    };
                    (index, outcome)
                });
            }

            let Some((index, outcome)) = in_flight.next().await else {
                break;
            };

            match outcome {
                Ok(items) => {
                    debug!(operation = index, items = items.len(), "operation succeeded");
                    completed += 1;
                    consecutive_errors = 0;
                    slots[index] = Some(items);
                }
                Err(RetryError::Failed(error)) => {
                    completed += 1;
                    consecutive_errors += 1;
                    warn!(
                        operation = index,
                        kind = %error.kind(),
                        consecutive_errors,
                        error = %error,
                        "operation failed"
                    );
                    if abort.is_none() {
                        abort = self.abort_after_failure(&error, consecutive_errors);
                        if let Some(reason) = abort {
                            warn!(
                                %reason,
                                in_flight = in_flight.len(),
                                "aborting batch"
                            );
                        }
                    }
                    errors.push((index, error));
                }
                Err(RetryError::Cancelled) => {
                    debug!(operation = index, "operation abandoned");
                    if abort.is_none() {
                        abort = Some(AbortReason::Cancelled);
                    }
                }
            }
        }

        errors.sort_by_key(|(index, _)| *index);
        let errors: Vec<FetchError> = errors.into_iter().map(|(_, error)| error).collect();
        let items: Vec<T> = slots.into_iter().flatten().flatten().collect();

        let result = BatchResult::from_parts(
            items,
            errors,
            completed,
            self.options.min_success_rate(),
            abort,
        );

        info!(
            requested = result.total_requested,
            failed = result.failed(),
            success_rate = result.success_rate,
            success = result.success,
            cumulative_pacing_ms = pacer.cumulative_delay().as_millis(),
            "batch finished"
        );

        result
    }

    fn abort_after_failure(
        &self,
        error: &FetchError,
        consecutive_errors: u32,
    ) -> Option<AbortReason> {
        if self.options.stop_on_fatal_error() && error.is_fatal() {
            Some(AbortReason::FatalError { kind: error.kind() })
        } else if consecutive_errors >= self.options.max_consecutive_errors() {
            Some(AbortReason::ConsecutiveErrors {
                count: consecutive_errors,
            })
        } else {
            None
        }
    }
}
