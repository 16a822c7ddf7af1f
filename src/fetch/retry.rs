//! Retry with exponential backoff for fallible page fetches.
//!
//! [`RetryPolicy`] is pure configuration; [`RetryExecutor`] runs one operation
//! under a policy, classifying each failure and sleeping between attempts.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(k) = min(initial_delay * backoff_factor^k, max_delay)    k = 0, 1, 2, ...
//! ```
//!
//! With jitter enabled the delay is scaled by a random factor in `[0.9, 1.1]`.
//! With the defaults, delays are approximately 1s, 2s, 4s.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rankfetch_core::fetch::{FetchError, MetricsCollector, RetryExecutor, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::default().with_initial_delay(Duration::from_millis(200));
//! let metrics = Arc::new(MetricsCollector::new());
//! let executor = RetryExecutor::new(policy, metrics);
//!
//! let value = executor
//!     .execute(|| async { Ok::<_, FetchError>(42) })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::cancel::{CancellationSignal, Cancelled};
use super::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
    JITTER_RATIO,
};
use super::error::FetchError;
use super::metrics::MetricsCollector;

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (so at most 4 attempts)
/// - `initial_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `backoff_factor`: 2.0
/// - `jitter`: enabled
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    max_retries: u32,

    /// Delay before the first retry.
    initial_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied per retry, never below 1.
    backoff_factor: f64,

    /// Whether delays are randomly perturbed.
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Retries after the initial attempt (0 disables retrying)
    /// * `initial_delay` - Delay before the first retry
    /// * `max_delay` - Cap on any single delay
    /// * `backoff_factor` - Growth per retry; values below 1 (or NaN) become 1
    /// * `jitter` - Scale each delay by a random factor in `[0.9, 1.1]`
    #[must_use]
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter: bool,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_factor: sanitize_factor(backoff_factor),
            jitter,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Returns a copy with a different retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns a copy with a different initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Returns a copy with a different delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Returns a copy with a different backoff factor (clamped to at least 1).
    #[must_use]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = sanitize_factor(backoff_factor);
        self
    }

    /// Returns a copy with jitter switched on or off.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retries allowed after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed, initial attempt included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap on any single delay.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor per retry.
    #[must_use]
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Whether jitter is applied.
    #[must_use]
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// The un-jittered delay after the failed attempt with zero-based index `attempt`.
    ///
    /// Formula: `min(initial_delay * backoff_factor^attempt, max_delay)`
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        // Seconds near `Duration::MAX` round past it as f64.
        Duration::try_from_secs_f64(capped_secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// The delay to wait after the failed attempt with zero-based index `attempt`,
    /// jitter included when enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
    }
}

fn sanitize_factor(factor: f64) -> f64 {
    if factor.is_nan() { 1.0 } else { factor.max(1.0) }
}

/// Information about a retry, passed to a [`RetryObserver`].
#[derive(Debug, Clone)]
pub struct RetryEvent<'a> {
    /// Zero-based index of the attempt that just failed.
    pub attempt: u32,
    /// Total attempts allowed by the policy.
    pub max_attempts: u32,
    /// How long the executor will wait before the next attempt.
    pub delay: Duration,
    /// The classified failure.
    pub error: &'a FetchError,
}

/// Receives retry lifecycle events from a [`RetryExecutor`].
///
/// Implementations must be cheap; they are called inline between attempts.
pub trait RetryObserver: Send + Sync {
    /// Called before the executor waits and re-attempts.
    fn on_retry(&self, event: &RetryEvent<'_>);

    /// Called when the executor gives up on an operation.
    fn on_give_up(&self, attempts: u32, error: &FetchError) {
        let _ = (attempts, error);
    }
}

/// Default observer that reports retries through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, event: &RetryEvent<'_>) {
        info!(
            attempt = event.attempt + 1,
            max_attempts = event.max_attempts,
            delay_ms = event.delay.as_millis(),
            kind = %event.error.kind(),
            status = ?event.error.status_code(),
            error = %event.error,
            "retrying page fetch"
        );
    }

    fn on_give_up(&self, attempts: u32, error: &FetchError) {
        warn!(
            attempts,
            kind = %error.kind(),
            retryable = error.is_retryable(),
            error = %error,
            "page fetch failed"
        );
    }
}

/// Why [`RetryExecutor::execute`] did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// The operation failed and retrying stopped; carries the last classified error.
    #[error(transparent)]
    Failed(#[from] FetchError),

    /// The cancellation signal fired before the operation succeeded.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for RetryError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
///
/// Each attempt is counted in the shared [`MetricsCollector`]; each failed
/// attempt is recorded there as an error. Backoff waits and in-flight attempts
/// are abandoned as soon as the cancellation signal fires.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    observer: Arc<dyn RetryObserver>,
    signal: CancellationSignal,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("cancelled", &self.signal.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates an executor that logs retries through `tracing` and is never cancelled.
    #[must_use]
    pub fn new(policy: RetryPolicy, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            policy,
            metrics,
            observer: Arc::new(TracingRetryObserver),
            signal: CancellationSignal::new(),
        }
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

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The cancellation signal in use.
    #[must_use]
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Failed`] with the last classified error when the
    /// failure is not retryable or attempts are exhausted, and
    /// [`RetryError::Cancelled`] when the cancellation signal fires.
    #[instrument(level = "debug", skip_all, fields(max_attempts = self.policy.max_attempts()))]
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<FetchError>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;

        loop {
            if self.signal.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            debug!(attempt = attempt + 1, max_attempts, "attempting operation");
            self.metrics.record_request();

            let outcome = tokio::select! {
                biased;
                () = self.signal.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation() => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error.into(),
            };
            self.metrics.record_error(&error);

            let is_last = attempt + 1 >= max_attempts;
            if !error.is_retryable() || is_last {
                debug!(
                    attempt = attempt + 1,
                    retryable = error.is_retryable(),
                    "not retrying"
                );
                self.observer.on_give_up(attempt + 1, &error);
                return Err(RetryError::Failed(error));
            }

            let delay = self.policy.delay_for_attempt(attempt);
            self.observer.on_retry(&RetryEvent {
                attempt,
                max_attempts,
                delay,
                error: &error,
            });

            self.signal.sleep(delay).await?;
            attempt += 1;
        }
    }
}
