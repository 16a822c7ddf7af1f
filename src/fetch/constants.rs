//! Default values for retry, batch, and pacing behavior.

use std::time::Duration;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (1 second).
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Default cap on any single backoff delay (30 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default backoff multiplier (doubles each retry).
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Jitter scales a backoff delay by a factor drawn from `[1 - ratio, 1 + ratio]`.
pub const JITTER_RATIO: f64 = 0.1;

/// Default fraction of operations that must succeed for a batch to count as successful.
pub const DEFAULT_MIN_SUCCESS_RATE: f64 = 0.8;

/// Default run of back-to-back failed operations that aborts a batch.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Default minimum spacing between request starts (one request per second).
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of page operations in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Upper bound for the concurrency setting.
pub const MAX_CONCURRENCY: usize = 16;

/// Warning threshold for cumulative pacing delay within one batch (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);
