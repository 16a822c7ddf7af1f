//! Request and error counters for fetch runs.
//!
//! [`MetricsCollector`] is a plain accumulator: the retry executor records one
//! request per attempt and one error per failed attempt. It has no suspension
//! points and can be shared across tasks behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::debug;

use super::error::{ErrorKind, FetchError};

/// Time span covered by a metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsWindow {
    /// When counting started (construction or last reset).
    pub start: SystemTime,
    /// When the most recent request was recorded.
    pub end: SystemTime,
}

/// Immutable snapshot of collected metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMetrics {
    /// Attempts made.
    pub total_requests: u64,
    /// Failed attempts.
    pub total_errors: u64,
    /// Failed attempts per error kind.
    pub errors_by_kind: BTreeMap<ErrorKind, u64>,
    /// Period the counters cover.
    pub window: MetricsWindow,
}

impl ErrorMetrics {
    /// Fraction of attempts that failed, 0 when nothing was requested.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }

    /// Failed attempts of one kind.
    #[must_use]
    pub fn errors_of(&self, kind: ErrorKind) -> u64 {
        self.errors_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct MetricsState {
    total_requests: u64,
    total_errors: u64,
    errors_by_kind: BTreeMap<ErrorKind, u64>,
    window_start: SystemTime,
    window_end: SystemTime,
}

impl MetricsState {
    fn starting_at(now: SystemTime) -> Self {
        Self {
            total_requests: 0,
            total_errors: 0,
            errors_by_kind: BTreeMap::new(),
            window_start: now,
            window_end: now,
        }
    }
}

/// Thread-safe accumulator of request and error counts.
///
/// With [`with_window`](Self::with_window) the counters roll over: the first
/// record arriving after the window length has elapsed resets them.
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
    window_length: Option<Duration>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Creates a collector whose window starts now and never rolls over.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsState::starting_at(SystemTime::now())),
            window_length: None,
        }
    }

    /// Creates a collector that resets itself every `length`.
    #[must_use]
    pub fn with_window(length: Duration) -> Self {
        Self {
            window_length: Some(length),
            ..Self::new()
        }
    }

    /// Records one request attempt and extends the window end to now.
    pub fn record_request(&self) {
        let now = SystemTime::now();
        let mut state = self.lock_rolled(now);
        state.total_requests += 1;
        state.window_end = now;
    }

    /// Records one failed attempt.
    pub fn record_error(&self, error: &FetchError) {
        let now = SystemTime::now();
        let mut state = self.lock_rolled(now);
        state.total_errors += 1;
        *state.errors_by_kind.entry(error.kind()).or_insert(0) += 1;
    }

    /// Returns a copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> ErrorMetrics {
        let state = self.lock();
        ErrorMetrics {
            total_requests: state.total_requests,
            total_errors: state.total_errors,
            errors_by_kind: state.errors_by_kind.clone(),
            window: MetricsWindow {
                start: state.window_start,
                end: state.window_end,
            },
        }
    }

    /// Zeroes all counters and restarts the window now.
    pub fn reset(&self) {
        *self.lock() = MetricsState::starting_at(SystemTime::now());
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_rolled(&self, now: SystemTime) -> MutexGuard<'_, MetricsState> {
        let mut state = self.lock();
        if let Some(length) = self.window_length {
            let expired = now
                .duration_since(state.window_start)
                .is_ok_and(|elapsed| elapsed >= length);
            if expired {
                debug!(
                    total_requests = state.total_requests,
                    total_errors = state.total_errors,
                    "metrics window elapsed, starting a new one"
                );
                *state = MetricsState::starting_at(now);
            }
        }
        state
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fetch::error::ParameterErrorKind;

    #[test]
    fn test_new_collector_is_empty() {
        let metrics = MetricsCollector::new().snapshot();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.total_errors, 0);
        assert!(metrics.errors_by_kind.is_empty());
        assert!(metrics.error_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_request_and_error() {
        let collector = MetricsCollector::new();
        collector.record_request();
        collector.record_request();
        collector.record_request();
        collector.record_request();
        collector.record_error(&FetchError::new(ErrorKind::Timeout, "t"));

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.total_errors, 1);
        assert!((metrics.error_rate() - 0.25).abs() < f64::EPSILON);
        assert_eq!(metrics.errors_of(ErrorKind::Timeout), 1);
        assert_eq!(metrics.errors_of(ErrorKind::System), 0);
    }

    #[test]
    fn test_errors_grouped_by_kind() {
        let collector = MetricsCollector::new();
        let invalid_page = ErrorKind::Parameter(ParameterErrorKind::InvalidPage);
        collector.record_error(&FetchError::new(ErrorKind::System, "a"));
        collector.record_error(&FetchError::new(ErrorKind::System, "b"));
        collector.record_error(&FetchError::new(invalid_page, "c"));

        let metrics = collector.snapshot();
        assert_eq!(metrics.errors_of(ErrorKind::System), 2);
        assert_eq!(metrics.errors_of(invalid_page), 1);
        assert_eq!(metrics.total_errors, 3);
    }

    #[test]
    fn test_window_end_advances_with_requests() {
        let collector = MetricsCollector::new();
        let before = collector.snapshot();
        std::thread::sleep(Duration::from_millis(5));
        collector.record_request();
        let after = collector.snapshot();
        assert_eq!(before.window.start, after.window.start);
        assert!(after.window.end > before.window.end);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let collector = MetricsCollector::new();
        let snapshot = collector.snapshot();
        collector.record_request();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(collector.snapshot().total_requests, 1);
    }

    #[test]
    fn test_reset_restarts_window() {
        let collector = MetricsCollector::new();
        collector.record_request();
        collector.record_error(&FetchError::new(ErrorKind::Network, "n"));
        let before = collector.snapshot();

        std::thread::sleep(Duration::from_millis(5));
        collector.reset();

        let after = collector.snapshot();
        assert_eq!(after.total_requests, 0);
        assert_eq!(after.total_errors, 0);
        assert!(after.errors_by_kind.is_empty());
        assert!(after.window.start > before.window.start);
    }

    #[test]
    fn test_rolling_window_resets_after_length() {
        let collector = MetricsCollector::with_window(Duration::from_millis(20));
        collector.record_request();
        collector.record_request();
        std::thread::sleep(Duration::from_millis(40));
        collector.record_request();

        assert_eq!(collector.snapshot().total_requests, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let collector = Arc::new(MetricsCollector::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let collector = Arc::clone(&collector);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    collector.record_request();
                    collector.record_error(&FetchError::new(ErrorKind::RateLimit, "429"));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.snapshot();
        assert_eq!(metrics.total_requests, 800);
        assert_eq!(metrics.errors_of(ErrorKind::RateLimit), 800);
    }

    #[test]
    fn test_snapshot_serializes_kind_labels() {
        let collector = MetricsCollector::new();
        collector.record_error(&FetchError::new(ErrorKind::System, "s"));
        let value = serde_json::to_value(collector.snapshot()).unwrap();
        assert_eq!(value["errors_by_kind"]["system"], 1);
    }
}
