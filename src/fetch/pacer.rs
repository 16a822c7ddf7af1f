//! Request pacing for a single upstream.
//!
//! [`Pacer`] enforces a minimum interval between the *starts* of consecutive
//! requests. The first request proceeds immediately; later ones wait out
//! whatever remains of the interval since the previous start.
//!
//! ```
//! use std::time::Duration;
//! use rankfetch_core::fetch::{CancellationSignal, Pacer};
//!
//! # async fn example() {
//! let pacer = Pacer::new(Duration::from_secs(1));
//! let signal = CancellationSignal::new();
//!
//! pacer.acquire(&signal).await.ok(); // immediate
//! pacer.acquire(&signal).await.ok(); // waits about one second
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::cancel::{CancellationSignal, Cancelled};
use super::constants::CUMULATIVE_DELAY_WARNING_THRESHOLD;

/// Minimum-interval pacer shared by the operations of one batch.
///
/// `Pacer` is `Send + Sync`; concurrent callers queue on the inner mutex, so
/// request starts stay spaced even with several operations in flight.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,

    /// Start time of the previous request, `None` until the first one.
    last_start: Mutex<Option<Instant>>,

    /// Total time spent waiting, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl Pacer {
    /// Creates a pacer with the given minimum interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a pacer whose previous request started at `last_start`.
    ///
    /// Used when a request outside the batch (page 1) already went out.
    #[must_use]
    pub fn started_at(interval: Duration, last_start: Instant) -> Self {
        Self {
            last_start: Mutex::new(Some(last_start)),
            ..Self::new(interval)
        }
    }

    /// The configured minimum interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time callers have spent waiting on this pacer.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    /// Waits until the next request may start, then records its start time.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `signal` fires while waiting. The start time is
    /// left untouched in that case.
    #[instrument(level = "debug", skip_all, fields(interval_ms = self.interval.as_millis()))]
    pub async fn acquire(&self, signal: &CancellationSignal) -> Result<(), Cancelled> {
        if signal.is_cancelled() {
            return Err(Cancelled);
        }
        if self.interval.is_zero() {
            return Ok(());
        }

        // Held across the wait so concurrent callers are released one at a time.
        let mut last_start = self.last_start.lock().await;

        if let Some(previous) = *last_start {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let delay = self.interval.saturating_sub(elapsed);
                let cumulative = self.add_cumulative_delay(delay);

                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "pacing request"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "pacing has delayed this batch for a long time; consider fewer pages"
                    );
                }

                signal.sleep(delay).await?;
            }
        } else {
            debug!("first request - no delay");
        }

        *last_start = Some(Instant::now());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self.cumulative_delay_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms;
        Duration::from_millis(total)
    }
}
