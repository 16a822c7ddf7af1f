//! Cooperative cancellation for fetch runs.
//!
//! A [`CancellationSignal`] fires either when [`cancel`](CancellationSignal::cancel)
//! is called or when its optional deadline passes. Clones share state, so the
//! caller keeps one clone to trigger and hands another to the fetcher.
//!
//! ```
//! use std::time::Duration;
//! use rankfetch_core::fetch::CancellationSignal;
//!
//! # async fn example() {
//! let signal = CancellationSignal::with_timeout(Duration::from_secs(60));
//! let trigger = signal.clone();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     trigger.cancel();
//! });
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Returned when a wait was cut short by a cancellation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    deadline: Option<Instant>,
}

/// Shared cancellation flag with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl CancellationSignal {
    /// Creates a signal that only fires on [`cancel`](Self::cancel).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a signal that also fires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Inner::default()
            }),
        }
    }

    /// Creates a signal that also fires once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            debug!("cancellation requested");
        }
        self.inner.notify.notify_waiters();
    }

    /// The deadline, if one was configured.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns true once the signal has fired or the deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Completes when the signal fires.
    pub async fn cancelled(&self) {
        let flag = async {
            loop {
                // Register before checking so a concurrent cancel() is not missed.
                let notified = self.inner.notify.notified();
                if self.inner.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        };

        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = flag => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }

    /// Sleeps for `duration` unless the signal fires first.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the signal fired before or during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
