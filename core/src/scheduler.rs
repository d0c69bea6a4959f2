//! Time abstractions: clocks and schedulers.
//!
//! The Scheduler is the only time-related dependency effects need. Production
//! code uses a live scheduler backed by tokio timers; tests use a virtual
//! scheduler that only moves when explicitly advanced.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// struct SystemClock;
/// impl Clock for SystemClock {
///     fn now(&self) -> DateTime<Utc> {
///         Utc::now()
///     }
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// One-shot scheduled work
pub type Work = Box<dyn FnOnce() + Send>;

/// Work fired on every tick of a repeating schedule
pub type RepeatingWork = Box<dyn FnMut() + Send>;

/// Shared scheduler handle, as stored in effects and environments
pub type SchedulerRef = Arc<dyn Scheduler>;

/// Runs work now, after a delay, or repeatedly.
///
/// Implementations must never run work whose [`Scheduled`] handle has been
/// disposed, and must not hold internal locks while running work.
pub trait Scheduler: Clock {
    /// Run `work` once, `after` from now
    fn schedule(&self, after: Duration, work: Work) -> Scheduled;

    /// Run `work` first `after` from now, then every `interval`
    fn schedule_repeating(
        &self,
        after: Duration,
        interval: Duration,
        work: RepeatingWork,
    ) -> Scheduled;
}

/// Handle to scheduled work; [`dispose`](Self::dispose) prevents further firing.
///
/// Clones share the same disposal state, so a scheduler can keep one clone
/// to check before firing while the caller holds another.
#[derive(Clone, Default)]
pub struct Scheduled {
    disposed: Arc<AtomicBool>,
    on_dispose: Arc<Mutex<Option<Work>>>,
}

impl Scheduled {
    /// A live handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach extra cleanup run on the first [`dispose`](Self::dispose)
    #[must_use]
    pub fn with_on_dispose(self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        *self
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(cleanup));
        self
    }

    /// Stop any further firing. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cleanup = self
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduled")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Convert a std duration to a chrono delta, saturating on overflow
#[must_use]
pub fn to_time_delta(duration: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispose_runs_cleanup_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = Scheduled::new().with_on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let observer = handle.clone();

        assert!(!observer.is_disposed());
        handle.dispose();
        handle.dispose();

        assert!(observer.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_to_time_delta_saturates() {
        assert_eq!(
            to_time_delta(Duration::from_millis(1500)),
            chrono::TimeDelta::milliseconds(1500)
        );
        assert_eq!(to_time_delta(Duration::MAX), chrono::TimeDelta::MAX);
    }
}
