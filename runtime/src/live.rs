//! Wall-clock scheduler backed by tokio timers.

use crate::error::SchedulerError;
use chrono::{DateTime, Utc};
use ripple_core::{Clock, RepeatingWork, Scheduled, Scheduler, SchedulerRef, Work};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

/// Scheduler running work on a tokio runtime.
///
/// Every scheduled item is a spawned task sleeping until its deadline;
/// disposing the returned [`Scheduled`] aborts the task.
#[derive(Clone, Debug)]
pub struct LiveScheduler {
    handle: Handle,
}

impl LiveScheduler {
    /// Scheduler spawning onto `handle`
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler for the runtime the caller is running on.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NoRuntime`] outside a tokio runtime.
    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| SchedulerError::NoRuntime)
    }

    /// Share as a [`SchedulerRef`] for environments and effects
    #[must_use]
    pub fn shared(self) -> SchedulerRef {
        Arc::new(self)
    }
}

impl Clock for LiveScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Scheduler for LiveScheduler {
    fn schedule(&self, after: Duration, work: Work) -> Scheduled {
        let scheduled = Scheduled::new();
        let guard = scheduled.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            if !guard.is_disposed() {
                work();
            }
        });
        scheduled.with_on_dispose(move || task.abort())
    }

    fn schedule_repeating(
        &self,
        after: Duration,
        interval: Duration,
        mut work: RepeatingWork,
    ) -> Scheduled {
        let scheduled = Scheduled::new();
        let guard = scheduled.clone();
        // tokio rejects a zero period
        let period = interval.max(Duration::from_millis(1));
        let task = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + after;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if guard.is_disposed() {
                    break;
                }
                work();
            }
        });
        scheduled.with_on_dispose(move || task.abort())
    }
}
