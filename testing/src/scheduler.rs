//! Deterministic schedulers for tests.
//!
//! [`VirtualScheduler`] keeps a queue of pending work ordered by fire time and
//! only moves time when told to. [`ImmediateScheduler`] ignores time and runs
//! work as soon as it is scheduled.

use crate::mocks::default_epoch;
use chrono::{DateTime, Utc};
use ripple_core::scheduler::to_time_delta;
use ripple_core::{Clock, RepeatingWork, Scheduled, Scheduler, SchedulerRef, Work};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound on work items [`VirtualScheduler::run`] fires in one call
const MAX_RUN_STEPS: usize = 100_000;

/// Shortest repeat interval; a zero interval would never let time move
const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(1);

enum Job {
    Once(Work),
    Repeating {
        interval: Duration,
        work: RepeatingWork,
    },
}

struct Record {
    job: Job,
    handle: Scheduled,
}

/// Ordered by fire offset, then by registration order
type Key = (Duration, u64);

struct Queue {
    epoch: DateTime<Utc>,
    now: Duration,
    next_seq: u64,
    records: BTreeMap<Key, Record>,
}

impl Queue {
    fn push(&mut self, at: Duration, job: Job, handle: Scheduled) {
        self.records.retain(|_, record| !record.handle.is_disposed());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert((at, seq), Record { job, handle });
    }

    /// Remove the earliest live record due at or before `target`
    fn pop_due(&mut self, target: Duration) -> Option<(Duration, Record)> {
        loop {
            let entry = self.records.first_entry()?;
            if entry.key().0 > target {
                return None;
            }
            let ((at, _), record) = entry.remove_entry();
            if !record.handle.is_disposed() {
                self.now = self.now.max(at);
                return Some((at, record));
            }
        }
    }
}

/// Scheduler whose clock only moves when the test advances it.
///
/// Work due at the same instant fires in registration order. Work scheduled
/// by fired work at or before the advance target fires within the same
/// advance. Cloning shares the queue and the clock.
///
/// # Example
///
/// ```
/// use ripple_core::Scheduler;
/// use ripple_testing::VirtualScheduler;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
///
/// let scheduler = VirtualScheduler::new();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
/// scheduler.schedule(Duration::from_secs(1), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// scheduler.advance(Duration::from_millis(999));
/// assert!(!fired.load(Ordering::SeqCst));
///
/// scheduler.advance(Duration::from_millis(1));
/// assert!(fired.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct VirtualScheduler {
    queue: Arc<Mutex<Queue>>,
}

impl VirtualScheduler {
    /// Virtual scheduler starting at 2025-01-01T00:00:00Z
    #[must_use]
    pub fn new() -> Self {
        Self::with_epoch(default_epoch())
    }

    /// Virtual scheduler starting at `epoch`
    #[must_use]
    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue {
                epoch,
                now: Duration::ZERO,
                next_seq: 0,
                records: BTreeMap::new(),
            })),
        }
    }

    /// Share as a [`SchedulerRef`]
    #[must_use]
    pub fn shared(&self) -> SchedulerRef {
        Arc::new(self.clone())
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time elapsed since the epoch
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.queue().now
    }

    /// Move the clock forward by `by`, firing everything that becomes due
    pub fn advance(&self, by: Duration) {
        let target = self.elapsed().saturating_add(by);
        self.advance_to_offset(target);
    }

    /// Move the clock forward to `instant`; instants in the past only fire
    /// work that is already due
    pub fn advance_to(&self, instant: DateTime<Utc>) {
        let (epoch, now) = {
            let queue = self.queue();
            (queue.epoch, queue.now)
        };
        let target = (instant - epoch).to_std().unwrap_or(Duration::ZERO);
        self.advance_to_offset(target.max(now));
    }

    /// Fire work until nothing is pending.
    ///
    /// Repeating work keeps rescheduling itself, so this stops after a large
    /// fixed number of steps while a repeating item is still active.
    pub fn run(&self) {
        for _ in 0..MAX_RUN_STEPS {
            let next = {
                let mut queue = self.queue();
                queue.records.retain(|_, record| !record.handle.is_disposed());
                queue.records.keys().next().map(|(at, _)| *at)
            };
            let Some(at) = next else {
                return;
            };
            let now = self.elapsed();
            self.advance_to_offset(at.max(now));
        }
        tracing::warn!(
            steps = MAX_RUN_STEPS,
            "VirtualScheduler::run stopped with work still pending"
        );
    }

    /// Number of scheduled items not yet fired or disposed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue()
            .records
            .values()
            .filter(|record| !record.handle.is_disposed())
            .count()
    }

    fn advance_to_offset(&self, target: Duration) {
        loop {
            let due = self.queue().pop_due(target);
            let Some((at, record)) = due else {
                break;
            };

            match record.job {
                Job::Once(work) => work(),
                Job::Repeating { interval, mut work } => {
                    work();
                    if !record.handle.is_disposed() {
                        self.queue().push(
                            at.saturating_add(interval),
                            Job::Repeating { interval, work },
                            record.handle,
                        );
                    }
                },
            }
        }

        let mut queue = self.queue();
        queue.now = queue.now.max(target);
    }
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualScheduler {
    fn now(&self) -> DateTime<Utc> {
        let queue = self.queue();
        queue.epoch + to_time_delta(queue.now)
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&self, after: Duration, work: Work) -> Scheduled {
        let handle = Scheduled::new();
        let mut queue = self.queue();
        let at = queue.now.saturating_add(after);
        queue.push(at, Job::Once(work), handle.clone());
        handle
    }

    fn schedule_repeating(
        &self,
        after: Duration,
        interval: Duration,
        work: RepeatingWork,
    ) -> Scheduled {
        let handle = Scheduled::new();
        let mut queue = self.queue();
        let at = queue.now.saturating_add(after);
        let interval = interval.max(MIN_REPEAT_INTERVAL);
        queue.push(at, Job::Repeating { interval, work }, handle.clone());
        handle
    }
}

impl std::fmt::Debug for VirtualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue();
        f.debug_struct("VirtualScheduler")
            .field("epoch", &queue.epoch)
            .field("elapsed", &queue.now)
            .field("queued", &queue.records.len())
            .finish()
    }
}

/// Scheduler that runs work synchronously at schedule time.
///
/// Delays are ignored and repeating work fires exactly once. The clock is
/// fixed.
#[derive(Debug, Clone)]
pub struct ImmediateScheduler {
    now: DateTime<Utc>,
}

impl ImmediateScheduler {
    /// Immediate scheduler reporting 2025-01-01T00:00:00Z
    #[must_use]
    pub fn new() -> Self {
        Self::at(default_epoch())
    }

    /// Immediate scheduler reporting `now`
    #[must_use]
    pub const fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Share as a [`SchedulerRef`]
    #[must_use]
    pub fn shared(&self) -> SchedulerRef {
        Arc::new(self.clone())
    }
}

impl Default for ImmediateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ImmediateScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, _after: Duration, work: Work) -> Scheduled {
        work();
        Scheduled::new()
    }

    fn schedule_repeating(
        &self,
        _after: Duration,
        _interval: Duration,
        mut work: RepeatingWork,
    ) -> Scheduled {
        work();
        Scheduled::new()
    }
}
