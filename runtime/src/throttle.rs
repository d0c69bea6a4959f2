//! Per-identifier throttle bookkeeping.
//!
//! Remembers, for every throttle id, when a value was last emitted and which
//! suppressed value is waiting to go out. Owned by the Store alongside the
//! Cancellation Registry.

use chrono::{DateTime, Utc};
use ripple_core::EffectId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Entry<A> {
    last_emitted: DateTime<Utc>,
    pending: Option<A>,
}

/// What to do with a value arriving at a throttle
#[derive(Debug, PartialEq, Eq)]
pub enum Decision<A> {
    /// Emit this value now
    Emit(A),
    /// Emit this value once `after` elapses
    Defer {
        /// The value to emit
        value: A,
        /// Remaining time until the interval since the last emission elapses
        after: Duration,
    },
}

/// Throttle state keyed by [`EffectId`]
pub struct ThrottleTable<A> {
    entries: Arc<Mutex<HashMap<EffectId, Entry<A>>>>,
}

impl<A> Clone for ThrottleTable<A> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<A> Default for ThrottleTable<A> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<A: Clone> ThrottleTable<A> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<EffectId, Entry<A>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide how `value` arriving at `now` is handled under `id`.
    pub fn offer(
        &self,
        id: &EffectId,
        value: A,
        now: DateTime<Utc>,
        interval: Duration,
        latest: bool,
    ) -> Decision<A> {
        let mut entries = self.entries();

        let Some(entry) = entries.get_mut(id) else {
            entries.insert(
                id.clone(),
                Entry {
                    last_emitted: now,
                    pending: None,
                },
            );
            return Decision::Emit(value);
        };

        let candidate = if latest {
            value
        } else {
            entry.pending.take().unwrap_or(value)
        };

        let elapsed = (now - entry.last_emitted).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= interval {
            entry.last_emitted = now;
            entry.pending = None;
            return Decision::Emit(candidate);
        }

        entry.pending = Some(candidate.clone());
        Decision::Defer {
            value: candidate,
            after: interval - elapsed,
        }
    }

    /// Record that a deferred value went out at `now`
    pub fn emitted(&self, id: &EffectId, now: DateTime<Utc>) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.last_emitted = now;
            entry.pending = None;
        }
    }

    /// Last emission time under `id`
    #[must_use]
    pub fn last_emitted(&self, id: &EffectId) -> Option<DateTime<Utc>> {
        self.entries().get(id).map(|entry| entry.last_emitted)
    }

    /// Forget everything recorded for `id`
    pub fn reset(&self, id: &EffectId) {
        self.entries().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn test_first_value_passes() {
        let table = ThrottleTable::new();
        let id = EffectId::from("t");
        assert_eq!(
            table.offer(&id, 1, epoch(), Duration::from_secs(1), true),
            Decision::Emit(1)
        );
        assert_eq!(table.last_emitted(&id), Some(epoch()));
    }

    #[test]
    fn test_latest_replaces_pending() {
        let table = ThrottleTable::new();
        let id = EffectId::from("t");
        let interval = Duration::from_secs(1);
        let _ = table.offer(&id, 1, epoch(), interval, true);

        let later = epoch() + TimeDelta::milliseconds(200);
        assert_eq!(
            table.offer(&id, 2, later, interval, true),
            Decision::Defer {
                value: 2,
                after: Duration::from_millis(800)
            }
        );
        assert_eq!(
            table.offer(&id, 3, later, interval, true),
            Decision::Defer {
                value: 3,
                after: Duration::from_millis(800)
            }
        );
    }

    #[test]
    fn test_first_keeps_earliest_pending() {
        let table = ThrottleTable::new();
        let id = EffectId::from("t");
        let interval = Duration::from_secs(1);
        let _ = table.offer(&id, 1, epoch(), interval, false);

        let later = epoch() + TimeDelta::milliseconds(500);
        let _ = table.offer(&id, 2, later, interval, false);
        assert_eq!(
            table.offer(&id, 3, later, interval, false),
            Decision::Defer {
                value: 2,
                after: Duration::from_millis(500)
            }
        );
    }

    #[test]
    fn test_value_after_interval_passes() {
        let table = ThrottleTable::new();
        let id = EffectId::from("t");
        let interval = Duration::from_secs(1);
        let _ = table.offer(&id, 1, epoch(), interval, true);

        let later = epoch() + TimeDelta::seconds(2);
        assert_eq!(table.offer(&id, 2, later, interval, true), Decision::Emit(2));
        assert_eq!(table.last_emitted(&id), Some(later));
    }
}
