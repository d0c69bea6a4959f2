//! # Ripple Testing
//!
//! Testing utilities and helpers for the Ripple architecture.
//!
//! This crate provides:
//! - Deterministic schedulers ([`VirtualScheduler`], [`ImmediateScheduler`])
//! - An exhaustive [`TestStore`]
//! - A Given-When-Then [`ReducerTest`] builder and effect assertions
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use ripple_testing::{TestStore, VirtualScheduler};
//! use std::time::Duration;
//!
//! #[test]
//! fn test_search_is_debounced() {
//!     let scheduler = VirtualScheduler::new();
//!     let mut store = TestStore::new(SearchState::default(), SearchReducer, env(&scheduler));
//!
//!     store.send(SearchAction::QueryChanged("ru".into()), |s| s.query = "ru".into());
//!     store.send(SearchAction::QueryChanged("rust".into()), |s| s.query = "rust".into());
//!
//!     scheduler.advance(Duration::from_millis(300));
//!     store.receive(SearchAction::Search, |_| {});
//!     store.finish();
//! }
//! ```

use chrono::{DateTime, Utc};
use ripple_core::Clock;

/// Deterministic schedulers
pub mod scheduler;

/// Exhaustive test store
pub mod test_store;

/// Reducer test builder and effect assertions
pub mod reducer_test;

/// Mock implementations of environment dependencies.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;

    /// 2025-01-01T00:00:00Z as seconds since the Unix epoch
    const DEFAULT_EPOCH_SECONDS: i64 = 1_735_689_600;

    /// The instant virtual and fixed clocks start at (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn default_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(DEFAULT_EPOCH_SECONDS)
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_testing::mocks::FixedClock;
    /// use ripple_core::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(default_epoch())
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly `tracing` subscriber.
    ///
    /// Honours `RUST_LOG`, defaulting to `warn`. Safe to call from every
    /// test; only the first call installs anything.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::time::Duration;

    /// Gaps between consecutive events, each at most `max_millis` long
    pub fn gaps(max_millis: u64, max_len: usize) -> impl Strategy<Value = Vec<Duration>> {
        vec((0..=max_millis).prop_map(Duration::from_millis), 1..=max_len)
    }

    /// Running totals of `gaps`: the instant of each event after start
    #[must_use]
    pub fn instants(gaps: &[Duration]) -> Vec<Duration> {
        gaps.iter()
            .scan(Duration::ZERO, |now, gap| {
                *now += *gap;
                Some(*now)
            })
            .collect()
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, default_epoch, test_clock};
pub use reducer_test::{ReducerTest, assertions};
pub use scheduler::{ImmediateScheduler, VirtualScheduler};
pub use test_store::TestStore;
