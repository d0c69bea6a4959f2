//! # Search Demo
//!
//! A counter with a debounced search box, showing the pieces of the Ripple
//! runtime working together:
//! - Pure state changes (the counter)
//! - Debounced effects: typing only commits a search after a quiet period
//! - Cancel-in-flight: a newer search silences an older request
//! - Timers: a clock ticking on the environment's scheduler
//! - Domain errors mapped into actions
//!
//! The environment carries the [`SearchClient`] and the scheduler, so the
//! same reducer runs against tokio timers in the binary and against a
//! virtual clock in tests.
//!
//! ## Example
//!
//! ```no_run
//! use ripple_runtime::{LiveScheduler, Store};
//! use search_demo::{Catalog, SearchAction, SearchEnvironment, SearchReducer, SearchState};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let env = SearchEnvironment::new(
//!     Arc::new(Catalog::new(["rust", "ruby"])),
//!     LiveScheduler::current()?.shared(),
//! );
//! let store = Store::new(SearchState::default(), SearchReducer, env);
//!
//! store.send(SearchAction::TextChanged("ru".into()));
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use ripple_core::effect::BoxFuture;
use ripple_core::{Effect, Reducer, SchedulerRef, SmallVec, smallvec};
use std::sync::Arc;
use std::time::Duration;

/// Quiet period before typed text is searched
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Spacing of clock ticks
pub const CLOCK_INTERVAL: Duration = Duration::from_secs(1);

/// Identifier of the pending debounce
pub const SEARCH_DEBOUNCE_ID: &str = "search.debounce";

/// Identifier of the running search request
pub const SEARCH_REQUEST_ID: &str = "search.request";

/// Identifier of the clock timer
pub const CLOCK_ID: &str = "clock";

/// Failure reported by a [`SearchClient`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// The backend could not be reached
    #[error("search backend unavailable: {0}")]
    Unavailable(String),
}

/// Backend answering search queries
pub trait SearchClient: Send + Sync {
    /// Entries matching `query`
    fn search(&self, query: &str) -> BoxFuture<Result<Vec<String>, SearchError>>;
}

/// In-memory catalog matched by case-insensitive substring
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<String>,
    latency: Duration,
    online: bool,
}

impl Catalog {
    /// Catalog answering immediately
    pub fn new<I, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
            latency: Duration::ZERO,
            online: true,
        }
    }

    /// Delay every answer by `latency`
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Catalog whose every search fails
    #[must_use]
    pub fn offline() -> Self {
        Self {
            entries: Vec::new(),
            latency: Duration::ZERO,
            online: false,
        }
    }
}

impl SearchClient for Catalog {
    fn search(&self, query: &str) -> BoxFuture<Result<Vec<String>, SearchError>> {
        let needle = query.to_lowercase();
        let matches: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        let latency = self.latency;
        let online = self.online;

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if online {
                Ok(matches)
            } else {
                Err(SearchError::Unavailable("catalog offline".into()))
            }
        })
    }
}

/// Counter and search state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    /// Counter value
    pub count: i64,
    /// Text currently typed
    pub query: String,
    /// Whether a search request is running
    pub searching: bool,
    /// Results of the last completed search
    pub results: Vec<String>,
    /// Failure of the last search, if any
    pub error: Option<String>,
    /// Time of the last clock tick
    pub now: Option<DateTime<Utc>>,
}

/// Everything that can happen to the feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAction {
    /// Add one to the counter
    Increment,
    /// Subtract one from the counter
    Decrement,
    /// The user edited the search text
    TextChanged(String),
    /// The text stayed unchanged for [`SEARCH_DEBOUNCE`]
    SearchCommitted(String),
    /// The search client answered
    SearchResponse(Result<Vec<String>, SearchError>),
    /// Start the clock
    StartClock,
    /// Stop the clock
    StopClock,
    /// The clock ticked
    Tick(DateTime<Utc>),
}

/// Dependencies of [`SearchReducer`]
#[derive(Clone)]
pub struct SearchEnvironment {
    /// Backend answering searches
    pub client: Arc<dyn SearchClient>,
    /// Clock debounces and ticks are measured on
    pub scheduler: SchedulerRef,
}

impl SearchEnvironment {
    /// Environment from a client and a scheduler
    #[must_use]
    pub fn new(client: Arc<dyn SearchClient>, scheduler: SchedulerRef) -> Self {
        Self { client, scheduler }
    }
}

/// Business logic of the search demo
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchReducer;

impl Reducer for SearchReducer {
    type State = SearchState;
    type Action = SearchAction;
    type Environment = SearchEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SearchAction::Increment => {
                state.count += 1;
                smallvec![Effect::None]
            },
            SearchAction::Decrement => {
                state.count -= 1;
                smallvec![Effect::None]
            },
            SearchAction::TextChanged(text) => {
                state.query.clone_from(&text);

                // Clearing the box abandons whatever search was on its way
                if text.trim().is_empty() {
                    state.results.clear();
                    state.error = None;
                    state.searching = false;
                    return smallvec![Effect::cancel_all([SEARCH_DEBOUNCE_ID, SEARCH_REQUEST_ID])];
                }

                smallvec![Effect::just(SearchAction::SearchCommitted(text)).debounce(
                    SEARCH_DEBOUNCE_ID,
                    SEARCH_DEBOUNCE,
                    env.scheduler.clone(),
                )]
            },
            SearchAction::SearchCommitted(query) => {
                tracing::debug!(%query, "Search committed");
                state.searching = true;
                let request = env.client.search(&query);
                smallvec![
                    Effect::result(request, SearchAction::SearchResponse)
                        .cancellable(SEARCH_REQUEST_ID, true)
                ]
            },
            SearchAction::SearchResponse(Ok(results)) => {
                state.searching = false;
                state.error = None;
                state.results = results;
                smallvec![Effect::None]
            },
            SearchAction::SearchResponse(Err(error)) => {
                tracing::warn!(%error, "Search failed");
                state.searching = false;
                state.results.clear();
                state.error = Some(error.to_string());
                smallvec![Effect::None]
            },
            SearchAction::StartClock => smallvec![Effect::timer(
                CLOCK_ID,
                CLOCK_INTERVAL,
                env.scheduler.clone(),
                SearchAction::Tick,
            )],
            SearchAction::StopClock => smallvec![Effect::cancel(CLOCK_ID)],
            SearchAction::Tick(now) => {
                state.now = Some(now);
                smallvec![Effect::None]
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_testing::{ImmediateScheduler, ReducerTest, assertions};
    use ripple_core::EffectId;

    fn env() -> SearchEnvironment {
        SearchEnvironment::new(
            Arc::new(Catalog::new(["Rust", "Ruby"])),
            ImmediateScheduler::new().shared(),
        )
    }

    #[test]
    fn test_increment_and_decrement() {
        ReducerTest::new(SearchReducer)
            .with_env(env())
            .given_state(SearchState::default())
            .when_action(SearchAction::Increment)
            .when_action(SearchAction::Increment)
            .when_action(SearchAction::Decrement)
            .then_state(|state| assert_eq!(state.count, 1))
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_text_changed_debounces_search() {
        ReducerTest::new(SearchReducer)
            .with_env(env())
            .given_state(SearchState::default())
            .when_action(SearchAction::TextChanged("ru".into()))
            .then_state(|state| assert_eq!(state.query, "ru"))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_cancellable_effect(
                    effects,
                    &EffectId::from(SEARCH_DEBOUNCE_ID),
                );
                assertions::assert_has_delay(effects, SEARCH_DEBOUNCE);
            })
            .run();
    }

    #[test]
    fn test_clearing_text_cancels_search() {
        ReducerTest::new(SearchReducer)
            .with_env(env())
            .given_state(SearchState {
                query: "ru".into(),
                searching: true,
                results: vec!["Rust".into()],
                ..SearchState::default()
            })
            .when_action(SearchAction::TextChanged(String::new()))
            .then_state(|state| {
                assert!(state.query.is_empty());
                assert!(state.results.is_empty());
                assert!(!state.searching);
            })
            .then_effects(|effects| {
                assertions::assert_cancels(effects, &EffectId::from(SEARCH_DEBOUNCE_ID));
                assertions::assert_cancels(effects, &EffectId::from(SEARCH_REQUEST_ID));
            })
            .run();
    }

    #[test]
    fn test_committed_search_starts_request() {
        ReducerTest::new(SearchReducer)
            .with_env(env())
            .given_state(SearchState::default())
            .when_action(SearchAction::SearchCommitted("ru".into()))
            .then_state(|state| assert!(state.searching))
            .then_effects(|effects| {
                assertions::assert_has_future_effect(effects);
                assertions::assert_has_cancellable_effect(
                    effects,
                    &EffectId::from(SEARCH_REQUEST_ID),
                );
            })
            .run();
    }

    #[test]
    fn test_failed_response_records_error() {
        ReducerTest::new(SearchReducer)
            .with_env(env())
            .given_state(SearchState {
                searching: true,
                ..SearchState::default()
            })
            .when_action(SearchAction::SearchResponse(Err(SearchError::Unavailable(
                "down".into(),
            ))))
            .then_state(|state| {
                assert!(!state.searching);
                assert_eq!(
                    state.error.as_deref(),
                    Some("search backend unavailable: down")
                );
            })
            .run();
    }

    #[tokio::test]
    async fn test_catalog_matches_case_insensitively() {
        let catalog = Catalog::new(["Rust", "Ruby", "Go"]);
        assert_eq!(
            catalog.search("RU").await,
            Ok(vec!["Rust".to_string(), "Ruby".to_string()])
        );
        assert_eq!(
            Catalog::offline().search("ru").await,
            Err(SearchError::Unavailable("catalog offline".into()))
        );
    }
}
