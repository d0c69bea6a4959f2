//! Integration tests for effects driven by the tokio runtime
//!
//! Covers future and stream effects, failure routing, action observation and
//! the live scheduler. Time-sensitive tests run with tokio's clock paused so
//! sleeps resolve instantly and deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use ripple_core::{Effect, Reducer, SchedulerRef, SmallVec, smallvec};
use ripple_runtime::{LiveScheduler, Store, StoreError};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Fetch,
    FetchViaResult,
    FetchBroken,
    FetchRecovered,
    Fetched(u32),
    FetchFailed(String),
    Watch,
    StartTicker,
    StopTicker,
    Item(u32),
    Hang,
    TextChanged(String),
    Committed(String),
}

#[derive(Debug, Clone, Default)]
struct State {
    value: u32,
    errors: Vec<String>,
    items: Vec<u32>,
    committed: Vec<String>,
}

struct Env {
    scheduler: SchedulerRef,
}

struct AsyncReducer;

impl Reducer for AsyncReducer {
    type State = State;
    type Action = Action;
    type Environment = Env;

    fn reduce(
        &self,
        state: &mut State,
        action: Action,
        env: &Env,
    ) -> SmallVec<[Effect<Action>; 4]> {
        match action {
            Action::Fetch => smallvec![Effect::future(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(Action::Fetched(7))
            })],
            Action::FetchViaResult => smallvec![Effect::result(
                async { Err::<u32, String>("not found".into()) },
                |result| match result {
                    Ok(value) => Action::Fetched(value),
                    Err(error) => Action::FetchFailed(error),
                },
            )],
            Action::FetchBroken => smallvec![Effect::try_future(async {
                Err::<Option<Action>, _>("db down")
            })],
            Action::FetchRecovered => smallvec![
                Effect::try_future(async { Err::<Option<Action>, _>("db down") })
                    .catch(|error| Action::FetchFailed(error.to_string()))
            ],
            Action::Fetched(value) => {
                state.value = value;
                smallvec![Effect::None]
            },
            Action::FetchFailed(error) => {
                state.errors.push(error);
                smallvec![Effect::None]
            },
            Action::Watch => smallvec![Effect::stream(async_stream::stream! {
                for item in 1..=3 {
                    tokio::task::yield_now().await;
                    yield Action::Item(item);
                }
            })],
            Action::StartTicker => smallvec![
                Effect::stream(async_stream::stream! {
                    let mut item = 0;
                    loop {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        item += 1;
                        yield Action::Item(item);
                    }
                })
                .cancellable("ticker", true)
            ],
            Action::StopTicker => smallvec![Effect::cancel("ticker")],
            Action::Item(item) => {
                state.items.push(item);
                smallvec![Effect::None]
            },
            Action::Hang => smallvec![Effect::future(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Some(Action::Fetched(0))
            })],
            Action::TextChanged(text) => smallvec![Effect::just(Action::Committed(text)).debounce(
                "search",
                Duration::from_millis(300),
                env.scheduler.clone(),
            )],
            Action::Committed(text) => {
                state.committed.push(text);
                smallvec![Effect::None]
            },
        }
    }
}

type AsyncStore = Store<State, Action, Env, AsyncReducer>;

fn setup() -> AsyncStore {
    let scheduler = LiveScheduler::current().unwrap().shared();
    Store::new(State::default(), AsyncReducer, Env { scheduler })
}

// ============================================================================
// Futures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_future_result_is_fed_back() {
    let store = setup();

    let received = store
        .send_and_wait_for(
            Action::Fetch,
            |action| matches!(action, Action::Fetched(_)),
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(assert_ok!(received), Action::Fetched(7));
    assert_eq!(store.state(|s| s.value), 7);
    assert_eq!(store.in_flight_effects(), 0);
}

#[tokio::test]
async fn test_result_maps_error_into_action() {
    let store = setup();

    let received = store
        .send_and_wait_for(
            Action::FetchViaResult,
            |action| matches!(action, Action::FetchFailed(_)),
            Duration::from_secs(1),
        )
        .await;

    assert_eq!(assert_ok!(received), Action::FetchFailed("not found".into()));
    assert!(store.dead_letters().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unhandled_failure_is_dead_lettered() {
    let store = setup();

    store.send(Action::FetchBroken);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let dead_letters = store.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    let letter = dead_letters.peek().unwrap();
    assert!(letter.reason.contains("db down"), "reason: {}", letter.reason);
    assert_eq!(store.in_flight_effects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caught_failure_becomes_action() {
    let store = setup();

    store.send(Action::FetchRecovered);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(store.dead_letters().is_empty());
    assert_eq!(store.state(|s| s.errors.len()), 1);
    assert!(store.state(|s| s.errors[0].contains("db down")));
}

// ============================================================================
// Streams
// ============================================================================

#[tokio::test]
async fn test_stream_items_arrive_in_order() {
    let store = setup();

    let last = store
        .send_and_wait_for(
            Action::Watch,
            |action| action == &Action::Item(3),
            Duration::from_secs(1),
        )
        .await;

    assert_ok!(last);
    assert_eq!(store.state(|s| s.items.clone()), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_stream_stops_emitting() {
    let store = setup();

    store.send(Action::StartTicker);
    tokio::time::sleep(Duration::from_millis(35)).await;
    assert_eq!(store.state(|s| s.items.clone()), vec![1, 2, 3]);
    assert!(store.registry().is_active(&"ticker".into()));

    store.send(Action::StopTicker);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.state(|s| s.items.len()), 3);
    assert!(store.registry().is_empty());
    assert_eq!(store.in_flight_effects(), 0);
}

// ============================================================================
// Action observation
// ============================================================================

#[tokio::test]
async fn test_action_observer_sees_effect_actions_in_order() {
    let store = setup();
    let mut observer = store.subscribe_actions();

    store.send(Action::Watch);
    let mut seen = Vec::new();
    while seen.len() < 4 {
        seen.push(observer.recv().await.unwrap());
    }

    assert_eq!(
        seen,
        vec![
            Action::Watch,
            Action::Item(1),
            Action::Item(2),
            Action::Item(3)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_and_wait_for_times_out() {
    let store = setup();

    let result = store
        .send_and_wait_for(
            Action::Hang,
            |action| matches!(action, Action::Fetched(_)),
            Duration::from_millis(100),
        )
        .await;

    assert_eq!(assert_err!(result), StoreError::Timeout);
    store.shutdown();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_running_futures() {
    let store = setup();

    store.send(Action::Hang);
    tokio::task::yield_now().await;
    assert_eq!(store.in_flight_effects(), 1);

    store.shutdown();
    assert_eq!(store.in_flight_effects(), 0);
    assert_eq!(assert_err!(store.try_send(Action::Fetch)), StoreError::ShutdownInProgress);

    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(store.state(|s| s.value), 0);
}

// ============================================================================
// Live scheduler
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_live_scheduler_debounce() {
    let store = setup();

    store.send(Action::TextChanged("a".into()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.send(Action::TextChanged("ab".into()));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.state(|s| s.committed.is_empty()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.state(|s| s.committed.clone()), vec!["ab".to_string()]);
    assert!(store.registry().is_empty());
}
