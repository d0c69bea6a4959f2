//! Exhaustive store for testing features step by step.
//!
//! A [`TestStore`] runs the reducer and effects like the real store, but
//! instead of feeding effect output back automatically it queues it. Every
//! state change and every received action must be asserted; anything left
//! over when the test ends fails it.

#![allow(clippy::module_name_repetitions)] // TestStore is the natural name
#![allow(clippy::panic)] // Failed expectations are reported by panicking

use ripple_core::{CancellationToken, Completion, Effect, EffectError, Emitter, Event, Reducer};
use ripple_runtime::{CancellationRegistry, EffectExecutor};
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Feedback<A> {
    received: VecDeque<A>,
    in_flight: HashMap<u64, CancellationToken>,
    failures: Vec<EffectError>,
}

/// Test harness asserting every state change and every effect-produced action
///
/// # Example
///
/// ```
/// use ripple_core::{Effect, Reducer, SmallVec, smallvec};
/// use ripple_testing::TestStore;
///
/// #[derive(Clone, Debug, PartialEq)]
/// enum Action {
///     Tap,
///     Tapped,
/// }
///
/// struct Feature;
///
/// impl Reducer for Feature {
///     type State = u32;
///     type Action = Action;
///     type Environment = ();
///
///     fn reduce(&self, taps: &mut u32, action: Action, _env: &()) -> SmallVec<[Effect<Action>; 4]> {
///         match action {
///             Action::Tap => smallvec![Effect::just(Action::Tapped)],
///             Action::Tapped => {
///                 *taps += 1;
///                 smallvec![Effect::None]
///             },
///         }
///     }
/// }
///
/// let mut store = TestStore::new(0, Feature, ());
/// store.send(Action::Tap, |_| {});
/// store.receive(Action::Tapped, |taps| *taps = 1);
/// store.finish();
/// ```
pub struct TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: E,
    state: S,
    executor: EffectExecutor<A>,
    feedback: Arc<Mutex<Feedback<A>>>,
    next_effect: u64,
    finished: bool,
}

impl<S, A, E, R> TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    S: Clone + PartialEq + Debug,
    A: Clone + PartialEq + Debug + Send + 'static,
{
    /// Create a test store
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            reducer,
            environment,
            state: initial_state,
            executor: EffectExecutor::new(CancellationRegistry::new()),
            feedback: Arc::new(Mutex::new(Feedback {
                received: VecDeque::new(),
                in_flight: HashMap::new(),
                failures: Vec::new(),
            })),
            next_effect: 0,
            finished: false,
        }
    }

    fn feedback(&self) -> MutexGuard<'_, Feedback<A>> {
        self.feedback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// The environment handed to the reducer
    #[must_use]
    pub const fn environment(&self) -> &E {
        &self.environment
    }

    /// The registry effects register with
    #[must_use]
    pub fn registry(&self) -> &CancellationRegistry {
        self.executor.registry()
    }

    /// Send `action` and assert the resulting state.
    ///
    /// `update` receives a copy of the previous state and must turn it into
    /// the expected new state.
    ///
    /// # Panics
    ///
    /// Panics if actions produced by effects are waiting to be received, if
    /// the state differs from the expectation, or if an effect failed.
    pub fn send(&mut self, action: A, update: impl FnOnce(&mut S)) {
        let pending: Vec<A> = self.feedback().received.iter().cloned().collect();
        assert!(
            pending.is_empty(),
            "Must handle {} received action(s) before sending {action:?}: {pending:?}",
            pending.len()
        );

        self.reduce(action, update);
    }

    /// Assert that effects produced `expected` next, then reduce it.
    ///
    /// # Panics
    ///
    /// Panics if no action was received, the next received action differs
    /// from `expected`, the state differs from the expectation, or an effect
    /// failed.
    pub fn receive(&mut self, expected: A, update: impl FnOnce(&mut S)) {
        let next = self.feedback().received.pop_front();
        let Some(action) = next else {
            panic!("Expected to receive {expected:?}, but no action was received");
        };
        assert_eq!(action, expected, "Received an unexpected action");

        self.reduce(action, update);
    }

    /// Wait up to `timeout` for async effects to produce an action, then
    /// [`receive`](Self::receive) it.
    ///
    /// # Panics
    ///
    /// See [`receive`](Self::receive).
    pub async fn receive_within(
        &mut self,
        expected: A,
        timeout: Duration,
        update: impl FnOnce(&mut S),
    ) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.feedback().received.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.receive(expected, update);
    }

    /// Discard every action received so far
    pub fn skip_received_actions(&mut self) {
        let skipped = std::mem::take(&mut self.feedback().received);
        tracing::debug!(count = skipped.len(), "Skipped received actions");
    }

    /// Cancel every effect still running
    pub fn skip_in_flight_effects(&mut self) {
        let tokens: Vec<CancellationToken> =
            self.feedback().in_flight.drain().map(|(_, token)| token).collect();
        for token in tokens {
            token.cancel();
        }
    }

    /// Number of effects still running
    #[must_use]
    pub fn in_flight_effects(&self) -> usize {
        self.feedback().in_flight.len()
    }

    /// Assert the test left nothing behind.
    ///
    /// # Panics
    ///
    /// Panics if received actions were not asserted, effects are still
    /// running, or an effect failed.
    pub fn finish(&mut self) {
        self.finished = true;
        self.assert_no_failures();

        let (received, in_flight) = {
            let feedback = self.feedback();
            (
                feedback.received.iter().cloned().collect::<Vec<_>>(),
                feedback.in_flight.len(),
            )
        };
        assert!(
            received.is_empty(),
            "The store received {} unexpected action(s): {received:?}",
            received.len()
        );
        assert!(
            in_flight == 0,
            "{in_flight} effect(s) are still running; cancel them or advance the scheduler"
        );
    }

    fn reduce(&mut self, action: A, update: impl FnOnce(&mut S)) {
        let mut expected = self.state.clone();
        update(&mut expected);

        let effects = self.reducer.reduce(&mut self.state, action, &self.environment);

        assert_eq!(self.state, expected, "State change does not match expectation");

        for effect in effects {
            self.start(effect);
        }
        self.assert_no_failures();
    }

    fn start(&mut self, effect: Effect<A>) {
        if effect.is_none() {
            return;
        }

        let id = self.next_effect;
        self.next_effect += 1;

        let token = CancellationToken::new();
        self.feedback().in_flight.insert(id, token.clone());

        let feedback = Arc::clone(&self.feedback);
        let sink = move |event: Event<A>| {
            let mut feedback = feedback.lock().unwrap_or_else(PoisonError::into_inner);
            match event {
                Event::Action(action) => feedback.received.push_back(action),
                Event::Completed(completion) => {
                    feedback.in_flight.remove(&id);
                    if let Completion::Failed(error) = completion {
                        feedback.failures.push(error);
                    }
                },
            }
        };
        self.executor.execute(effect, Emitter::new(token, sink));
    }

    fn assert_no_failures(&self) {
        let failures = std::mem::take(&mut self.feedback().failures);
        if let Some(error) = failures.first() {
            panic!("unhandled effect failure: {error}");
        }
    }
}

impl<S, A, E, R> Drop for TestStore<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn drop(&mut self) {
        if self.finished || std::thread::panicking() {
            return;
        }

        let feedback = self.feedback.lock().unwrap_or_else(PoisonError::into_inner);
        let leftovers =
            feedback.received.len() + feedback.in_flight.len() + feedback.failures.len();
        drop(feedback);

        assert!(
            leftovers == 0,
            "TestStore dropped with {leftovers} unasserted item(s); call finish()"
        );
    }
}
