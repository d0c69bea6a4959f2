//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use ripple_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use ripple_testing::ReducerTest;
///
/// ReducerTest::new(SearchReducer)
///     .with_env(test_environment())
///     .given_state(SearchState::default())
///     .when_action(SearchAction::QueryChanged("rust".into()))
///     .then_state(|state| {
///         assert_eq!(state.query, "rust");
///     })
///     .then_effects(|effects| {
///         assertions::assert_has_cancellable_effect(effects, &EffectId::from("search"));
///     })
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an action to reduce (When)
    ///
    /// Several actions are reduced in order; effect assertions see the
    /// effects of the last one.
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        assert!(
            !self.actions.is_empty(),
            "At least one action must be set with when_action()"
        );

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        // Execute reducer
        let mut effects = Vec::new();
        for action in self.actions {
            effects = self.reducer.reduce(&mut state, action, &env).into_vec();
        }

        // Run state assertions
        for assertion in self.state_assertions {
            assertion(&state);
        }

        // Run effect assertions
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use ripple_core::{Effect, EffectId};

    fn any_in_tree<A>(effect: &Effect<A>, predicate: &dyn Fn(&Effect<A>) -> bool) -> bool {
        if predicate(effect) {
            return true;
        }
        match effect {
            Effect::Parallel(effects) | Effect::Sequential(effects) => {
                effects.iter().any(|child| any_in_tree(child, predicate))
            },
            Effect::Cancellable { effect, .. }
            | Effect::Delay { effect, .. }
            | Effect::Throttle { effect, .. }
            | Effect::Catch { effect, .. } => any_in_tree(effect, predicate),
            _ => false,
        }
    }

    fn any_effect<A>(effects: &[Effect<A>], predicate: &dyn Fn(&Effect<A>) -> bool) -> bool {
        effects.iter().any(|effect| any_in_tree(effect, predicate))
    }

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            any_effect(effects, &|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Assert that some effect is registered under `id`
    ///
    /// # Panics
    ///
    /// Panics if no `Cancellable` or `Throttle` effect uses `id`.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_cancellable_effect<A>(effects: &[Effect<A>], id: &EffectId) {
        assert!(
            any_effect(effects, &|e| match e {
                Effect::Cancellable { id: found, .. } | Effect::Throttle { id: found, .. } => {
                    found == id
                },
                _ => false,
            }),
            "Expected an effect cancellable under {id}, but none found"
        );
    }

    /// Assert that some effect cancels `id`
    ///
    /// # Panics
    ///
    /// Panics if no `Cancel` effect names `id`.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_cancels<A>(effects: &[Effect<A>], id: &EffectId) {
        assert!(
            any_effect(effects, &|e| matches!(e, Effect::Cancel(ids) if ids.contains(id))),
            "Expected an effect cancelling {id}, but none found"
        );
    }

    /// Assert that some effect is deferred by exactly `duration`
    ///
    /// # Panics
    ///
    /// Panics if no `Delay` effect with that duration is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_delay<A>(effects: &[Effect<A>], duration: std::time::Duration) {
        assert!(
            any_effect(
                effects,
                &|e| matches!(e, Effect::Delay { duration: d, .. } if *d == duration)
            ),
            "Expected an effect delayed by {duration:?}, but none found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImmediateScheduler;
    use ripple_core::{EffectId, SchedulerRef, SmallVec, smallvec};
    use std::time::Duration;

    #[derive(Clone, Debug)]
    struct TestState {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
        IncrementLater,
        StopLater,
    }

    struct TestReducer;

    struct TestEnv {
        scheduler: SchedulerRef,
    }

    fn env() -> TestEnv {
        TestEnv {
            scheduler: ImmediateScheduler::new().shared(),
        }
    }

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Increment => {
                    state.count += 1;
                    smallvec![Effect::None]
                },
                TestAction::Decrement => {
                    state.count -= 1;
                    smallvec![Effect::None]
                },
                TestAction::IncrementLater => {
                    smallvec![Effect::just(TestAction::Increment).debounce(
                        "later",
                        Duration::from_millis(300),
                        env.scheduler.clone(),
                    )]
                },
                TestAction::StopLater => smallvec![Effect::cancel("later")],
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .with_env(env())
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Increment)
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_reducer_test_several_actions() {
        ReducerTest::new(TestReducer)
            .with_env(env())
            .given_state(TestState { count: 5 })
            .when_action(TestAction::Decrement)
            .when_action(TestAction::Decrement)
            .then_state(|state| {
                assert_eq!(state.count, 3);
            })
            .run();
    }

    #[test]
    fn test_debounce_assertions() {
        ReducerTest::new(TestReducer)
            .with_env(env())
            .given_state(TestState { count: 0 })
            .when_action(TestAction::IncrementLater)
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_cancellable_effect(effects, &EffectId::from("later"));
                assertions::assert_has_delay(effects, Duration::from_millis(300));
            })
            .run();
    }

    #[test]
    fn test_cancel_assertion() {
        ReducerTest::new(TestReducer)
            .with_env(env())
            .given_state(TestState { count: 0 })
            .when_action(TestAction::StopLater)
            .then_effects(|effects| {
                assertions::assert_cancels(effects, &EffectId::from("later"));
            })
            .run();
    }

    #[test]
    fn test_assertions_no_effects() {
        assertions::assert_no_effects::<TestAction>(&[Effect::None]);
        assertions::assert_no_effects::<TestAction>(&[]);
    }

    #[test]
    fn test_assertions_effects_count() {
        assertions::assert_effects_count(&[Effect::<TestAction>::None], 1);
        assertions::assert_effects_count::<TestAction>(&[], 0);
    }

    #[test]
    fn test_assert_has_future_effect_in_tree() {
        let effects = [Effect::merge(vec![
            Effect::None,
            Effect::future(async { Some(TestAction::Increment) }),
        ])];
        assertions::assert_has_future_effect(&effects);
    }
}
