//! Reducer composition utilities
//!
//! This module provides utilities for composing reducers in various ways:
//! - **`combine_reducers`**: Run multiple reducers on the same state/action
//! - **`scope_reducer`**: Focus a reducer on a subset of state
//! - **`pullback`**: Lift a child feature (state, action, environment) into a parent
//!
//! # Examples
//!
//! ## Combining Reducers
//!
//! ```
//! use ripple_core::{Reducer, Effect, SmallVec, smallvec};
//!
//! #[derive(Clone)]
//! struct MyState {
//!     count: i32,
//!     name: String,
//! }
//!
//! #[derive(Clone)]
//! enum MyAction {
//!     Increment,
//!     SetName(String),
//! }
//!
//! struct CounterReducer;
//! struct NameReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = MyState;
//!     type Action = MyAction;
//!     type Environment = ();
//!
//!     fn reduce(&self, state: &mut Self::State, action: Self::Action, _env: &Self::Environment) -> SmallVec<[Effect<Self::Action>; 4]> {
//!         if let MyAction::Increment = action {
//!             state.count += 1;
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! impl Reducer for NameReducer {
//!     type State = MyState;
//!     type Action = MyAction;
//!     type Environment = ();
//!
//!     fn reduce(&self, state: &mut Self::State, action: Self::Action, _env: &Self::Environment) -> SmallVec<[Effect<Self::Action>; 4]> {
//!         if let MyAction::SetName(name) = action {
//!             state.name = name;
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! use ripple_core::composition::combine_reducers;
//! let combined = combine_reducers(vec![Box::new(CounterReducer), Box::new(NameReducer)]);
//! ```

use crate::SmallVec;
use crate::effect::Effect;
use crate::reducer::Reducer;

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each reducer is run in sequence, and all effects are collected and concatenated.
/// This is useful when you want to split reducer logic across multiple implementations.
#[must_use]
pub fn combine_reducers<S, A, E>(
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
) -> CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
}

impl<S, A, E> Reducer for CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let mut all_effects = SmallVec::new();

        for reducer in &self.reducers {
            let effects = reducer.reduce(state, action.clone(), env);
            all_effects.extend(effects);
        }

        all_effects
    }
}

/// Scopes a reducer to operate on a subset of a larger state.
///
/// The action and environment types are shared with the child reducer; use
/// [`pullback`] when they differ.
#[must_use]
pub fn scope_reducer<S, SubS, A, E, R>(
    reducer: R,
    get_state: fn(&S) -> &SubS,
    set_state: fn(&mut S, SubS),
) -> ScopedReducer<S, SubS, A, E, R>
where
    SubS: Clone,
    R: Reducer<State = SubS, Action = A, Environment = E>,
{
    ScopedReducer {
        reducer,
        get_state,
        set_state,
        _phantom: std::marker::PhantomData,
    }
}

/// A reducer focused on a sub-state. Created by [`scope_reducer`].
pub struct ScopedReducer<S, SubS, A, E, R>
where
    SubS: Clone,
    R: Reducer<State = SubS, Action = A, Environment = E>,
{
    reducer: R,
    get_state: fn(&S) -> &SubS,
    set_state: fn(&mut S, SubS),
    _phantom: std::marker::PhantomData<fn(A, &E)>,
}

impl<S, SubS, A, E, R> Reducer for ScopedReducer<S, SubS, A, E, R>
where
    SubS: Clone,
    R: Reducer<State = SubS, Action = A, Environment = E>,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let mut sub_state = (self.get_state)(state).clone();
        let effects = self.reducer.reduce(&mut sub_state, action, env);
        (self.set_state)(state, sub_state);
        effects
    }
}

/// Lifts a child reducer into a parent domain.
///
/// - `state` projects the parent state onto the child's, mutably and in place
/// - `extract` picks child actions out of parent actions; other actions are ignored
/// - `embed` wraps child actions (including those produced by child effects)
/// - `environment` projects the parent environment onto the child's
///
/// # Example
///
/// ```
/// use ripple_core::{Reducer, Effect, SmallVec, smallvec};
/// use ripple_core::composition::pullback;
///
/// #[derive(Default)]
/// struct Counter { count: i32 }
///
/// enum CounterAction { Increment }
///
/// struct CounterReducer;
///
/// impl Reducer for CounterReducer {
///     type State = Counter;
///     type Action = CounterAction;
///     type Environment = ();
///
///     fn reduce(&self, state: &mut Counter, _action: CounterAction, _env: &()) -> SmallVec<[Effect<CounterAction>; 4]> {
///         state.count += 1;
///         smallvec![Effect::None]
///     }
/// }
///
/// #[derive(Default)]
/// struct App { counter: Counter }
///
/// enum AppAction { Counter(CounterAction), Ignored }
///
/// let app = pullback(
///     CounterReducer,
///     |app: &mut App| &mut app.counter,
///     |action: AppAction| match action {
///         AppAction::Counter(action) => Some(action),
///         AppAction::Ignored => None,
///     },
///     AppAction::Counter,
///     |env: &()| env,
/// );
///
/// let mut state = App::default();
/// app.reduce(&mut state, AppAction::Counter(CounterAction::Increment), &());
/// app.reduce(&mut state, AppAction::Ignored, &());
/// assert_eq!(state.counter.count, 1);
/// ```
#[must_use]
pub fn pullback<R, S, A, E>(
    reducer: R,
    state: fn(&mut S) -> &mut R::State,
    extract: fn(A) -> Option<R::Action>,
    embed: fn(R::Action) -> A,
    environment: fn(&E) -> &R::Environment,
) -> Pullback<R, S, A, E>
where
    R: Reducer,
{
    Pullback {
        reducer,
        state,
        extract,
        embed,
        environment,
    }
}

/// A child reducer lifted into a parent domain. Created by [`pullback`].
pub struct Pullback<R, S, A, E>
where
    R: Reducer,
{
    reducer: R,
    state: fn(&mut S) -> &mut R::State,
    extract: fn(A) -> Option<R::Action>,
    embed: fn(R::Action) -> A,
    environment: fn(&E) -> &R::Environment,
}

impl<R, S, A, E> Reducer for Pullback<R, S, A, E>
where
    R: Reducer,
    R::Action: Send + 'static,
    A: Send + 'static,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        let Some(child_action) = (self.extract)(action) else {
            return SmallVec::new();
        };

        let embed = self.embed;
        self.reducer
            .reduce((self.state)(state), child_action, (self.environment)(env))
            .into_iter()
            .map(|effect| effect.map(embed))
            .collect()
    }
}
