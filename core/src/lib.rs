//! # Ripple Core
//!
//! Core traits and types for the Ripple unidirectional state runtime.
//!
//! A single mutable state is advanced only by a reducer that, given the
//! current state and an incoming action, mutates the state and returns
//! effects. Effects are inert descriptions of asynchronous work whose results
//! re-enter the system as further actions.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for a feature, owned by the Store
//! - **Action**: User intents and results of previously started effects
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies, including the [`Scheduler`]
//!
//! ## Example
//!
//! ```
//! use ripple_core::{Effect, Reducer, SmallVec, smallvec};
//!
//! #[derive(Clone, Debug, Default)]
//! struct CounterState {
//!     count: i64,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum CounterAction {
//!     Increment,
//!     Reset,
//! }
//!
//! struct CounterReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CounterState,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<CounterAction>; 4]> {
//!         match action {
//!             CounterAction::Increment => state.count += 1,
//!             CounterAction::Reset => state.count = 0,
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! let mut state = CounterState::default();
//! CounterReducer.reduce(&mut state, CounterAction::Increment, &());
//! assert_eq!(state.count, 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Cooperative cancellation tokens
pub mod cancellation;

/// Reducer composition utilities
pub mod composition;

/// Effect descriptions and combinators
pub mod effect;

/// Declarative macros for effect construction
mod effect_macros;

/// Identifiers for cancellable effects
pub mod effect_id;

/// The sending side of a running effect
pub mod emitter;

/// Effect error types
pub mod error;

/// Clocks and schedulers
pub mod scheduler;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Updates state in place
        /// 2. Returns effect descriptions to be executed
        ///
        /// Multiple returned effects run as if merged with
        /// [`Effect::merge`].
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }

    /// Reducer built from a closure. Created by [`from_fn`].
    pub struct FnReducer<S, A, E, F> {
        reduce: F,
        _phantom: std::marker::PhantomData<fn(&mut S, A, &E)>,
    }

    /// Build a reducer from a closure
    ///
    /// # Example
    ///
    /// ```
    /// use ripple_core::{Effect, Reducer, smallvec};
    /// use ripple_core::reducer::from_fn;
    ///
    /// let doubler = from_fn(|state: &mut i32, factor: i32, _env: &()| {
    ///     *state *= factor;
    ///     smallvec![Effect::None]
    /// });
    ///
    /// let mut state = 3;
    /// doubler.reduce(&mut state, 2, &());
    /// assert_eq!(state, 6);
    /// ```
    pub const fn from_fn<S, A, E, F>(reduce: F) -> FnReducer<S, A, E, F>
    where
        F: Fn(&mut S, A, &E) -> SmallVec<[Effect<A>; 4]>,
    {
        FnReducer {
            reduce,
            _phantom: std::marker::PhantomData,
        }
    }

    impl<S, A, E, F> Reducer for FnReducer<S, A, E, F>
    where
        F: Fn(&mut S, A, &E) -> SmallVec<[Effect<A>; 4]>,
    {
        type State = S;
        type Action = A;
        type Environment = E;

        fn reduce(&self, state: &mut S, action: A, env: &E) -> SmallVec<[Effect<A>; 4]> {
            (self.reduce)(state, action, env)
        }
    }
}

pub use cancellation::CancellationToken;
pub use effect::Effect;
pub use effect_id::EffectId;
pub use emitter::{Completion, Emitter, Event};
pub use error::EffectError;
pub use reducer::Reducer;
pub use scheduler::{Clock, RepeatingWork, Scheduled, Scheduler, SchedulerRef, Work};
