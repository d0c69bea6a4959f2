//! Effect module - Side effect descriptions
//!
//! Effects describe asynchronous work to be performed by the runtime. They
//! are values (not execution): inert until the Store starts them, composable,
//! and cancellable through externally supplied [`EffectId`]s.
//!
//! An effect produces zero or more actions and then terminates normally,
//! with a failure, or through cancellation.

use crate::effect_id::EffectId;
use crate::emitter::Emitter;
use crate::error::EffectError;
use crate::scheduler::SchedulerRef;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Push-based operation receiving the emitter for its results
pub type Operation<Action> = Box<dyn FnOnce(Emitter<Action>) + Send>;

/// Boxed future produced by async effects
pub type BoxFuture<T> = futures::future::BoxFuture<'static, T>;

/// Boxed stream produced by streaming effects
pub type BoxStream<T> = futures::stream::BoxStream<'static, T>;

/// Maps a failure into a domain action
pub type FailureHandler<Action> = Box<dyn FnOnce(EffectError) -> Action + Send>;

type Mapper<A, B> = Arc<dyn Fn(A) -> B + Send + Sync>;

/// Effect type - describes a side effect to be executed
///
/// Effects are NOT executed immediately. They are descriptions of what should happen,
/// returned from reducers and executed by the Store runtime.
///
/// # Type Parameters
///
/// - `Action`: The action type that effects can produce (feedback loop)
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Emit a single action synchronously, then complete
    Just(Action),

    /// Arbitrary push-based work driven through an [`Emitter`]
    Run(Operation<Action>),

    /// Arbitrary async computation, driven on the ambient tokio runtime
    ///
    /// `Ok(Some(action))` is fed back into the reducer; `Err` is an
    /// unhandled failure unless caught.
    Future(BoxFuture<Result<Option<Action>, EffectError>>),

    /// Async stream; every item is fed back into the reducer
    Stream(BoxStream<Action>),

    /// Run effects in parallel
    Parallel(Vec<Effect<Action>>),

    /// Run effects sequentially
    Sequential(Vec<Effect<Action>>),

    /// Register the effect under `id` while it runs
    Cancellable {
        /// Cancellation identifier
        id: EffectId,
        /// Cancel everything already running under `id` before starting
        cancel_in_flight: bool,
        /// The wrapped effect
        effect: Box<Effect<Action>>,
    },

    /// Cancel every effect registered under the given identifiers
    Cancel(Vec<EffectId>),

    /// Start the wrapped effect after `duration` on `scheduler`
    Delay {
        /// How long to wait
        duration: Duration,
        /// Clock the delay is measured on
        scheduler: SchedulerRef,
        /// Effect started once the delay elapses
        effect: Box<Effect<Action>>,
    },

    /// Rate-limit the wrapped effect's actions per `id`
    Throttle {
        /// Throttle (and cancellation) identifier
        id: EffectId,
        /// Minimum spacing between emitted actions
        interval: Duration,
        /// Clock the interval is measured on
        scheduler: SchedulerRef,
        /// Emit the most recent suppressed action instead of the first
        latest: bool,
        /// The wrapped effect
        effect: Box<Effect<Action>>,
    },

    /// Convert a failure of the wrapped effect into an action
    Catch {
        /// The wrapped effect
        effect: Box<Effect<Action>>,
        /// Failure-to-action mapping
        handler: FailureHandler<Action>,
    },

    /// Fail immediately
    Fail(EffectError),
}

// Manual Debug implementation since closures and futures don't implement Debug
impl<Action> std::fmt::Debug for Effect<Action>
where
    Action: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Just(action) => f.debug_tuple("Effect::Just").field(action).finish(),
            Effect::Run(_) => write!(f, "Effect::Run(<operation>)"),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            Effect::Stream(_) => write!(f, "Effect::Stream(<stream>)"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => f
                .debug_struct("Effect::Cancellable")
                .field("id", id)
                .field("cancel_in_flight", cancel_in_flight)
                .field("effect", effect)
                .finish(),
            Effect::Cancel(ids) => f.debug_tuple("Effect::Cancel").field(ids).finish(),
            Effect::Delay {
                duration, effect, ..
            } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("effect", effect)
                .finish_non_exhaustive(),
            Effect::Throttle {
                id,
                interval,
                latest,
                effect,
                ..
            } => f
                .debug_struct("Effect::Throttle")
                .field("id", id)
                .field("interval", interval)
                .field("latest", latest)
                .field("effect", effect)
                .finish_non_exhaustive(),
            Effect::Catch { effect, .. } => f
                .debug_struct("Effect::Catch")
                .field("effect", effect)
                .finish_non_exhaustive(),
            Effect::Fail(error) => f.debug_tuple("Effect::Fail").field(error).finish(),
        }
    }
}

impl<Action> Effect<Action> {
    /// Combine effects to run in parallel
    #[must_use]
    pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially
    #[must_use]
    pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Sequential(effects)
    }

    /// Emit `action` synchronously
    #[must_use]
    pub const fn just(action: Action) -> Self {
        Self::Just(action)
    }

    /// Whether this is [`Effect::None`]
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Standalone effect cancelling everything registered under `id`
    #[must_use]
    pub fn cancel(id: impl Into<EffectId>) -> Self {
        Self::Cancel(vec![id.into()])
    }

    /// Standalone effect cancelling each of `ids` independently
    #[must_use]
    pub fn cancel_all<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<EffectId>,
    {
        Self::Cancel(ids.into_iter().map(Into::into).collect())
    }

    /// Immediately failing effect
    #[must_use]
    pub const fn fail(error: EffectError) -> Self {
        Self::Fail(error)
    }

    /// Register this effect under `id` while it runs.
    ///
    /// With `cancel_in_flight`, every effect already running under `id` is
    /// cancelled before this one starts.
    #[must_use]
    pub fn cancellable(self, id: impl Into<EffectId>, cancel_in_flight: bool) -> Self {
        Self::Cancellable {
            id: id.into(),
            cancel_in_flight,
            effect: Box::new(self),
        }
    }

    /// Start this effect `duration` after it is started, on `scheduler`
    #[must_use]
    pub fn deferred(self, duration: Duration, scheduler: SchedulerRef) -> Self {
        Self::Delay {
            duration,
            scheduler,
            effect: Box::new(self),
        }
    }

    /// Start this effect only after `duration` passes without a newer
    /// debounce under the same `id` superseding it
    #[must_use]
    pub fn debounce(
        self,
        id: impl Into<EffectId>,
        duration: Duration,
        scheduler: SchedulerRef,
    ) -> Self {
        self.deferred(duration, scheduler).cancellable(id, true)
    }

    /// Emit at most one action per `interval` under `id`.
    ///
    /// The first action passes immediately; afterwards the most recent
    /// (`latest = true`) or first (`latest = false`) action suppressed during
    /// the interval is emitted once the interval elapses.
    #[must_use]
    pub fn throttle(
        self,
        id: impl Into<EffectId>,
        interval: Duration,
        scheduler: SchedulerRef,
        latest: bool,
    ) -> Self {
        Self::Throttle {
            id: id.into(),
            interval,
            scheduler,
            latest,
            effect: Box::new(self),
        }
    }

    /// Convert a failure of this effect into an action
    #[must_use]
    pub fn catch(self, handler: impl FnOnce(EffectError) -> Action + Send + 'static) -> Self {
        Self::Catch {
            effect: Box::new(self),
            handler: Box::new(handler),
        }
    }
}

impl<Action: Send + 'static> Effect<Action> {
    /// Push-based effect driven through an [`Emitter`].
    ///
    /// The operation must eventually call [`Emitter::finish`] or
    /// [`Emitter::fail`] unless it is meant to run until cancelled, and should
    /// register disposers with [`Emitter::on_cancel`].
    #[must_use]
    pub fn run(operation: impl FnOnce(Emitter<Action>) + Send + 'static) -> Self {
        Self::Run(Box::new(operation))
    }

    /// Async computation whose optional result is fed back
    #[must_use]
    pub fn future<F>(future: F) -> Self
    where
        F: std::future::Future<Output = Option<Action>> + Send + 'static,
    {
        Self::Future(future.map(Ok).boxed())
    }

    /// Async computation whose error is an unhandled failure
    #[must_use]
    pub fn try_future<F, E>(future: F) -> Self
    where
        F: std::future::Future<Output = Result<Option<Action>, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self::Future(future.map(|result| result.map_err(EffectError::failed)).boxed())
    }

    /// Async computation whose outcome, success or failure, becomes an action
    #[must_use]
    pub fn result<F, T, E>(
        future: F,
        to_action: impl FnOnce(Result<T, E>) -> Action + Send + 'static,
    ) -> Self
    where
        F: std::future::Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::Future(future.map(move |result| Ok(Some(to_action(result)))).boxed())
    }

    /// Stream of actions
    #[must_use]
    pub fn stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Action> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }

    /// Run `work` for its side effect only
    #[must_use]
    pub fn fire_and_forget(work: impl FnOnce() + Send + 'static) -> Self {
        Self::run(move |emitter| {
            work();
            emitter.finish();
        })
    }

    /// Repeating timer emitting `to_action(now)` every `interval`.
    ///
    /// Cancellable as a unit via `id`; starting a new timer under the same
    /// `id` cancels the previous one. Never completes on its own.
    #[must_use]
    pub fn timer<F>(
        id: impl Into<EffectId>,
        interval: Duration,
        scheduler: SchedulerRef,
        to_action: F,
    ) -> Self
    where
        F: Fn(chrono::DateTime<chrono::Utc>) -> Action + Send + 'static,
    {
        Self::run(move |emitter: Emitter<Action>| {
            let clock = Arc::clone(&scheduler);
            let ticks = emitter.clone();
            let handle = scheduler.schedule_repeating(
                interval,
                interval,
                Box::new(move || ticks.send(to_action(clock.now()))),
            );
            emitter.on_cancel(move || handle.dispose());
        })
        .cancellable(id, true)
    }

    /// Transform every action this effect produces
    #[must_use]
    pub fn map<B, F>(self, f: F) -> Effect<B>
    where
        B: Send + 'static,
        F: Fn(Action) -> B + Send + Sync + 'static,
    {
        let mapper: Mapper<Action, B> = Arc::new(f);
        self.map_with(&mapper)
    }

    fn map_with<B: Send + 'static>(self, f: &Mapper<Action, B>) -> Effect<B> {
        match self {
            Effect::None => Effect::None,
            Effect::Just(action) => Effect::Just(f(action)),
            Effect::Run(operation) => {
                let f = Arc::clone(f);
                Effect::Run(Box::new(move |emitter: Emitter<B>| {
                    operation(emitter.contramap(move |action| f(action)));
                }))
            },
            Effect::Future(future) => {
                let f = Arc::clone(f);
                Effect::Future(
                    future
                        .map(move |result| result.map(|action| action.map(|a| f(a))))
                        .boxed(),
                )
            },
            Effect::Stream(stream) => {
                let f = Arc::clone(f);
                Effect::Stream(stream.map(move |action| f(action)).boxed())
            },
            Effect::Parallel(effects) => {
                Effect::Parallel(effects.into_iter().map(|e| e.map_with(f)).collect())
            },
            Effect::Sequential(effects) => {
                Effect::Sequential(effects.into_iter().map(|e| e.map_with(f)).collect())
            },
            Effect::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => Effect::Cancellable {
                id,
                cancel_in_flight,
                effect: Box::new(effect.map_with(f)),
            },
            Effect::Cancel(ids) => Effect::Cancel(ids),
            Effect::Delay {
                duration,
                scheduler,
                effect,
            } => Effect::Delay {
                duration,
                scheduler,
                effect: Box::new(effect.map_with(f)),
            },
            Effect::Throttle {
                id,
                interval,
                scheduler,
                latest,
                effect,
            } => Effect::Throttle {
                id,
                interval,
                scheduler,
                latest,
                effect: Box::new(effect.map_with(f)),
            },
            Effect::Catch { effect, handler } => {
                let g = Arc::clone(f);
                Effect::Catch {
                    effect: Box::new(effect.map_with(f)),
                    handler: Box::new(move |error| g(handler(error))),
                }
            },
            Effect::Fail(error) => Effect::Fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Child {
        Tick(u32),
        Failed(String),
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Parent {
        Child(Child),
    }

    #[test]
    fn test_map_just() {
        let effect = Effect::just(Child::Tick(1)).map(Parent::Child);
        assert!(matches!(effect, Effect::Just(Parent::Child(Child::Tick(1)))));
    }

    #[test]
    fn test_map_preserves_structure() {
        let effect = Effect::merge(vec![
            Effect::just(Child::Tick(1)),
            Effect::chain(vec![Effect::None, Effect::cancel("a")]),
            Effect::just(Child::Tick(2)).cancellable("b", true),
        ])
        .map(Parent::Child);

        let Effect::Parallel(effects) = effect else {
            unreachable!("map changed the effect shape");
        };
        assert_eq!(effects.len(), 3);
        assert!(matches!(effects[1], Effect::Sequential(_)));
        assert!(matches!(
            &effects[2],
            Effect::Cancellable { id, cancel_in_flight: true, .. } if *id == EffectId::from("b")
        ));
    }

    #[test]
    fn test_map_catch_handler() {
        let effect = Effect::fail(EffectError::failed("boom"))
            .catch(|error| Child::Failed(error.to_string()))
            .map(Parent::Child);

        let Effect::Catch { handler, .. } = effect else {
            unreachable!("map changed the effect shape");
        };
        assert_eq!(
            handler(EffectError::failed("boom")),
            Parent::Child(Child::Failed("Effect failed: boom".to_string()))
        );
    }

    #[test]
    fn test_map_future() {
        let effect = Effect::future(async { Some(Child::Tick(7)) }).map(Parent::Child);
        let Effect::Future(future) = effect else {
            unreachable!("map changed the effect shape");
        };
        let output = tokio_test::block_on(future);
        assert_eq!(output, Ok(Some(Parent::Child(Child::Tick(7)))));
    }

    #[test]
    fn test_cancel_all_collects_ids() {
        let effect = Effect::<Child>::cancel_all(["a", "b"]);
        let Effect::Cancel(ids) = effect else {
            unreachable!("cancel_all must build Effect::Cancel");
        };
        assert_eq!(ids, vec![EffectId::from("a"), EffectId::from("b")]);
    }

    #[test]
    fn test_debug_output() {
        let effect = Effect::just(Child::Tick(3)).cancellable("x", false);
        let rendered = format!("{effect:?}");
        assert!(rendered.contains("Effect::Cancellable"));
        assert!(rendered.contains("Tick(3)"));
    }

    proptest! {
        /// Mapping a merge keeps every child in place and maps each value
        #[test]
        fn prop_map_keeps_merge_children_in_order(
            ticks in prop::collection::vec(any::<u32>(), 0..16)
        ) {
            let children = ticks.iter().map(|tick| Effect::just(Child::Tick(*tick))).collect();
            let effect = Effect::merge(children).map(Parent::Child);

            let Effect::Parallel(effects) = effect else {
                return Err(TestCaseError::fail("map changed the effect shape"));
            };
            let mapped: Vec<u32> = effects
                .into_iter()
                .filter_map(|effect| match effect {
                    Effect::Just(Parent::Child(Child::Tick(tick))) => Some(tick),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(mapped, ticks);
        }
    }
}
