//! Effect interpretation.
//!
//! [`EffectExecutor`] walks an [`Effect`] tree and runs it, reporting every
//! produced action and the single terminal event through an [`Emitter`].
//! Composite effects give each child its own emitter whose token is a child
//! of the parent's, so cancelling a parent tears down the whole subtree.

use crate::registry::CancellationRegistry;
use crate::throttle::{Decision, ThrottleTable};
use futures::{FutureExt, StreamExt};
use ripple_core::effect::{BoxFuture, BoxStream, FailureHandler};
use ripple_core::{
    CancellationToken, Completion, Effect, EffectError, EffectId, Emitter, Event, SchedulerRef,
};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Runs effect descriptions.
///
/// Holds the [`CancellationRegistry`] that `Cancellable` and `Cancel`
/// effects operate on and the throttle bookkeeping for `Throttle` effects.
/// Cloning shares both.
pub struct EffectExecutor<A> {
    registry: CancellationRegistry,
    throttles: ThrottleTable<A>,
}

impl<A> Clone for EffectExecutor<A> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            throttles: self.throttles.clone(),
        }
    }
}

impl<A> std::fmt::Debug for EffectExecutor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectExecutor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// One throttled run: at most one deferred emission is scheduled at a time
struct ThrottleProgress<A> {
    deferred: Option<A>,
    scheduled: bool,
    upstream_done: bool,
}

impl<A> Default for ThrottleProgress<A> {
    fn default() -> Self {
        Self {
            deferred: None,
            scheduled: false,
            upstream_done: false,
        }
    }
}

impl<A> EffectExecutor<A>
where
    A: Clone + Send + 'static,
{
    /// Create an executor operating on `registry`
    #[must_use]
    pub fn new(registry: CancellationRegistry) -> Self {
        Self {
            registry,
            throttles: ThrottleTable::new(),
        }
    }

    /// The registry `Cancellable` effects register with
    #[must_use]
    pub const fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Start `effect` with a fresh root token, reporting into `sink`.
    ///
    /// Returns the root token; cancelling it stops the effect and delivers
    /// [`Completion::Cancelled`] unless the effect already terminated.
    pub fn start(
        &self,
        effect: Effect<A>,
        sink: impl Fn(Event<A>) + Send + Sync + 'static,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        self.execute(effect, Emitter::new(token.clone(), sink));
        token
    }

    /// Run `effect`, reporting into `emitter`.
    ///
    /// Synchronous parts of the effect (`Just`, `Cancel`, synchronous `Run`
    /// operations) report before this returns. Futures and streams are
    /// spawned on the ambient tokio runtime; without one they fail with
    /// [`EffectError::NoRuntime`].
    pub fn execute(&self, effect: Effect<A>, emitter: Emitter<A>) {
        if emitter.is_cancelled() {
            emitter.complete(Completion::Cancelled);
            return;
        }

        match effect {
            Effect::None => emitter.finish(),
            Effect::Just(action) => {
                emitter.send(action);
                emitter.finish();
            },
            Effect::Run(operation) => operation(emitter),
            Effect::Future(future) => Self::spawn_future(future, emitter),
            Effect::Stream(stream) => Self::spawn_stream(stream, emitter),
            Effect::Parallel(effects) => self.execute_parallel(effects, &emitter),
            Effect::Sequential(effects) => self.execute_sequential(effects.into(), &emitter),
            Effect::Cancellable {
                id,
                cancel_in_flight,
                effect,
            } => self.execute_cancellable(id, cancel_in_flight, *effect, emitter),
            Effect::Cancel(ids) => {
                self.registry.cancel_all(&ids);
                emitter.finish();
            },
            Effect::Delay {
                duration,
                scheduler,
                effect,
            } => self.execute_delay(duration, &scheduler, *effect, emitter),
            Effect::Throttle {
                id,
                interval,
                scheduler,
                latest,
                effect,
            } => self.execute_throttle(id, interval, scheduler, latest, *effect, emitter),
            Effect::Catch { effect, handler } => self.execute_catch(*effect, handler, &emitter),
            Effect::Fail(error) => emitter.fail(error),
        }
    }

    fn spawn_future(future: BoxFuture<Result<Option<A>, EffectError>>, emitter: Emitter<A>) {
        let driver = emitter.clone();
        Self::spawn(&emitter, async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(Some(action))) => {
                    driver.send(action);
                    driver.finish();
                },
                Ok(Ok(None)) => driver.finish(),
                Ok(Err(error)) => driver.fail(error),
                Err(panic) => driver.fail(EffectError::Panicked(panic_message(&*panic))),
            }
        });
    }

    fn spawn_stream(stream: BoxStream<A>, emitter: Emitter<A>) {
        let driver = emitter.clone();
        Self::spawn(&emitter, async move {
            let pump = AssertUnwindSafe(async {
                let mut stream = stream;
                while let Some(action) = stream.next().await {
                    if driver.is_cancelled() {
                        return;
                    }
                    driver.send(action);
                }
            });

            match pump.catch_unwind().await {
                Ok(()) => driver.finish(),
                Err(panic) => driver.fail(EffectError::Panicked(panic_message(&*panic))),
            }
        });
    }

    fn spawn(emitter: &Emitter<A>, task: impl std::future::Future<Output = ()> + Send + 'static) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Async effect started outside a tokio runtime");
            emitter.fail(EffectError::NoRuntime);
            return;
        };

        let task = handle.spawn(task);
        emitter.on_cancel(move || task.abort());
    }

    fn execute_parallel(&self, effects: Vec<Effect<A>>, emitter: &Emitter<A>) {
        if effects.is_empty() {
            emitter.finish();
            return;
        }

        let remaining = Arc::new(AtomicUsize::new(effects.len()));
        for effect in effects {
            // A synchronous failure of an earlier child ends the group
            if emitter.is_terminated() {
                return;
            }

            let parent = emitter.clone();
            let remaining = Arc::clone(&remaining);
            let child = Emitter::new(emitter.token().child_token(), move |event| match event {
                Event::Action(action) => parent.send(action),
                Event::Completed(Completion::Failed(error)) => parent.fail(error),
                Event::Completed(_) => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        parent.finish();
                    }
                },
            });
            self.execute(effect, child);
        }
    }

    fn execute_sequential(&self, mut effects: VecDeque<Effect<A>>, emitter: &Emitter<A>) {
        let Some(effect) = effects.pop_front() else {
            emitter.finish();
            return;
        };

        let parent = emitter.clone();
        let executor = self.clone();
        let rest = Mutex::new(Some(effects));
        let child = Emitter::new(emitter.token().child_token(), move |event| match event {
            Event::Action(action) => parent.send(action),
            Event::Completed(Completion::Failed(error)) => parent.fail(error),
            // A child cancelled on its own lets the sequence continue
            Event::Completed(_) => {
                if parent.is_cancelled() {
                    return;
                }
                let next = rest.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(next) = next {
                    executor.execute_sequential(next, &parent);
                }
            },
        });
        self.execute(effect, child);
    }

    fn execute_cancellable(
        &self,
        id: EffectId,
        cancel_in_flight: bool,
        effect: Effect<A>,
        emitter: Emitter<A>,
    ) {
        if cancel_in_flight {
            self.registry.cancel(&id);
        }

        let token = emitter.token().child_token();
        let instance = self.registry.register(id.clone(), token.clone());
        tracing::trace!(%id, instance, "Registered cancellable effect");

        let registry = self.registry.clone();
        let inner = Emitter::new(token, move |event| match event {
            Event::Action(action) => emitter.send(action),
            Event::Completed(completion) => {
                registry.deregister(&id, instance);
                emitter.complete(completion);
            },
        });
        self.execute(effect, inner);
    }

    fn execute_delay(
        &self,
        duration: Duration,
        scheduler: &SchedulerRef,
        effect: Effect<A>,
        emitter: Emitter<A>,
    ) {
        let executor = self.clone();
        let target = emitter.clone();
        let handle = scheduler.schedule(
            duration,
            Box::new(move || {
                if !target.is_cancelled() {
                    executor.execute(effect, target);
                }
            }),
        );
        emitter.on_cancel(move || handle.dispose());
    }

    fn execute_throttle(
        &self,
        id: EffectId,
        interval: Duration,
        scheduler: SchedulerRef,
        latest: bool,
        effect: Effect<A>,
        emitter: Emitter<A>,
    ) {
        let executor = self.clone();
        let throttle_id = id.clone();
        let throttled = Effect::Run(Box::new(move |outer: Emitter<A>| {
            let throttles = executor.throttles.clone();
            let progress = Arc::new(Mutex::new(ThrottleProgress::default()));
            let downstream = outer.clone();

            let upstream = Emitter::new(outer.token().child_token(), move |event| match event {
                Event::Action(value) => {
                    match throttles.offer(&throttle_id, value, scheduler.now(), interval, latest) {
                        Decision::Emit(value) => {
                            // A value deferred earlier in this run is now stale
                            lock(&progress).deferred = None;
                            downstream.send(value);
                        },
                        Decision::Defer { value, after } => {
                            let already_scheduled = {
                                let mut progress = lock(&progress);
                                progress.deferred = Some(value);
                                std::mem::replace(&mut progress.scheduled, true)
                            };
                            if already_scheduled {
                                return;
                            }
                            let handle = scheduler.schedule(
                                after,
                                Box::new(deferred_emission(
                                    throttles.clone(),
                                    throttle_id.clone(),
                                    Arc::clone(&scheduler),
                                    Arc::clone(&progress),
                                    downstream.clone(),
                                )),
                            );
                            downstream.on_cancel(move || handle.dispose());
                        },
                    }
                },
                Event::Completed(Completion::Finished) => {
                    let done = {
                        let mut progress = lock(&progress);
                        progress.upstream_done = true;
                        !progress.scheduled
                    };
                    if done {
                        downstream.finish();
                    }
                },
                Event::Completed(completion) => downstream.complete(completion),
            });

            executor.execute(effect, upstream);
        }));

        self.execute_cancellable(id, true, throttled, emitter);
    }

    fn execute_catch(&self, effect: Effect<A>, handler: FailureHandler<A>, emitter: &Emitter<A>) {
        let parent = emitter.clone();
        let handler = Mutex::new(Some(handler));
        let inner = Emitter::new(emitter.token().child_token(), move |event| match event {
            Event::Action(action) => parent.send(action),
            Event::Completed(Completion::Failed(error)) => {
                tracing::debug!(%error, "Effect failure recovered");
                let handler = handler.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(handler) = handler {
                    parent.send(handler(error));
                }
                parent.finish();
            },
            Event::Completed(completion) => parent.complete(completion),
        });
        self.execute(effect, inner);
    }
}

fn deferred_emission<A: Clone + Send + 'static>(
    throttles: ThrottleTable<A>,
    id: EffectId,
    clock: SchedulerRef,
    progress: Arc<Mutex<ThrottleProgress<A>>>,
    downstream: Emitter<A>,
) -> impl FnOnce() + Send + 'static {
    move || {
        let (value, done) = {
            let mut progress = lock(&progress);
            progress.scheduled = false;
            (progress.deferred.take(), progress.upstream_done)
        };
        if let Some(value) = value {
            throttles.emitted(&id, clock.now());
            downstream.send(value);
        }
        if done {
            downstream.finish();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "effect panicked".to_string())
}
