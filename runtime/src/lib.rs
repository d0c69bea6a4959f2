//! # Ripple Runtime
//!
//! Runtime implementation for the Ripple architecture.
//!
//! This crate provides the [`Store`] that serializes actions through a
//! reducer and runs the effects it returns.
//!
//! ## Core Components
//!
//! - **Store**: Owns the state and runs the dispatch loop
//! - **Effect Executor**: Interprets effect descriptions and feeds actions back
//! - **Cancellation Registry**: Groups running effects by identifier
//! - **Live Scheduler**: Wall-clock scheduling on tokio timers
//!
//! ## Example
//!
//! ```
//! use ripple_core::{Effect, Reducer, SmallVec, smallvec};
//! use ripple_runtime::Store;
//!
//! #[derive(Clone, Debug)]
//! enum Action {
//!     Increment,
//!     Add(i64),
//! }
//!
//! struct Counter;
//!
//! impl Reducer for Counter {
//!     type State = i64;
//!     type Action = Action;
//!     type Environment = ();
//!
//!     fn reduce(&self, count: &mut i64, action: Action, _env: &()) -> SmallVec<[Effect<Action>; 4]> {
//!         match action {
//!             Action::Increment => smallvec![Effect::just(Action::Add(1))],
//!             Action::Add(amount) => {
//!                 *count += amount;
//!                 smallvec![Effect::None]
//!             },
//!         }
//!     }
//! }
//!
//! let store = Store::new(0, Counter, ());
//! store.send(Action::Increment);
//!
//! // Synchronous effect output is processed before `send` returns
//! assert_eq!(store.state(|count| *count), 1);
//! ```

use ripple_core::EffectError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Effect interpretation
pub mod executor;

/// Wall-clock scheduler on tokio timers
pub mod live;

/// Prometheus metrics for observability
pub mod metrics;

/// Cancellation Registry
pub mod registry;

/// Per-identifier throttle state
pub mod throttle;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `try_send()` is called after `shutdown()`.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }

    /// Errors from scheduler construction
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum SchedulerError {
        /// No tokio runtime is available on the calling thread
        #[error("No tokio runtime available")]
        NoRuntime,
    }
}

pub use error::{SchedulerError, StoreError};
pub use executor::EffectExecutor;
pub use live::LiveScheduler;
pub use registry::CancellationRegistry;
pub use store::{Store, Subscription};
pub use throttle::ThrottleTable;

/// Dead letter queue entry
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed payload
    pub payload: T,

    /// Why it failed
    pub reason: String,

    /// When the failure was recorded
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

/// Dead Letter Queue for failures nobody handled
///
/// # Features
///
/// - Bounded queue with configurable max size
/// - FIFO ordering (oldest entries dropped when full)
/// - Thread-safe for concurrent access
///
/// # Example
///
/// ```
/// use ripple_runtime::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(2);
/// dlq.push("first", "timeout");
/// dlq.push("second", "timeout");
/// dlq.push("third", "timeout");
///
/// let entries = dlq.drain();
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[0].payload, "second");
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    /// The queue storage
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,

    /// Maximum queue size
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<DeadLetter<T>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a failure onto the queue
    ///
    /// If the queue is full, the oldest entry is dropped.
    pub fn push(&self, payload: T, reason: impl Into<String>) {
        let mut queue = self.queue();

        if self.max_size == 0 {
            return;
        }

        // Drop oldest if at capacity
        if queue.len() >= self.max_size {
            queue.pop_front();
            tracing::warn!(
                max_size = self.max_size,
                "DLQ at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            reason: reason.into(),
            failed_at: chrono::Utc::now(),
        });

        tracing::debug!(queue_size = queue.len(), "Failure added to dead letter queue");
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all entries from the queue
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let entries: Vec<_> = self.queue().drain(..).collect();
        tracing::debug!(count = entries.len(), "Drained dead letter queue");
        entries
    }

    /// Peek at the oldest entry without removing it
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue().front().cloned()
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// An effect failure no `catch` converted into an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectFailure {
    /// Store-local number of the failed effect
    pub effect: u64,
    /// The failure
    pub error: EffectError,
}

/// What the Store does with an unhandled effect failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log, count and keep it in the dead letter queue
    #[default]
    Report,
    /// Report, then panic on the thread that observed the failure
    Panic,
}

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use ripple_runtime::{CancellationRegistry, FailurePolicy, StoreConfig};
///
/// let shared = CancellationRegistry::new();
/// let config = StoreConfig::default()
///     .with_dlq_max_size(50)
///     .with_failure_policy(FailurePolicy::Panic)
///     .with_registry(shared);
/// assert_eq!(config.dlq_max_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the processed-action broadcast channel
    pub broadcast_capacity: usize,
    /// Maximum size of the dead letter queue
    pub dlq_max_size: usize,
    /// Handling of unhandled effect failures
    pub failure_policy: FailurePolicy,
    /// Registry to share with other stores; a fresh one when `None`
    pub registry: Option<CancellationRegistry>,
}

impl StoreConfig {
    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the DLQ maximum size
    #[must_use]
    pub const fn with_dlq_max_size(mut self, max_size: usize) -> Self {
        self.dlq_max_size = max_size;
        self
    }

    /// Set the failure policy
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Use `registry` instead of a store-private one
    #[must_use]
    pub fn with_registry(mut self, registry: CancellationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 16,
            dlq_max_size: 1000,
            failure_policy: FailurePolicy::Report,
            registry: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store module - the runtime for reducers
pub mod store {
    use super::{
        DeadLetterQueue, EffectFailure, FailurePolicy, StoreConfig, StoreError, lock,
    };
    use crate::executor::EffectExecutor;
    use crate::metrics::StoreMetrics;
    use crate::registry::CancellationRegistry;
    use parking_lot::ReentrantMutex;
    use ripple_core::{
        CancellationToken, Completion, Effect, EffectError, Emitter, Event, Reducer, SmallVec,
    };
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::{Duration, Instant};
    use tokio::sync::{broadcast, watch};

    type Listener<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

    struct Listeners<S> {
        next_id: u64,
        entries: Vec<(u64, Listener<S>)>,
    }

    /// State touched only by the thread holding the dispatch lock
    struct Dispatch<S, A> {
        state: RefCell<S>,
        reducing: Cell<bool>,
        notifying: Cell<bool>,
        buffered: RefCell<VecDeque<A>>,
    }

    /// Actions an effect emits while it is being started
    struct StartBuffer<A> {
        open: bool,
        actions: VecDeque<A>,
    }

    struct Shared<S, A, E, R> {
        reducer: R,
        environment: E,
        dispatch: ReentrantMutex<Dispatch<S, A>>,
        executor: EffectExecutor<A>,
        in_flight: Mutex<HashMap<u64, CancellationToken>>,
        next_effect: AtomicU64,
        listeners: Arc<Mutex<Listeners<S>>>,
        action_broadcast: broadcast::Sender<A>,
        dlq: DeadLetterQueue<EffectFailure>,
        failure_policy: FailurePolicy,
        shutdown: AtomicBool,
    }

    impl<S, A, E, R> Drop for Shared<S, A, E, R> {
        fn drop(&mut self) {
            let tokens: Vec<CancellationToken> = self
                .in_flight
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .drain()
                .map(|(_, token)| token)
                .collect();
            for token in tokens {
                token.cancel();
            }
        }
    }

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (only ever mutated by the reducer)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    ///
    /// `send` is synchronous: it returns after the action, every action
    /// emitted synchronously by the effects it started, and every action
    /// those produced in turn have been reduced. Sends from several threads
    /// are serialized through a reentrant dispatch lock. Actions emitted
    /// later, by timers or async work, re-enter through `send`.
    ///
    /// Cloning is cheap and shares the store. Dropping the last clone
    /// cancels every in-flight effect.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        shared: Arc<Shared<S, A, E, R>>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                shared: Arc::clone(&self.shared),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        ///
        /// Uses [`StoreConfig::default`].
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new store with custom configuration
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));
            let registry = config.registry.unwrap_or_default();

            Self {
                shared: Arc::new(Shared {
                    reducer,
                    environment,
                    dispatch: ReentrantMutex::new(Dispatch {
                        state: RefCell::new(initial_state),
                        reducing: Cell::new(false),
                        notifying: Cell::new(false),
                        buffered: RefCell::new(VecDeque::new()),
                    }),
                    executor: EffectExecutor::new(registry),
                    in_flight: Mutex::new(HashMap::new()),
                    next_effect: AtomicU64::new(0),
                    listeners: Arc::new(Mutex::new(Listeners {
                        next_id: 0,
                        entries: Vec::new(),
                    })),
                    action_broadcast,
                    dlq: DeadLetterQueue::new(config.dlq_max_size),
                    failure_policy: config.failure_policy,
                    shutdown: AtomicBool::new(false),
                }),
            }
        }

        /// Send an action to the store
        ///
        /// Runs the dispatch loop to quiescence. An action sent after
        /// [`shutdown`](Self::shutdown) is logged and discarded; use
        /// [`try_send`](Self::try_send) to observe the rejection.
        ///
        /// A send issued while the reducer itself is running is a programmer
        /// error: it is logged, counted, and the action is processed right
        /// after the running reducer returns.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub fn send(&self, action: A) {
            if let Err(error) = self.try_send(action) {
                tracing::warn!(%error, "Action rejected");
            }
        }

        /// Send an action, failing once the store is shut down
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
        pub fn try_send(&self, action: A) -> Result<(), StoreError> {
            if self.shared.shutdown.load(Ordering::Acquire) {
                StoreMetrics::record_rejected();
                return Err(StoreError::ShutdownInProgress);
            }

            let dispatch = self.shared.dispatch.lock();

            if dispatch.reducing.get() {
                tracing::error!(
                    "Action sent while the reducer is running; processed after it returns"
                );
                StoreMetrics::record_reentrant_send();
                dispatch.buffered.borrow_mut().push_back(action);
                return Ok(());
            }

            if dispatch.notifying.get() {
                tracing::trace!("Action sent from a state subscriber; buffered");
                dispatch.buffered.borrow_mut().push_back(action);
                return Ok(());
            }

            self.run(&dispatch, VecDeque::from([action]));
            Ok(())
        }

        fn run(&self, dispatch: &Dispatch<S, A>, mut queue: VecDeque<A>) {
            while let Some(action) = next_action(dispatch, &mut queue) {
                self.process(dispatch, action, &mut queue);
            }
        }

        fn process(&self, dispatch: &Dispatch<S, A>, action: A, queue: &mut VecDeque<A>) {
            tracing::trace!("Processing action");

            let observed =
                (self.shared.action_broadcast.receiver_count() > 0).then(|| action.clone());

            let started = Instant::now();
            let effects = {
                let mut state = dispatch.state.borrow_mut();
                dispatch.reducing.set(true);
                let effects = self
                    .shared
                    .reducer
                    .reduce(&mut state, action, &self.shared.environment);
                dispatch.reducing.set(false);
                effects
            };
            StoreMetrics::record_action(started.elapsed());

            if let Some(observed) = observed {
                // No receivers left is fine
                let _ = self.shared.action_broadcast.send(observed);
            }

            self.notify(dispatch);
            self.start_effects(effects, queue);
        }

        fn start_effects(&self, effects: SmallVec<[Effect<A>; 4]>, queue: &mut VecDeque<A>) {
            let mut effects: Vec<Effect<A>> =
                effects.into_iter().filter(|effect| !effect.is_none()).collect();
            let effect = if effects.len() > 1 {
                Effect::Parallel(effects)
            } else {
                let Some(effect) = effects.pop() else {
                    return;
                };
                effect
            };

            let id = self.shared.next_effect.fetch_add(1, Ordering::Relaxed);
            let token = CancellationToken::new();
            lock(&self.shared.in_flight).insert(id, token.clone());
            StoreMetrics::record_effect_started();
            tracing::trace!(effect = id, "Starting effect");

            let buffer = Arc::new(Mutex::new(StartBuffer {
                open: true,
                actions: VecDeque::new(),
            }));
            let sink = self.effect_sink(id, Arc::clone(&buffer));
            self.shared.executor.execute(effect, Emitter::new(token, sink));

            let emitted = {
                let mut buffer = lock(&buffer);
                buffer.open = false;
                std::mem::take(&mut buffer.actions)
            };
            queue.extend(emitted);
        }

        fn effect_sink(
            &self,
            id: u64,
            buffer: Arc<Mutex<StartBuffer<A>>>,
        ) -> impl Fn(Event<A>) + Send + Sync + 'static {
            let shared = Arc::downgrade(&self.shared);
            move |event| {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let store = Self { shared };

                match event {
                    Event::Action(action) => {
                        {
                            let mut buffer = lock(&buffer);
                            if buffer.open {
                                buffer.actions.push_back(action);
                                return;
                            }
                        }
                        store.send(action);
                    },
                    Event::Completed(completion) => store.effect_completed(id, completion),
                }
            }
        }

        fn effect_completed(&self, id: u64, completion: Completion) {
            lock(&self.shared.in_flight).remove(&id);

            match completion {
                Completion::Finished => tracing::trace!(effect = id, "Effect finished"),
                Completion::Cancelled => tracing::trace!(effect = id, "Effect cancelled"),
                Completion::Failed(error) => self.report_failure(id, error),
            }
        }

        fn report_failure(&self, id: u64, error: EffectError) {
            tracing::error!(effect = id, %error, "Unhandled effect failure");
            StoreMetrics::record_effect_failed();
            self.shared.dlq.push(
                EffectFailure {
                    effect: id,
                    error: error.clone(),
                },
                error.to_string(),
            );

            if self.shared.failure_policy == FailurePolicy::Panic {
                #[allow(clippy::panic)] // Opt-in escalation for test harnesses
                {
                    panic!("unhandled effect failure: {error}");
                }
            }
        }

        fn notify(&self, dispatch: &Dispatch<S, A>) {
            let listeners: Vec<(u64, Listener<S>)> = lock(&self.shared.listeners)
                .entries
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect();
            if listeners.is_empty() {
                return;
            }

            dispatch.notifying.set(true);
            let mut stale = Vec::new();
            {
                let state = dispatch.state.borrow();
                for (id, listener) in &listeners {
                    if !listener(&state) {
                        stale.push(*id);
                    }
                }
            }
            dispatch.notifying.set(false);

            if !stale.is_empty() {
                lock(&self.shared.listeners)
                    .entries
                    .retain(|(id, _)| !stale.contains(id));
            }
        }

        /// Read the current state
        ///
        /// Blocks while another thread is dispatching.
        ///
        /// # Panics
        ///
        /// Panics if called from inside the reducer.
        pub fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let dispatch = self.shared.dispatch.lock();
            let state = dispatch.state.borrow();
            f(&state)
        }

        fn insert_listener(&self, listener: Listener<S>) -> u64 {
            let mut listeners = lock(&self.shared.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, listener));
            id
        }

        /// Observe state: `listener` receives the current state now and after
        /// every reducer invocation
        ///
        /// Actions sent from a listener are processed once all listeners
        /// have been notified.
        ///
        /// # Panics
        ///
        /// Panics if called from inside the reducer.
        pub fn subscribe(&self, listener: impl Fn(&S) + Send + Sync + 'static) -> Subscription {
            let dispatch = self.shared.dispatch.lock();

            dispatch.notifying.set(true);
            listener(&dispatch.state.borrow());
            dispatch.notifying.set(false);

            let id = self.insert_listener(Arc::new(move |state| {
                listener(state);
                true
            }));
            self.run(&dispatch, VecDeque::new());

            let listeners = Arc::downgrade(&self.shared.listeners);
            Subscription::new(move || {
                if let Some(listeners) = listeners.upgrade() {
                    lock(&listeners).entries.retain(|(entry, _)| *entry != id);
                }
            })
        }

        /// Like [`subscribe`](Self::subscribe), skipping states
        /// `is_duplicate` considers equal to the last one delivered
        pub fn subscribe_with(
            &self,
            is_duplicate: impl Fn(&S, &S) -> bool + Send + Sync + 'static,
            listener: impl Fn(&S) + Send + Sync + 'static,
        ) -> Subscription
        where
            S: Clone,
        {
            let last: Mutex<Option<S>> = Mutex::new(None);
            self.subscribe(move |state| {
                {
                    let mut last = lock(&last);
                    if last.as_ref().is_some_and(|previous| is_duplicate(previous, state)) {
                        return;
                    }
                    *last = Some(state.clone());
                }
                listener(state);
            })
        }

        /// Like [`subscribe`](Self::subscribe), skipping unchanged states
        pub fn subscribe_distinct(
            &self,
            listener: impl Fn(&S) + Send + Sync + 'static,
        ) -> Subscription
        where
            S: Clone + PartialEq,
        {
            self.subscribe_with(|previous: &S, current: &S| previous == current, listener)
        }

        /// Observe a projection of the state, delivered when it changes
        pub fn subscribe_scoped<L>(
            &self,
            project: impl Fn(&S) -> L + Send + Sync + 'static,
            listener: impl Fn(&L) + Send + Sync + 'static,
        ) -> Subscription
        where
            L: PartialEq + Send + 'static,
        {
            let last: Mutex<Option<L>> = Mutex::new(None);
            self.subscribe(move |state| {
                let value = project(state);
                if lock(&last).as_ref() == Some(&value) {
                    return;
                }
                listener(&value);
                *lock(&last) = Some(value);
            })
        }

        /// Latest state as a `watch` channel
        ///
        /// The store stops publishing once every receiver is dropped.
        #[must_use]
        pub fn watch(&self) -> watch::Receiver<S>
        where
            S: Clone + Sync,
        {
            let dispatch = self.shared.dispatch.lock();
            let current = dispatch.state.borrow().clone();
            let (tx, rx) = watch::channel(current);

            self.insert_listener(Arc::new(move |state: &S| {
                if tx.is_closed() {
                    return false;
                }
                tx.send_replace(state.clone());
                true
            }));
            rx
        }

        /// Subscribe to every action the reducer processes
        ///
        /// # Notes
        ///
        /// - Includes actions sent by callers as well as those produced by effects
        /// - If the receiver lags, it skips old actions and receives `RecvError::Lagged`
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.shared.action_broadcast.subscribe()
        }

        /// Send an action and wait for a processed action matching `predicate`
        ///
        /// The sent action itself is offered to `predicate` as well.
        ///
        /// # Errors
        ///
        /// - [`StoreError::ShutdownInProgress`] if the store is shut down
        /// - [`StoreError::Timeout`] if no matching action arrives in time
        /// - [`StoreError::ChannelClosed`] if the broadcast channel closed
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            // Subscribe BEFORE sending to avoid race condition
            let mut rx = self.shared.action_broadcast.subscribe();

            self.try_send(action)?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// The environment handed to the reducer
        #[must_use]
        pub fn environment(&self) -> &E {
            &self.shared.environment
        }

        /// Number of effects started by this store that are still running
        #[must_use]
        pub fn in_flight_effects(&self) -> usize {
            lock(&self.shared.in_flight).len()
        }

        /// The Cancellation Registry this store's effects register with
        #[must_use]
        pub fn registry(&self) -> &CancellationRegistry {
            self.shared.executor.registry()
        }

        /// Unhandled effect failures
        #[must_use]
        pub fn dead_letters(&self) -> DeadLetterQueue<EffectFailure> {
            self.shared.dlq.clone()
        }

        /// Cancel every in-flight effect and reject further sends
        ///
        /// Idempotent.
        pub fn shutdown(&self) {
            if self.shared.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }

            let tokens: Vec<CancellationToken> = lock(&self.shared.in_flight)
                .drain()
                .map(|(_, token)| token)
                .collect();
            tracing::info!(effects = tokens.len(), "Store shutting down");

            for token in tokens {
                token.cancel();
            }
        }

        /// Whether [`shutdown`](Self::shutdown) has been called
        #[must_use]
        pub fn is_shutdown(&self) -> bool {
            self.shared.shutdown.load(Ordering::Acquire)
        }
    }

    fn next_action<S, A>(dispatch: &Dispatch<S, A>, queue: &mut VecDeque<A>) -> Option<A> {
        let buffered = dispatch.buffered.borrow_mut().pop_front();
        buffered.or_else(|| queue.pop_front())
    }

    /// Handle for a state subscription; unsubscribes when dropped
    #[must_use = "dropping a Subscription unsubscribes immediately"]
    pub struct Subscription {
        unsubscribe: Option<Box<dyn FnOnce() + Send>>,
    }

    impl Subscription {
        fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
            Self {
                unsubscribe: Some(Box::new(unsubscribe)),
            }
        }

        /// Stop receiving updates
        pub fn cancel(mut self) {
            if let Some(unsubscribe) = self.unsubscribe.take() {
                unsubscribe();
            }
        }
    }

    impl Drop for Subscription {
        fn drop(&mut self) {
            if let Some(unsubscribe) = self.unsubscribe.take() {
                unsubscribe();
            }
        }
    }

    impl std::fmt::Debug for Subscription {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Subscription")
                .field("active", &self.unsubscribe.is_some())
                .finish()
        }
    }
}
