//! The sending side of a running effect.

use crate::cancellation::CancellationToken;
use crate::error::EffectError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a running effect terminated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The effect ran to completion
    Finished,
    /// The effect failed
    Failed(EffectError),
    /// The effect was cancelled before it finished
    Cancelled,
}

/// Everything a running effect reports to its observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<A> {
    /// An action produced by the effect
    Action(A),
    /// Terminal event; delivered exactly once
    Completed(Completion),
}

impl<A> Event<A> {
    /// Transform the carried action, leaving terminal events untouched
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Event<B> {
        match self {
            Self::Action(action) => Event::Action(f(action)),
            Self::Completed(completion) => Event::Completed(completion),
        }
    }
}

type Sink<A> = Arc<dyn Fn(Event<A>) + Send + Sync>;

struct Lifetime {
    token: CancellationToken,
    terminated: AtomicBool,
}

/// Handle given to a running effect for reporting actions and completion.
///
/// Guarantees:
/// - exactly one terminal [`Event::Completed`] reaches the sink
/// - actions sent after termination or cancellation are dropped
/// - terminating releases the token, so resources registered with
///   [`on_cancel`](Self::on_cancel) are disposed on every exit path
pub struct Emitter<A> {
    sink: Sink<A>,
    lifetime: Arc<Lifetime>,
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            lifetime: Arc::clone(&self.lifetime),
        }
    }
}

impl<A: 'static> Emitter<A> {
    /// Create an emitter bound to `token`, reporting into `sink`.
    ///
    /// Cancelling `token` delivers [`Completion::Cancelled`] unless the
    /// emitter already terminated.
    pub fn new(token: CancellationToken, sink: impl Fn(Event<A>) + Send + Sync + 'static) -> Self {
        let sink: Sink<A> = Arc::new(sink);
        let lifetime = Arc::new(Lifetime {
            token: token.clone(),
            terminated: AtomicBool::new(false),
        });

        let on_cancel_sink = Arc::clone(&sink);
        let on_cancel_lifetime = Arc::clone(&lifetime);
        token.on_cancel(move || {
            if !on_cancel_lifetime.terminated.swap(true, Ordering::AcqRel) {
                on_cancel_sink(Event::Completed(Completion::Cancelled));
            }
        });

        Self { sink, lifetime }
    }

    /// Deliver an action
    pub fn send(&self, action: A) {
        if self.is_terminated() || self.lifetime.token.is_cancelled() {
            return;
        }
        (self.sink)(Event::Action(action));
    }

    /// Complete normally
    pub fn finish(&self) {
        self.complete(Completion::Finished);
    }

    /// Complete with a failure
    pub fn fail(&self, error: EffectError) {
        self.complete(Completion::Failed(error));
    }

    /// Terminate with an explicit completion.
    ///
    /// Ignored if the emitter already terminated.
    pub fn complete(&self, completion: Completion) {
        if self.lifetime.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifetime.token.cancel();
        (self.sink)(Event::Completed(completion));
    }

    /// Whether a terminal event has been delivered
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.lifetime.terminated.load(Ordering::Acquire)
    }

    /// Whether the work should stop
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lifetime.token.is_cancelled()
    }

    /// Token governing this effect's lifetime
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.lifetime.token
    }

    /// Register a disposer for resources the effect holds
    pub fn on_cancel(&self, dispose: impl FnOnce() + Send + 'static) {
        self.lifetime.token.on_cancel(dispose);
    }

    /// Emitter for a producer of `S` values feeding this emitter through `f`.
    ///
    /// Lifetime and terminal state are shared with `self`.
    #[must_use]
    pub fn contramap<S: 'static>(&self, f: impl Fn(S) -> A + Send + Sync + 'static) -> Emitter<S> {
        let sink = Arc::clone(&self.sink);
        Emitter {
            sink: Arc::new(move |event: Event<S>| sink(event.map(&f))),
            lifetime: Arc::clone(&self.lifetime),
        }
    }
}

impl<A> std::fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("terminated", &self.lifetime.terminated.load(Ordering::Acquire))
            .field("token", &self.lifetime.token)
            .finish_non_exhaustive()
    }
}
