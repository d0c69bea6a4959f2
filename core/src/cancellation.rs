//! Cooperative cancellation tokens.
//!
//! Every running effect owns a [`CancellationToken`]. Cancelling the token
//! disposes the effect's resources synchronously (through callbacks
//! registered with [`CancellationToken::on_cancel`]) and wakes async tasks
//! waiting on [`CancellationToken::cancelled`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

type Callback = Box<dyn FnOnce() + Send>;

/// Cloneable cancellation signal shared between an effect and its owner.
///
/// # Example
///
/// ```
/// use ripple_core::CancellationToken;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let token = CancellationToken::new();
/// let disposed = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&disposed);
/// token.on_cancel(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// token.cancel();
/// token.cancel();
/// assert!(token.is_cancelled());
/// assert_eq!(disposed.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
    notify: Notify,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`cancel`](Self::cancel) has been called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancel the token.
    ///
    /// Registered callbacks run exactly once, on the calling thread, after
    /// the internal lock has been released. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let callbacks = std::mem::take(
            &mut *self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for callback in callbacks {
            callback();
        }

        self.inner.notify.notify_waiters();
    }

    /// Register work to run when the token is cancelled.
    ///
    /// Runs immediately if the token is already cancelled.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut callbacks = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_cancelled() {
                callbacks.push(Box::new(callback));
                return;
            }
        }

        callback();
    }

    /// Create a token that is cancelled whenever this one is.
    ///
    /// Cancelling the child does not affect the parent.
    #[must_use]
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let linked = child.clone();
        self.on_cancel(move || linked.cancel());
        child
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        let mut notified = std::pin::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }

        notified.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
