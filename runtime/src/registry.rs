//! Cancellation Registry - groups running effects by [`EffectId`].
//!
//! An entry exists for an identifier exactly while at least one effect
//! registered under it is running. Entries are pruned synchronously as soon
//! as the last instance under an identifier completes or is cancelled.

use crate::metrics::RegistryMetrics;
use ripple_core::{CancellationToken, EffectId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Table = HashMap<EffectId, HashMap<u64, CancellationToken>>;

/// Table mapping cancellation identifiers to the tokens of running effects.
///
/// Cloning shares the table. The lock is held only while the table is being
/// mutated, never while cancellation callbacks run, so an effect may
/// deregister itself from inside its own cancellation.
///
/// # Example
///
/// ```
/// use ripple_core::{CancellationToken, EffectId};
/// use ripple_runtime::CancellationRegistry;
///
/// let registry = CancellationRegistry::new();
/// let token = CancellationToken::new();
/// registry.register(EffectId::from("search"), token.clone());
///
/// registry.cancel(&EffectId::from("search"));
/// assert!(token.is_cancelled());
/// assert!(registry.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    table: Arc<Mutex<Table>>,
    next_instance: Arc<AtomicU64>,
}

impl CancellationRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running effect under `id`; returns its instance token
    pub fn register(&self, id: EffectId, token: CancellationToken) -> u64 {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        self.table().entry(id).or_default().insert(instance, token);
        instance
    }

    /// Remove one instance; removes the identifier with its last instance
    pub fn deregister(&self, id: &EffectId, instance: u64) {
        let mut table = self.table();
        if let Some(instances) = table.get_mut(id) {
            instances.remove(&instance);
            if instances.is_empty() {
                table.remove(id);
            }
        }
    }

    /// Cancel every effect registered under `id` and remove the entry.
    ///
    /// Idempotent: cancelling an identifier with nothing running is a no-op.
    pub fn cancel(&self, id: &EffectId) {
        let removed = self.table().remove(id);
        let Some(instances) = removed else {
            tracing::trace!(%id, "Cancel requested for inactive id");
            return;
        };

        tracing::debug!(%id, count = instances.len(), "Cancelling effects");
        RegistryMetrics::record_cancellations(instances.len());

        for token in instances.into_values() {
            token.cancel();
        }
    }

    /// Cancel each identifier independently
    pub fn cancel_all<'a>(&self, ids: impl IntoIterator<Item = &'a EffectId>) {
        for id in ids {
            self.cancel(id);
        }
    }

    /// Whether anything is running under `id`
    #[must_use]
    pub fn is_active(&self, id: &EffectId) -> bool {
        self.table().contains_key(id)
    }

    /// Number of running instances under `id`
    #[must_use]
    pub fn active_count(&self, id: &EffectId) -> usize {
        self.table().get(id).map_or(0, HashMap::len)
    }

    /// Identifiers with running effects
    #[must_use]
    pub fn active_ids(&self) -> Vec<EffectId> {
        self.table().keys().cloned().collect()
    }

    /// Whether no identifier has running effects
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("active_ids", &self.active_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister_prunes_entry() {
        let registry = CancellationRegistry::new();
        let id = EffectId::from("a");

        let first = registry.register(id.clone(), CancellationToken::new());
        let second = registry.register(id.clone(), CancellationToken::new());
        assert_eq!(registry.active_count(&id), 2);

        registry.deregister(&id, first);
        assert!(registry.is_active(&id));

        registry.deregister(&id, second);
        assert!(!registry.is_active(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = CancellationRegistry::new();
        let id = EffectId::from("a");
        let token = CancellationToken::new();
        registry.register(id.clone(), token.clone());

        registry.cancel(&id);
        registry.cancel(&id);

        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_leaves_other_ids_running() {
        let registry = CancellationRegistry::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        registry.register(EffectId::from("a"), a.clone());
        registry.register(EffectId::from("b"), b.clone());

        registry.cancel_all([&EffectId::from("a")]);

        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(registry.active_ids(), vec![EffectId::from("b")]);
    }

    #[test]
    fn test_deregister_from_cancellation_callback() {
        let registry = CancellationRegistry::new();
        let id = EffectId::from("self-removing");
        let token = CancellationToken::new();
        let instance = registry.register(id.clone(), token.clone());

        let inner = registry.clone();
        let inner_id = id.clone();
        token.on_cancel(move || inner.deregister(&inner_id, instance));

        registry.cancel(&id);
        assert!(registry.is_empty());
    }
}
