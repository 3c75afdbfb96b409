//! Execution-scope context, carrying transaction state explicitly.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::resource::ResourceAdapter;
use crate::synchronization::SynchronizationRegistry;

/// Shared handle to the physical transaction object bound to a scope.
pub type SharedTransaction<A> = Arc<Mutex<<A as ResourceAdapter>::Transaction>>;

/// Per-scope transaction state, passed explicitly through the engine.
///
/// This replaces ambient per-thread storage: the "current scope" is whatever
/// context the caller threads through `get_transaction`/`commit`/`rollback`.
/// One context exists per logical unit of execution; concurrent scopes never
/// share a context. The bound transaction handle moves between scopes only
/// through suspend/resume.
pub struct TransactionContext<A: ResourceAdapter> {
    registry: SynchronizationRegistry,
    current: Option<SharedTransaction<A>>,
}

impl<A: ResourceAdapter> TransactionContext<A> {
    pub fn new() -> Self {
        Self {
            registry: SynchronizationRegistry::new(),
            current: None,
        }
    }

    /// The scope's synchronization registry.
    pub fn registry(&self) -> &SynchronizationRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SynchronizationRegistry {
        &mut self.registry
    }

    /// The transaction handle currently bound to the scope, if any.
    pub fn current_transaction(&self) -> Option<&SharedTransaction<A>> {
        self.current.as_ref()
    }

    /// Whether a transaction handle is bound to the scope.
    pub fn has_transaction(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn bind(&mut self, transaction: SharedTransaction<A>) {
        self.current = Some(transaction);
    }

    pub(crate) fn unbind(&mut self) -> Option<SharedTransaction<A>> {
        self.current.take()
    }
}

impl<A: ResourceAdapter> Default for TransactionContext<A> {
    fn default() -> Self {
        Self::new()
    }
}
