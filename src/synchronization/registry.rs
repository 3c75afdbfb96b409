//! Per-scope synchronization registry.

use std::sync::Arc;

use crate::definition::Isolation;
use crate::error::{Result, TransactionError};

use super::callback::TransactionSynchronization;

/// Shared handle to a registered synchronization callback.
pub type SharedSynchronization = Arc<dyn TransactionSynchronization>;

/// Mutable per-scope state: the active callback list plus the exposed
/// characteristics of the current transaction.
///
/// A registry belongs to exactly one scope at a time. Ownership of its
/// contents transfers through suspend/resume; it is never copied between
/// scopes. The callback list is ordered by priority at read time, not at
/// insert time.
#[derive(Default)]
pub struct SynchronizationRegistry {
    /// `Some` while synchronization is active for the scope.
    synchronizations: Option<Vec<SharedSynchronization>>,
    transaction_name: Option<String>,
    read_only: bool,
    isolation: Option<Isolation>,
    actual_transaction_active: bool,
}

impl SynchronizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether synchronization is active for the scope.
    pub fn is_synchronization_active(&self) -> bool {
        self.synchronizations.is_some()
    }

    /// Activates synchronization with an empty callback list.
    pub fn init_synchronization(&mut self) -> Result<()> {
        if self.synchronizations.is_some() {
            return Err(TransactionError::IllegalState(
                "cannot activate transaction synchronization - already active".to_string(),
            ));
        }
        self.synchronizations = Some(Vec::new());
        Ok(())
    }

    /// Registers a callback for the current scope. Fails when no
    /// synchronization is active. Registering the same callback (by pointer
    /// identity) twice is a no-op.
    pub fn register(&mut self, synchronization: SharedSynchronization) -> Result<()> {
        let list = self.synchronizations.as_mut().ok_or_else(|| {
            TransactionError::IllegalState(
                "transaction synchronization is not active".to_string(),
            )
        })?;
        if !list.iter().any(|s| Arc::ptr_eq(s, &synchronization)) {
            list.push(synchronization);
        }
        Ok(())
    }

    /// Returns a copy of the callback list sorted by priority. The copy
    /// freezes the iteration: callbacks registering further synchronizations
    /// cannot affect an in-flight trigger.
    pub fn snapshot(&self) -> Vec<SharedSynchronization> {
        let mut list = self
            .synchronizations
            .as_ref()
            .cloned()
            .unwrap_or_default();
        list.sort_by_key(|s| s.order());
        list
    }

    /// Detaches the callback list sorted by priority, deactivating
    /// synchronization. Returns an empty list when none was active.
    pub(crate) fn take_synchronizations(&mut self) -> Vec<SharedSynchronization> {
        let mut list = self.synchronizations.take().unwrap_or_default();
        list.sort_by_key(|s| s.order());
        list
    }

    /// Detaches the callback list in registration order, for suspension.
    pub(crate) fn detach_synchronizations(&mut self) -> Option<Vec<SharedSynchronization>> {
        self.synchronizations.take()
    }

    /// Reattaches a previously detached callback list.
    pub(crate) fn restore_synchronizations(&mut self, list: Vec<SharedSynchronization>) {
        self.synchronizations = Some(list);
    }

    /// Name of the current transaction, if any.
    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction_name.as_deref()
    }

    pub(crate) fn set_transaction_name(&mut self, name: Option<String>) {
        self.transaction_name = name;
    }

    /// Whether the current transaction is read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Isolation level of the current transaction, if explicitly set.
    pub fn isolation(&self) -> Option<Isolation> {
        self.isolation
    }

    pub(crate) fn set_isolation(&mut self, isolation: Option<Isolation>) {
        self.isolation = isolation;
    }

    /// Whether an actual physical transaction is active for the scope, as
    /// opposed to a synchronization-only scope.
    pub fn is_actual_transaction_active(&self) -> bool {
        self.actual_transaction_active
    }

    pub(crate) fn set_actual_transaction_active(&mut self, active: bool) {
        self.actual_transaction_active = active;
    }

    /// Resets the registry to its inactive state.
    pub(crate) fn clear(&mut self) {
        self.synchronizations = None;
        self.transaction_name = None;
        self.read_only = false;
        self.isolation = None;
        self.actual_transaction_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ordered(i32);

    impl TransactionSynchronization for Ordered {
        fn order(&self) -> i32 {
            self.0
        }
    }

    #[test]
    fn test_register_requires_active_synchronization() {
        let mut registry = SynchronizationRegistry::new();
        let sync: SharedSynchronization = Arc::new(Ordered(0));

        assert!(matches!(
            registry.register(sync.clone()),
            Err(TransactionError::IllegalState(_))
        ));

        registry.init_synchronization().unwrap();
        registry.register(sync).unwrap();
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_init_twice_fails() {
        let mut registry = SynchronizationRegistry::new();
        registry.init_synchronization().unwrap();
        assert!(matches!(
            registry.init_synchronization(),
            Err(TransactionError::IllegalState(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        let mut registry = SynchronizationRegistry::new();
        registry.init_synchronization().unwrap();

        let sync: SharedSynchronization = Arc::new(Ordered(0));
        registry.register(sync.clone()).unwrap();
        registry.register(sync).unwrap();

        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_snapshot_sorted_by_order_at_read_time() {
        let mut registry = SynchronizationRegistry::new();
        registry.init_synchronization().unwrap();

        let late: SharedSynchronization = Arc::new(Ordered(10));
        let early: SharedSynchronization = Arc::new(Ordered(-10));
        registry.register(late.clone()).unwrap();
        registry.register(early.clone()).unwrap();

        let snapshot = registry.snapshot();
        assert!(Arc::ptr_eq(&snapshot[0], &early));
        assert!(Arc::ptr_eq(&snapshot[1], &late));
    }

    #[test]
    fn test_take_deactivates() {
        let mut registry = SynchronizationRegistry::new();
        registry.init_synchronization().unwrap();
        registry.register(Arc::new(Ordered(0))).unwrap();

        let taken = registry.take_synchronizations();
        assert_eq!(taken.len(), 1);
        assert!(!registry.is_synchronization_active());
        assert!(registry.take_synchronizations().is_empty());
    }

    #[test]
    fn test_clear_resets_characteristics() {
        let mut registry = SynchronizationRegistry::new();
        registry.init_synchronization().unwrap();
        registry.set_transaction_name(Some("tx".to_string()));
        registry.set_read_only(true);
        registry.set_isolation(Some(Isolation::Serializable));
        registry.set_actual_transaction_active(true);

        registry.clear();
        assert!(!registry.is_synchronization_active());
        assert!(registry.transaction_name().is_none());
        assert!(!registry.is_read_only());
        assert!(registry.isolation().is_none());
        assert!(!registry.is_actual_transaction_active());
    }
}
