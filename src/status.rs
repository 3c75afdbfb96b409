//! Per-attempt transaction status handles.

use std::fmt;

use crate::context::SharedTransaction;
use crate::definition::Isolation;
use crate::error::{Result, TransactionError};
use crate::resource::ResourceAdapter;
use crate::synchronization::SharedSynchronization;

/// Scope state captured by suspending a transaction, so that resume can
/// restore the scope to its exact prior appearance: the physical suspended
/// resource token, the detached transaction handle, the full prior
/// synchronization list, and the prior registry characteristics.
pub struct SuspendedResourcesHolder<A: ResourceAdapter> {
    pub(crate) resource: Option<A::Suspended>,
    pub(crate) transaction: Option<SharedTransaction<A>>,
    pub(crate) synchronizations: Option<Vec<SharedSynchronization>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<Isolation>,
    pub(crate) was_active: bool,
}

// The adapter's associated types are opaque; print presence only.
impl<A: ResourceAdapter> fmt::Debug for SuspendedResourcesHolder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedResourcesHolder")
            .field("has_resource", &self.resource.is_some())
            .field("has_transaction", &self.transaction.is_some())
            .field(
                "synchronizations",
                &self.synchronizations.as_ref().map(Vec::len),
            )
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("isolation", &self.isolation)
            .field("was_active", &self.was_active)
            .finish()
    }
}

/// Handle returned to the caller for one transaction attempt.
///
/// Created by `get_transaction`, mutated only by the coordinator (savepoint,
/// completion) and by the caller through [`set_rollback_only`]. Once
/// completed, the status is inert: any further commit or rollback is a
/// programming error and fails with
/// [`IllegalState`](TransactionError::IllegalState).
///
/// [`set_rollback_only`]: TransactionStatus::set_rollback_only
pub struct TransactionStatus<A: ResourceAdapter> {
    pub(crate) transaction: Option<SharedTransaction<A>>,
    pub(crate) new_transaction: bool,
    pub(crate) new_synchronization: bool,
    pub(crate) read_only: bool,
    pub(crate) rollback_only: bool,
    pub(crate) completed: bool,
    pub(crate) savepoint: Option<A::Savepoint>,
    pub(crate) suspended: Option<SuspendedResourcesHolder<A>>,
    /// Whether completion of this status unbinds the transaction from the
    /// scope. True for statuses that physically began and bound a fresh
    /// transaction; false for participants and savepoint scopes.
    pub(crate) owns_binding: bool,
}

impl<A: ResourceAdapter> TransactionStatus<A> {
    pub(crate) fn new(
        transaction: Option<SharedTransaction<A>>,
        new_transaction: bool,
        new_synchronization: bool,
        read_only: bool,
        suspended: Option<SuspendedResourcesHolder<A>>,
    ) -> Self {
        Self {
            transaction,
            new_transaction,
            new_synchronization,
            read_only,
            rollback_only: false,
            completed: false,
            savepoint: None,
            suspended,
            owns_binding: new_transaction,
        }
    }

    /// Whether this status started the physical transaction, as opposed to
    /// participating in an existing one.
    pub fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Whether this status owns the synchronization scope.
    pub fn is_new_synchronization(&self) -> bool {
        self.new_synchronization
    }

    /// Whether a physical transaction backs this status.
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// The shared transaction handle, for collaborators that need resource
    /// access within the transaction.
    pub fn transaction(&self) -> Option<&SharedTransaction<A>> {
        self.transaction.as_ref()
    }

    /// Whether this status holds a savepoint (nested scope).
    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the caller has marked this status rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Marks the transaction attempt rollback-only: commit will perform a
    /// rollback instead, and a participating attempt will escalate the
    /// marker to the enclosing transaction on completion.
    pub fn set_rollback_only(&mut self) -> Result<()> {
        if self.completed {
            return Err(TransactionError::IllegalState(
                "transaction is already completed - cannot set rollback-only".to_string(),
            ));
        }
        self.rollback_only = true;
        Ok(())
    }
}

impl<A: ResourceAdapter> fmt::Debug for TransactionStatus<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("has_transaction", &self.transaction.is_some())
            .field("new_transaction", &self.new_transaction)
            .field("new_synchronization", &self.new_synchronization)
            .field("read_only", &self.read_only)
            .field("rollback_only", &self.rollback_only)
            .field("completed", &self.completed)
            .field("has_savepoint", &self.savepoint.is_some())
            .field("suspended", &self.suspended)
            .field("owns_binding", &self.owns_binding)
            .finish()
    }
}
