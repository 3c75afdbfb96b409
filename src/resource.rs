//! Resource adapter contract: the hooks a physical resource implements.

use crate::definition::TransactionDefinition;
use crate::error::{Result, TransactionError};

/// Strategy implemented by a resource-specific backend (a database
/// connection, an embedded engine, a message broker session).
///
/// The engine drives the begin/commit/rollback protocol exclusively through
/// these hooks; it never touches the physical resource directly. Hooks with
/// default implementations are optional capabilities: suspension and
/// savepoints fail by default, and adapters opt in by overriding them.
pub trait ResourceAdapter {
    /// Opaque physical transaction handle.
    type Transaction;
    /// Token produced by detaching a transaction's physical resource.
    type Suspended;
    /// Resource-level savepoint marker.
    type Savepoint;

    /// Creates a fresh, not-yet-begun transaction handle.
    fn new_transaction(&self) -> Result<Self::Transaction>;

    /// Whether a scope-bound handle represents a live transaction. A bound
    /// handle counts as live unless the adapter says otherwise.
    fn is_existing(&self, _transaction: &Self::Transaction) -> bool {
        true
    }

    /// Physically begins the transaction. The definition's isolation,
    /// read-only flag, and timeout are advisory metadata for the resource.
    fn begin(
        &self,
        transaction: &mut Self::Transaction,
        definition: &TransactionDefinition,
    ) -> Result<()>;

    /// Physically commits the transaction.
    fn commit(&self, transaction: &mut Self::Transaction) -> Result<()>;

    /// Physically rolls the transaction back.
    fn rollback(&self, transaction: &mut Self::Transaction) -> Result<()>;

    /// Marks a participating transaction as doomed: the top-level completer
    /// must roll it back.
    fn set_rollback_only(&self, transaction: &mut Self::Transaction) -> Result<()>;

    /// Whether the transaction carries a global rollback-only marker, set by
    /// something other than the current status (e.g. a participating nested
    /// failure).
    fn is_rollback_only(&self, _transaction: &Self::Transaction) -> bool {
        false
    }

    /// Detaches the transaction's physical resource so another transaction
    /// can run in the same scope.
    fn suspend(&self, _transaction: &mut Self::Transaction) -> Result<Self::Suspended> {
        Err(TransactionError::SuspensionNotSupported)
    }

    /// Reattaches a previously suspended physical resource.
    fn resume(
        &self,
        _transaction: &mut Self::Transaction,
        _suspended: Self::Suspended,
    ) -> Result<()> {
        Err(TransactionError::SuspensionNotSupported)
    }

    /// Whether the resource can create savepoints within a transaction.
    fn supports_savepoints(&self) -> bool {
        false
    }

    /// Creates a savepoint within the transaction.
    fn create_savepoint(&self, _transaction: &mut Self::Transaction) -> Result<Self::Savepoint> {
        Err(TransactionError::NestedNotSupported(
            "underlying resource does not support savepoints".to_string(),
        ))
    }

    /// Rolls the transaction back to the given savepoint.
    fn rollback_to_savepoint(
        &self,
        _transaction: &mut Self::Transaction,
        _savepoint: &Self::Savepoint,
    ) -> Result<()> {
        Err(TransactionError::NestedNotSupported(
            "underlying resource does not support savepoints".to_string(),
        ))
    }

    /// Releases a savepoint that is no longer needed.
    fn release_savepoint(
        &self,
        _transaction: &mut Self::Transaction,
        _savepoint: Self::Savepoint,
    ) -> Result<()> {
        Err(TransactionError::NestedNotSupported(
            "underlying resource does not support savepoints".to_string(),
        ))
    }

    /// Resets resource state on a finished transaction after completion.
    fn cleanup(&self, _transaction: &mut Self::Transaction) {}
}
