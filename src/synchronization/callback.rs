//! Lifecycle callbacks observing transaction completion.

use crate::error::Result;

/// Default ordering priority for synchronizations.
pub const ORDER_DEFAULT: i32 = 0;

/// Outcome reported to [`TransactionSynchronization::after_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
    /// Completion state is unknown (a physical operation failed mid-way).
    Unknown,
}

/// Callback object registered to observe transaction lifecycle events,
/// independent of the core commit/rollback logic.
///
/// All methods have no-op defaults; implementors override the events they
/// care about. Callbacks run on the scope that registered them.
pub trait TransactionSynchronization {
    /// Ordering priority; lower values run earlier. Ties preserve
    /// registration order.
    fn order(&self) -> i32 {
        ORDER_DEFAULT
    }

    /// Called when the owning scope is suspended.
    fn suspend(&self) {}

    /// Called when the owning scope is resumed.
    fn resume(&self) {}

    /// Flushes pending state to the underlying resource, if applicable.
    fn flush(&self) {}

    /// Called before a commit is attempted. An error here vetoes the commit
    /// and forces a rollback.
    fn before_commit(&self, _read_only: bool) -> Result<()> {
        Ok(())
    }

    /// Called before completion on both the commit and the rollback path.
    /// Errors are logged, not propagated.
    fn before_completion(&self) -> Result<()> {
        Ok(())
    }

    /// Called after a successful physical commit, before `after_completion`.
    fn after_commit(&self) -> Result<()> {
        Ok(())
    }

    /// Called exactly once after completion, on every path. Errors are
    /// logged, not propagated.
    fn after_completion(&self, _status: CompletionStatus) -> Result<()> {
        Ok(())
    }
}
