//! Transaction manager facade and policy configuration.

use log::error;

use crate::context::TransactionContext;
use crate::definition::{TransactionDefinition, WorkFailure};
use crate::error::{Result, TransactionError};
use crate::resource::ResourceAdapter;
use crate::status::TransactionStatus;

/// When the engine activates a synchronization scope for a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizationPolicy {
    /// Activate synchronization for every status, even ones not backed by a
    /// physical transaction.
    Always,
    /// Activate synchronization only for statuses backed by an actual
    /// physical transaction.
    OnActualTransaction,
    /// Never activate synchronization.
    Never,
}

/// Drives the begin/commit/rollback protocol for a resource adapter.
///
/// The manager is stateless between calls: all scope state lives in the
/// [`TransactionContext`] the caller threads through each operation, so one
/// manager can serve any number of concurrent scopes.
pub struct TransactionManager<A: ResourceAdapter> {
    pub(crate) adapter: A,
    pub(crate) synchronization: SynchronizationPolicy,
    pub(crate) nested_allowed: bool,
    pub(crate) validate_existing: bool,
    pub(crate) commit_on_global_rollback_only: bool,
    pub(crate) fail_early_on_global_rollback_only: bool,
    pub(crate) rollback_on_participation_failure: bool,
    pub(crate) rollback_on_commit_failure: bool,
}

impl<A: ResourceAdapter> TransactionManager<A> {
    /// Creates a manager with default policies: synchronization always on,
    /// nested transactions disallowed, no validation of existing
    /// transactions, rollback-only markers honored at the outermost scope.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            synchronization: SynchronizationPolicy::Always,
            nested_allowed: false,
            validate_existing: false,
            commit_on_global_rollback_only: false,
            fail_early_on_global_rollback_only: false,
            rollback_on_participation_failure: true,
            rollback_on_commit_failure: false,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn with_synchronization(mut self, policy: SynchronizationPolicy) -> Self {
        self.synchronization = policy;
        self
    }

    /// Allows `Propagation::Nested` requests inside an existing transaction.
    pub fn with_nested_allowed(mut self, allowed: bool) -> Self {
        self.nested_allowed = allowed;
        self
    }

    /// Validates isolation and read-only compatibility when participating in
    /// an existing transaction.
    pub fn with_validate_existing(mut self, validate: bool) -> Self {
        self.validate_existing = validate;
        self
    }

    /// Commits even when the transaction carries a global rollback-only
    /// marker. The default (false) turns such commits into a rollback
    /// reported as [`TransactionError::UnexpectedRollback`].
    pub fn with_commit_on_global_rollback_only(mut self, commit: bool) -> Self {
        self.commit_on_global_rollback_only = commit;
        self
    }

    /// Raises [`TransactionError::UnexpectedRollback`] at the inner scope as
    /// soon as a participating commit observes the global rollback-only
    /// marker, instead of deferring to the outermost scope.
    pub fn with_fail_early_on_global_rollback_only(mut self, fail_early: bool) -> Self {
        self.fail_early_on_global_rollback_only = fail_early;
        self
    }

    /// Whether a failed participating attempt marks the enclosing
    /// transaction rollback-only (default true). When disabled, the
    /// transaction originator alone decides the outcome.
    pub fn with_rollback_on_participation_failure(mut self, rollback: bool) -> Self {
        self.rollback_on_participation_failure = rollback;
        self
    }

    /// Performs a physical rollback when the physical commit itself fails,
    /// before the commit failure propagates.
    pub fn with_rollback_on_commit_failure(mut self, rollback: bool) -> Self {
        self.rollback_on_commit_failure = rollback;
        self
    }

    /// Triggers `flush` on every synchronization registered with the scope,
    /// in priority order.
    pub fn flush(&self, ctx: &TransactionContext<A>) {
        for sync in ctx.registry().snapshot() {
            sync.flush();
        }
    }

    /// Convenience wrapper: begins a transaction per the definition, invokes
    /// the unit of work, and commits or rolls back based on the outcome.
    ///
    /// A failed unit of work completes the transaction according to the
    /// definition's rollback classification, then propagates as
    /// [`TransactionError::WorkFailed`]. A failure while completing the
    /// transaction takes precedence; the original work failure is logged.
    pub fn execute<R, F>(
        &self,
        ctx: &mut TransactionContext<A>,
        definition: &TransactionDefinition,
        work: F,
    ) -> Result<R>
    where
        F: FnOnce(
            &mut TransactionContext<A>,
            &mut TransactionStatus<A>,
        ) -> std::result::Result<R, WorkFailure>,
    {
        let mut status = self.get_transaction(ctx, definition)?;
        match work(ctx, &mut status) {
            Ok(value) => {
                self.commit(ctx, &mut status)?;
                Ok(value)
            }
            Err(failure) => {
                let completion = if definition.should_rollback_on(failure.kind) {
                    self.rollback(ctx, &mut status)
                } else {
                    self.commit(ctx, &mut status)
                };
                if let Err(completion_err) = completion {
                    error!(
                        "transaction completion failed after unit-of-work failure \
                         (original failure: {}): {completion_err}",
                        failure.source
                    );
                    return Err(completion_err);
                }
                Err(TransactionError::WorkFailed {
                    kind: failure.kind,
                    source: failure.source,
                })
            }
        }
    }
}
