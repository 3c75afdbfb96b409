//! Commit/rollback coordination: drives the completion protocol and the
//! synchronization callback sequence for one status.

use log::{debug, error, warn};

use crate::context::TransactionContext;
use crate::error::{Result, TransactionError};
use crate::resource::ResourceAdapter;
use crate::status::TransactionStatus;
use crate::synchronization::CompletionStatus;

use super::manager::TransactionManager;

impl<A: ResourceAdapter> TransactionManager<A> {
    /// Completes the status along the commit path.
    ///
    /// A status marked rollback-only (locally by the caller, or globally on
    /// the underlying transaction) is rolled back instead; the global case
    /// surfaces as [`TransactionError::UnexpectedRollback`] unless the
    /// manager is configured to commit through it.
    pub fn commit(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
    ) -> Result<()> {
        if status.completed {
            return Err(TransactionError::IllegalState(
                "transaction is already completed - do not call commit or rollback more than \
                 once per transaction"
                    .to_string(),
            ));
        }

        if status.rollback_only {
            debug!("transactional code has requested rollback");
            return self.process_rollback(ctx, status, false);
        }

        if !self.commit_on_global_rollback_only && self.is_global_rollback_only(status) {
            debug!("global transaction is marked as rollback-only but commit was requested");
            return self.process_rollback(ctx, status, true);
        }

        self.process_commit(ctx, status)
    }

    /// Completes the status along the rollback path.
    pub fn rollback(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
    ) -> Result<()> {
        if status.completed {
            return Err(TransactionError::IllegalState(
                "transaction is already completed - do not call commit or rollback more than \
                 once per transaction"
                    .to_string(),
            ));
        }
        self.process_rollback(ctx, status, false)
    }

    fn process_commit(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
    ) -> Result<()> {
        let outcome = self.commit_protocol(ctx, status);
        self.cleanup_after_completion(ctx, status);
        outcome
    }

    fn commit_protocol(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
    ) -> Result<()> {
        // An error from before_commit vetoes the commit: roll back, then
        // propagate the veto.
        if let Err(veto) = self.trigger_before_commit(ctx, status) {
            self.trigger_before_completion(ctx, status);
            self.rollback_after_commit_failure(status);
            self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
            return Err(veto);
        }
        self.trigger_before_completion(ctx, status);

        // A callback may have marked the transaction rollback-only after the
        // entry check; re-check before any physical action.
        let check_global = !self.commit_on_global_rollback_only;
        let mut unexpected_rollback = false;
        if status.savepoint.is_some() {
            unexpected_rollback = check_global && self.is_global_rollback_only(status);
            if let Err(err) = self.release_held_savepoint(status) {
                self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
                return Err(err);
            }
        } else if status.new_transaction {
            unexpected_rollback = check_global && self.is_global_rollback_only(status);
            debug!("initiating transaction commit");
            if let Err(err) = self.physical_commit(status) {
                if self.rollback_on_commit_failure {
                    self.rollback_after_commit_failure(status);
                }
                self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
                return Err(err);
            }
        } else if self.fail_early_on_global_rollback_only {
            unexpected_rollback = check_global && self.is_global_rollback_only(status);
        }

        // A participating failure marked the transaction rollback-only and
        // nothing else surfaced it: report the silent rollback.
        if unexpected_rollback {
            self.trigger_after_completion(ctx, status, CompletionStatus::RolledBack);
            return Err(TransactionError::UnexpectedRollback);
        }

        let after_commit = self.trigger_after_commit(ctx, status);
        self.trigger_after_completion(ctx, status, CompletionStatus::Committed);
        after_commit
    }

    fn process_rollback(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
        unexpected: bool,
    ) -> Result<()> {
        let outcome = self.rollback_protocol(ctx, status, unexpected);
        self.cleanup_after_completion(ctx, status);
        outcome
    }

    fn rollback_protocol(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
        unexpected: bool,
    ) -> Result<()> {
        let mut unexpected_rollback = unexpected;
        self.trigger_before_completion(ctx, status);

        let result: Result<()> = if status.savepoint.is_some() {
            debug!("rolling back transaction to savepoint");
            self.rollback_to_held_savepoint(status)
        } else if status.new_transaction {
            debug!("initiating transaction rollback");
            self.physical_rollback(status)
        } else {
            if status.has_transaction() {
                if status.rollback_only || self.rollback_on_participation_failure {
                    debug!(
                        "participating transaction failed - marking existing transaction as \
                         rollback-only"
                    );
                    self.mark_global_rollback_only(status)
                } else {
                    debug!(
                        "participating transaction failed - letting transaction originator \
                         decide on rollback"
                    );
                    Ok(())
                }
            } else {
                debug!("should roll back transaction but cannot - no transaction available");
                Ok(())
            }
            .map(|_| {
                // An expected participating rollback only surfaces at the
                // inner scope under the fail-early policy.
                if !self.fail_early_on_global_rollback_only {
                    unexpected_rollback = false;
                }
            })
        };

        match result {
            Ok(()) => {
                self.trigger_after_completion(ctx, status, CompletionStatus::RolledBack);
                if unexpected_rollback {
                    Err(TransactionError::UnexpectedRollback)
                } else {
                    Ok(())
                }
            }
            Err(err) => {
                self.trigger_after_completion(ctx, status, CompletionStatus::Unknown);
                Err(err)
            }
        }
    }

    /// Best-effort rollback after a failed or vetoed commit. The commit
    /// failure stays the primary error; a secondary failure here is logged.
    fn rollback_after_commit_failure(&self, status: &mut TransactionStatus<A>) {
        let result = if status.new_transaction {
            debug!("initiating transaction rollback after commit failure");
            self.physical_rollback(status)
        } else if status.has_transaction() && self.rollback_on_participation_failure {
            self.mark_global_rollback_only(status)
        } else {
            Ok(())
        };
        if let Err(err) = result {
            error!("rollback after commit failure also failed: {err}");
        }
    }

    fn is_global_rollback_only(&self, status: &TransactionStatus<A>) -> bool {
        status
            .transaction
            .as_ref()
            .map(|tx| self.adapter.is_rollback_only(&tx.lock()))
            .unwrap_or(false)
    }

    fn mark_global_rollback_only(&self, status: &TransactionStatus<A>) -> Result<()> {
        if let Some(tx) = status.transaction.as_ref() {
            self.adapter.set_rollback_only(&mut tx.lock())?;
        }
        Ok(())
    }

    fn physical_commit(&self, status: &TransactionStatus<A>) -> Result<()> {
        let tx = status.transaction.as_ref().ok_or_else(|| {
            TransactionError::IllegalState(
                "cannot commit - no transaction available".to_string(),
            )
        })?;
        let mut guard = tx.lock();
        self.adapter
            .commit(&mut guard)
            .map_err(|err| system_error("physical commit", err))
    }

    fn physical_rollback(&self, status: &TransactionStatus<A>) -> Result<()> {
        let tx = status.transaction.as_ref().ok_or_else(|| {
            TransactionError::IllegalState(
                "cannot roll back - no transaction available".to_string(),
            )
        })?;
        let mut guard = tx.lock();
        self.adapter
            .rollback(&mut guard)
            .map_err(|err| system_error("physical rollback", err))
    }

    fn release_held_savepoint(&self, status: &mut TransactionStatus<A>) -> Result<()> {
        let savepoint = match status.savepoint.take() {
            Some(savepoint) => savepoint,
            None => return Ok(()),
        };
        let tx = status.transaction.as_ref().ok_or_else(|| {
            TransactionError::IllegalState(
                "cannot release savepoint - no transaction available".to_string(),
            )
        })?;
        let mut guard = tx.lock();
        self.adapter
            .release_savepoint(&mut guard, savepoint)
            .map_err(|err| system_error("releasing savepoint", err))
    }

    fn rollback_to_held_savepoint(&self, status: &mut TransactionStatus<A>) -> Result<()> {
        let savepoint = match status.savepoint.take() {
            Some(savepoint) => savepoint,
            None => return Ok(()),
        };
        let tx = status.transaction.as_ref().ok_or_else(|| {
            TransactionError::IllegalState(
                "cannot roll back to savepoint - no transaction available".to_string(),
            )
        })?;
        let mut guard = tx.lock();
        self.adapter
            .rollback_to_savepoint(&mut guard, &savepoint)
            .map_err(|err| system_error("rolling back to savepoint", err))?;
        self.adapter
            .release_savepoint(&mut guard, savepoint)
            .map_err(|err| system_error("releasing savepoint", err))
    }

    fn trigger_before_commit(
        &self,
        ctx: &TransactionContext<A>,
        status: &TransactionStatus<A>,
    ) -> Result<()> {
        if status.new_synchronization {
            for sync in ctx.registry().snapshot() {
                sync.before_commit(status.read_only)?;
            }
        }
        Ok(())
    }

    fn trigger_before_completion(
        &self,
        ctx: &TransactionContext<A>,
        status: &TransactionStatus<A>,
    ) {
        if status.new_synchronization {
            for sync in ctx.registry().snapshot() {
                if let Err(err) = sync.before_completion() {
                    warn!("before_completion synchronization failed: {err}");
                }
            }
        }
    }

    fn trigger_after_commit(
        &self,
        ctx: &TransactionContext<A>,
        status: &TransactionStatus<A>,
    ) -> Result<()> {
        if status.new_synchronization {
            for sync in ctx.registry().snapshot() {
                sync.after_commit()
                    .map_err(|err| system_error("after-commit synchronization", err))?;
            }
        }
        Ok(())
    }

    /// Fires `after_completion` exactly once per status owning the
    /// synchronization scope. The list is detached before invoking, so late
    /// registrations cannot corrupt the iteration or retrigger completion.
    fn trigger_after_completion(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &TransactionStatus<A>,
        completion: CompletionStatus,
    ) {
        if status.new_synchronization {
            for sync in ctx.registry_mut().take_synchronizations() {
                if let Err(err) = sync.after_completion(completion) {
                    warn!("after_completion synchronization failed: {err}");
                }
            }
        }
    }

    /// Marks the status completed, tears down scope state, and resumes any
    /// suspended resources. Runs on every completion path.
    fn cleanup_after_completion(
        &self,
        ctx: &mut TransactionContext<A>,
        status: &mut TransactionStatus<A>,
    ) {
        status.completed = true;
        if status.new_synchronization {
            ctx.registry_mut().clear();
        }
        if status.owns_binding {
            if let Some(tx) = ctx.unbind() {
                self.adapter.cleanup(&mut tx.lock());
            }
        }
        if let Some(suspended) = status.suspended.take() {
            debug!("resuming suspended transaction after completion of inner transaction");
            if let Err(err) = self.resume(ctx, Some(suspended)) {
                error!("failed to resume suspended scope after transaction completion: {err}");
            }
        }
    }
}

fn system_error(context: &'static str, source: TransactionError) -> TransactionError {
    TransactionError::System {
        context,
        source: anyhow::Error::new(source),
    }
}
