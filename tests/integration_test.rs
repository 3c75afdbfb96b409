use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use txflow::context::TransactionContext;
use txflow::definition::{FailureKind, Propagation, TransactionDefinition, WorkFailure};
use txflow::engine::TransactionManager;
use txflow::error::TransactionError;
use txflow::memory::{MemoryAdapter, MemoryOp};
use txflow::synchronization::{CompletionStatus, TransactionSynchronization};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn manager() -> TransactionManager<MemoryAdapter> {
    init_logging();
    TransactionManager::new(MemoryAdapter::new()).with_nested_allowed(true)
}

/// Counts lifecycle events, for exactly-once assertions.
#[derive(Default)]
struct Lifecycle {
    suspends: AtomicUsize,
    resumes: AtomicUsize,
    after_completions: AtomicUsize,
    outcomes: Mutex<Vec<CompletionStatus>>,
}

impl TransactionSynchronization for Lifecycle {
    fn suspend(&self) {
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn after_completion(&self, status: CompletionStatus) -> txflow::error::Result<()> {
        self.after_completions.fetch_add(1, Ordering::SeqCst);
        self.outcomes.lock().push(status);
        Ok(())
    }
}

#[test]
fn test_required_in_required_commits_once_at_outermost_scope() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default();

    let result: i32 = manager
        .execute(&mut ctx, &def.clone(), |ctx, outer| {
            assert!(outer.is_new_transaction());
            let inner_result: i32 = manager
                .execute(ctx, &def, |_ctx, inner| {
                    assert!(!inner.is_new_transaction());
                    Ok(21)
                })
                .unwrap();
            Ok(inner_result * 2)
        })
        .unwrap();

    assert_eq!(result, 42);
    assert_eq!(
        manager.adapter().ops(),
        vec![MemoryOp::Begin(1), MemoryOp::Commit(1), MemoryOp::Cleanup(1)]
    );
}

#[test]
fn test_mandatory_without_transaction_is_rejected() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::new(Propagation::Mandatory);

    let err = manager
        .execute(&mut ctx, &def, |_ctx, _status| Ok(()))
        .unwrap_err();
    assert!(matches!(err, TransactionError::IllegalState(_)));
}

#[test]
fn test_never_inside_transaction_is_rejected() {
    let manager = manager();
    let mut ctx = TransactionContext::new();

    let err = manager
        .execute(&mut ctx, &TransactionDefinition::default(), |ctx, _outer| {
            let never = TransactionDefinition::new(Propagation::Never);
            match manager.execute(ctx, &never, |_ctx, _status| Ok(())) {
                Err(err) => Err(WorkFailure::runtime(err)),
                Ok(()) => Ok(()),
            }
        })
        .unwrap_err();
    assert!(matches!(err, TransactionError::WorkFailed { .. }));
    // The outer transaction rolled back because of the propagated failure.
    assert!(manager.adapter().ops().contains(&MemoryOp::Rollback(1)));
}

#[test]
fn test_requires_new_suspends_and_resumes_outer_scope() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let lifecycle = Arc::new(Lifecycle::default());

    let outer_def = TransactionDefinition::default();
    let inner_def = TransactionDefinition::new(Propagation::RequiresNew);

    manager
        .execute(&mut ctx, &outer_def, |ctx, _outer| {
            ctx.registry_mut().register(lifecycle.clone()).unwrap();
            let before = ctx.registry().snapshot().len();

            manager
                .execute(ctx, &inner_def, |ctx, inner| {
                    assert!(inner.is_new_transaction());
                    // The outer scope is fully detached while the inner
                    // transaction runs.
                    assert!(!ctx.registry().snapshot().iter().any(|s| {
                        Arc::ptr_eq(
                            s,
                            &(lifecycle.clone() as Arc<dyn TransactionSynchronization>),
                        )
                    }));
                    Ok(())
                })
                .unwrap();

            // Synchronization list is intact after the resume.
            assert_eq!(ctx.registry().snapshot().len(), before);
            Ok(())
        })
        .unwrap();

    assert_eq!(lifecycle.suspends.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.resumes.load(Ordering::SeqCst), 1);
    assert_eq!(
        manager.adapter().ops(),
        vec![
            MemoryOp::Begin(1),
            MemoryOp::Suspend(1),
            MemoryOp::Begin(2),
            MemoryOp::Commit(2),
            MemoryOp::Cleanup(2),
            MemoryOp::Resume(1),
            MemoryOp::Commit(1),
            MemoryOp::Cleanup(1)
        ]
    );
}

#[test]
fn test_inner_rollback_only_turns_outer_commit_into_unexpected_rollback() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default();

    let mut outer = manager.get_transaction(&mut ctx, &def).unwrap();
    let mut inner = manager.get_transaction(&mut ctx, &def).unwrap();

    inner.set_rollback_only().unwrap();
    manager.commit(&mut ctx, &mut inner).unwrap();

    let err = manager.commit(&mut ctx, &mut outer).unwrap_err();
    assert!(matches!(err, TransactionError::UnexpectedRollback));

    let ops = manager.adapter().ops();
    assert!(ops.contains(&MemoryOp::Rollback(1)));
    assert!(!ops.contains(&MemoryOp::Commit(1)));
}

#[test]
fn test_nested_failure_rolls_back_to_savepoint_only() {
    let manager = manager();
    let mut ctx = TransactionContext::new();

    manager
        .execute(&mut ctx, &TransactionDefinition::default(), |ctx, _outer| {
            let nested = TransactionDefinition::new(Propagation::Nested);
            let inner = manager.execute(ctx, &nested, |_ctx, status| -> Result<(), WorkFailure> {
                assert!(status.has_savepoint());
                Err(WorkFailure::runtime(anyhow::anyhow!("partial failure")))
            });
            assert!(matches!(inner, Err(TransactionError::WorkFailed { .. })));
            // The outer transaction survives the nested failure.
            Ok(())
        })
        .unwrap();

    assert_eq!(
        manager.adapter().ops(),
        vec![
            MemoryOp::Begin(1),
            MemoryOp::CreateSavepoint(1, 1),
            MemoryOp::RollbackToSavepoint(1, 1),
            MemoryOp::ReleaseSavepoint(1, 1),
            MemoryOp::Commit(1),
            MemoryOp::Cleanup(1)
        ]
    );
}

#[test]
fn test_after_completion_fires_exactly_once_on_each_path() {
    let manager = manager();
    let def = TransactionDefinition::default();

    // Commit path.
    let mut ctx = TransactionContext::new();
    let committed = Arc::new(Lifecycle::default());
    manager
        .execute(&mut ctx, &def, |ctx, _status| {
            ctx.registry_mut().register(committed.clone()).unwrap();
            Ok(())
        })
        .unwrap();
    assert_eq!(committed.after_completions.load(Ordering::SeqCst), 1);
    assert_eq!(
        committed.outcomes.lock().as_slice(),
        [CompletionStatus::Committed]
    );

    // Rollback path.
    let mut ctx = TransactionContext::new();
    let rolled_back = Arc::new(Lifecycle::default());
    let _ = manager
        .execute(&mut ctx, &def, |ctx, _status| -> Result<(), WorkFailure> {
            ctx.registry_mut().register(rolled_back.clone()).unwrap();
            Err(WorkFailure::runtime(anyhow::anyhow!("boom")))
        })
        .unwrap_err();
    assert_eq!(rolled_back.after_completions.load(Ordering::SeqCst), 1);
    assert_eq!(
        rolled_back.outcomes.lock().as_slice(),
        [CompletionStatus::RolledBack]
    );
}

#[test]
fn test_completed_status_rejects_further_completion() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default();

    let mut status = manager.get_transaction(&mut ctx, &def).unwrap();
    manager.commit(&mut ctx, &mut status).unwrap();

    assert!(matches!(
        manager.commit(&mut ctx, &mut status),
        Err(TransactionError::IllegalState(_))
    ));
    assert!(matches!(
        manager.rollback(&mut ctx, &mut status),
        Err(TransactionError::IllegalState(_))
    ));
}

#[test]
fn test_checked_failure_commits_through() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default();

    let err = manager
        .execute(&mut ctx, &def, |_ctx, _status| -> Result<(), WorkFailure> {
            Err(WorkFailure::checked(anyhow::anyhow!(
                "insufficient funds"
            )))
        })
        .unwrap_err();

    // The failure still propagates, but the transaction committed.
    assert!(matches!(
        err,
        TransactionError::WorkFailed {
            kind: FailureKind::Checked,
            ..
        }
    ));
    let ops = manager.adapter().ops();
    assert!(ops.contains(&MemoryOp::Commit(1)));
    assert!(!ops.contains(&MemoryOp::Rollback(1)));
}

#[test]
fn test_rollback_on_listing_forces_rollback_of_checked_failure() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default().with_rollback_on(FailureKind::Checked);

    let _ = manager
        .execute(&mut ctx, &def, |_ctx, _status| -> Result<(), WorkFailure> {
            Err(WorkFailure::checked(anyhow::anyhow!("declined")))
        })
        .unwrap_err();

    assert!(manager.adapter().ops().contains(&MemoryOp::Rollback(1)));
}

#[test]
fn test_no_rollback_on_overrides_rollback_on() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default()
        .with_rollback_on(FailureKind::Runtime)
        .with_no_rollback_on(FailureKind::Runtime);

    let _ = manager
        .execute(&mut ctx, &def, |_ctx, _status| -> Result<(), WorkFailure> {
            Err(WorkFailure::runtime(anyhow::anyhow!("tolerated")))
        })
        .unwrap_err();

    assert!(manager.adapter().ops().contains(&MemoryOp::Commit(1)));
}

#[test]
fn test_cancelled_work_rolls_back() {
    let manager = manager();
    let mut ctx = TransactionContext::new();
    let def = TransactionDefinition::default();

    let err = manager
        .execute(&mut ctx, &def, |_ctx, _status| -> Result<(), WorkFailure> {
            Err(WorkFailure::cancelled(anyhow::anyhow!("shutting down")))
        })
        .unwrap_err();

    assert!(matches!(
        err,
        TransactionError::WorkFailed {
            kind: FailureKind::Cancelled,
            ..
        }
    ));
    assert!(manager.adapter().ops().contains(&MemoryOp::Rollback(1)));
}

#[test]
fn test_requires_new_without_suspension_support_fails_cleanly() {
    init_logging();
    let manager = TransactionManager::new(MemoryAdapter::new().without_suspension());
    let mut ctx = TransactionContext::new();

    manager
        .execute(&mut ctx, &TransactionDefinition::default(), |ctx, _outer| {
            let inner_def = TransactionDefinition::new(Propagation::RequiresNew);
            let err = manager
                .execute(ctx, &inner_def, |_ctx, _status| Ok(()))
                .unwrap_err();
            assert!(matches!(err, TransactionError::SuspensionNotSupported));
            // The outer scope is untouched by the failed attempt.
            assert!(ctx.has_transaction());
            Ok(())
        })
        .unwrap();

    assert!(manager.adapter().ops().contains(&MemoryOp::Commit(1)));
}

#[test]
fn test_not_supported_runs_outside_transaction_and_restores() {
    let manager = manager();
    let mut ctx = TransactionContext::new();

    let outer_def = TransactionDefinition::default()
        .with_name("report")
        .with_read_only(true);
    manager
        .execute(&mut ctx, &outer_def, |ctx, _outer| {
            let plain = TransactionDefinition::new(Propagation::NotSupported);
            manager
                .execute(ctx, &plain, |ctx, status| {
                    assert!(!status.has_transaction());
                    assert!(!ctx.has_transaction());
                    assert!(!ctx.registry().is_actual_transaction_active());
                    assert!(ctx.registry().transaction_name().is_none());
                    Ok(())
                })
                .unwrap();

            // Restored to its exact prior appearance.
            assert!(ctx.has_transaction());
            assert!(ctx.registry().is_actual_transaction_active());
            assert_eq!(ctx.registry().transaction_name(), Some("report"));
            assert!(ctx.registry().is_read_only());
            Ok(())
        })
        .unwrap();

    assert_eq!(
        manager.adapter().ops(),
        vec![
            MemoryOp::Begin(1),
            MemoryOp::Suspend(1),
            MemoryOp::Resume(1),
            MemoryOp::Commit(1),
            MemoryOp::Cleanup(1)
        ]
    );
}

#[test]
fn test_nested_fallback_begins_within_existing_transaction() {
    init_logging();
    let manager = TransactionManager::new(MemoryAdapter::new().without_savepoints())
        .with_nested_allowed(true);
    let mut ctx = TransactionContext::new();

    manager
        .execute(&mut ctx, &TransactionDefinition::default(), |ctx, _outer| {
            let nested = TransactionDefinition::new(Propagation::Nested);
            manager
                .execute(ctx, &nested, |_ctx, inner| {
                    assert!(inner.is_new_transaction());
                    assert!(!inner.has_savepoint());
                    Ok(())
                })
                .unwrap();
            Ok(())
        })
        .unwrap();

    assert_eq!(
        manager.adapter().ops(),
        vec![
            MemoryOp::Begin(1),
            MemoryOp::Begin(1),
            MemoryOp::Commit(1),
            MemoryOp::Commit(1),
            MemoryOp::Cleanup(1)
        ]
    );
}

#[test]
fn test_managers_serve_independent_contexts() {
    let manager = Arc::new(manager());
    let mut handles = Vec::new();

    for _ in 0..4 {
        let manager = Arc::clone(&manager);
        handles.push(std::thread::spawn(move || {
            let mut ctx = TransactionContext::new();
            manager
                .execute(&mut ctx, &TransactionDefinition::default(), |_ctx, status| {
                    assert!(status.is_new_transaction());
                    Ok(())
                })
                .unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Four independent transactions, each begun and committed once.
    let ops = manager.adapter().ops();
    let begins = ops
        .iter()
        .filter(|op| matches!(op, MemoryOp::Begin(_)))
        .count();
    let commits = ops
        .iter()
        .filter(|op| matches!(op, MemoryOp::Commit(_)))
        .count();
    assert_eq!(begins, 4);
    assert_eq!(commits, 4);
}
