//! In-memory resource adapter, for tests and lightweight embedding.
//!
//! Records every physical operation the engine performs, so callers can
//! assert exact begin/commit/rollback/savepoint sequences. Supports failure
//! injection for the commit and rollback hooks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::definition::TransactionDefinition;
use crate::error::{Result, TransactionError};
use crate::resource::ResourceAdapter;

/// A physical operation recorded by the in-memory resource. The `u64` is the
/// id of the transaction it was performed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryOp {
    Begin(u64),
    Commit(u64),
    Rollback(u64),
    Suspend(u64),
    Resume(u64),
    CreateSavepoint(u64, u32),
    RollbackToSavepoint(u64, u32),
    ReleaseSavepoint(u64, u32),
    SetRollbackOnly(u64),
    Cleanup(u64),
}

/// Transaction handle vended by [`MemoryAdapter`].
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    rollback_only: bool,
    /// Physical begin nesting depth; resources without savepoints nest
    /// begins instead.
    depth: u32,
    savepoint_seq: u32,
}

impl MemoryTransaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }
}

/// Token for a suspended in-memory transaction.
#[derive(Debug)]
pub struct MemorySuspension {
    id: u64,
}

/// Savepoint marker within an in-memory transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySavepoint {
    id: u64,
    seq: u32,
}

#[derive(Default)]
struct MemoryAdapterInner {
    next_id: AtomicU64,
    ops: Mutex<Vec<MemoryOp>>,
    savepoints_supported: AtomicBool,
    suspension_supported: AtomicBool,
    fail_next_begin: AtomicBool,
    fail_next_commit: AtomicBool,
    fail_next_rollback: AtomicBool,
}

/// In-memory [`ResourceAdapter`] recording every physical operation.
///
/// Clones share the same operation log and configuration.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    inner: Arc<MemoryAdapterInner>,
}

impl MemoryAdapter {
    /// Creates an adapter with savepoints and suspension supported.
    pub fn new() -> Self {
        let adapter = Self::default();
        adapter.inner.savepoints_supported.store(true, Ordering::SeqCst);
        adapter.inner.suspension_supported.store(true, Ordering::SeqCst);
        adapter
    }

    /// Disables savepoint support.
    pub fn without_savepoints(self) -> Self {
        self.inner.savepoints_supported.store(false, Ordering::SeqCst);
        self
    }

    /// Disables suspension support.
    pub fn without_suspension(self) -> Self {
        self.inner.suspension_supported.store(false, Ordering::SeqCst);
        self
    }

    /// Makes the next begin fail with a resource error.
    pub fn fail_next_begin(&self) {
        self.inner.fail_next_begin.store(true, Ordering::SeqCst);
    }

    /// Makes the next commit fail with a resource error.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Makes the next rollback fail with a resource error.
    pub fn fail_next_rollback(&self) {
        self.inner.fail_next_rollback.store(true, Ordering::SeqCst);
    }

    /// Copy of the recorded operation log.
    pub fn ops(&self) -> Vec<MemoryOp> {
        self.inner.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.inner.ops.lock().clear();
    }

    fn record(&self, op: MemoryOp) {
        self.inner.ops.lock().push(op);
    }
}

impl ResourceAdapter for MemoryAdapter {
    type Transaction = MemoryTransaction;
    type Suspended = MemorySuspension;
    type Savepoint = MemorySavepoint;

    fn new_transaction(&self) -> Result<MemoryTransaction> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryTransaction {
            id,
            rollback_only: false,
            depth: 0,
            savepoint_seq: 0,
        })
    }

    fn begin(
        &self,
        transaction: &mut MemoryTransaction,
        _definition: &TransactionDefinition,
    ) -> Result<()> {
        if self.inner.fail_next_begin.swap(false, Ordering::SeqCst) {
            return Err(TransactionError::Resource(anyhow!(
                "injected begin failure"
            )));
        }
        transaction.depth += 1;
        self.record(MemoryOp::Begin(transaction.id));
        Ok(())
    }

    fn commit(&self, transaction: &mut MemoryTransaction) -> Result<()> {
        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(TransactionError::Resource(anyhow!(
                "injected commit failure"
            )));
        }
        if transaction.depth == 0 {
            return Err(TransactionError::Resource(anyhow!(
                "transaction {} has not begun",
                transaction.id
            )));
        }
        transaction.depth -= 1;
        self.record(MemoryOp::Commit(transaction.id));
        Ok(())
    }

    fn rollback(&self, transaction: &mut MemoryTransaction) -> Result<()> {
        if self.inner.fail_next_rollback.swap(false, Ordering::SeqCst) {
            return Err(TransactionError::Resource(anyhow!(
                "injected rollback failure"
            )));
        }
        if transaction.depth == 0 {
            return Err(TransactionError::Resource(anyhow!(
                "transaction {} has not begun",
                transaction.id
            )));
        }
        transaction.depth -= 1;
        self.record(MemoryOp::Rollback(transaction.id));
        Ok(())
    }

    fn set_rollback_only(&self, transaction: &mut MemoryTransaction) -> Result<()> {
        transaction.rollback_only = true;
        self.record(MemoryOp::SetRollbackOnly(transaction.id));
        Ok(())
    }

    fn is_rollback_only(&self, transaction: &MemoryTransaction) -> bool {
        transaction.rollback_only
    }

    fn suspend(&self, transaction: &mut MemoryTransaction) -> Result<MemorySuspension> {
        if !self.inner.suspension_supported.load(Ordering::SeqCst) {
            return Err(TransactionError::SuspensionNotSupported);
        }
        self.record(MemoryOp::Suspend(transaction.id));
        Ok(MemorySuspension { id: transaction.id })
    }

    fn resume(
        &self,
        transaction: &mut MemoryTransaction,
        suspended: MemorySuspension,
    ) -> Result<()> {
        if suspended.id != transaction.id {
            return Err(TransactionError::Resource(anyhow!(
                "suspension token for transaction {} does not match transaction {}",
                suspended.id,
                transaction.id
            )));
        }
        self.record(MemoryOp::Resume(transaction.id));
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        self.inner.savepoints_supported.load(Ordering::SeqCst)
    }

    fn create_savepoint(&self, transaction: &mut MemoryTransaction) -> Result<MemorySavepoint> {
        if !self.supports_savepoints() {
            return Err(TransactionError::NestedNotSupported(
                "savepoints are disabled for this adapter".to_string(),
            ));
        }
        transaction.savepoint_seq += 1;
        let savepoint = MemorySavepoint {
            id: transaction.id,
            seq: transaction.savepoint_seq,
        };
        self.record(MemoryOp::CreateSavepoint(savepoint.id, savepoint.seq));
        Ok(savepoint)
    }

    fn rollback_to_savepoint(
        &self,
        _transaction: &mut MemoryTransaction,
        savepoint: &MemorySavepoint,
    ) -> Result<()> {
        self.record(MemoryOp::RollbackToSavepoint(savepoint.id, savepoint.seq));
        Ok(())
    }

    fn release_savepoint(
        &self,
        _transaction: &mut MemoryTransaction,
        savepoint: MemorySavepoint,
    ) -> Result<()> {
        self.record(MemoryOp::ReleaseSavepoint(savepoint.id, savepoint.seq));
        Ok(())
    }

    fn cleanup(&self, transaction: &mut MemoryTransaction) {
        self.record(MemoryOp::Cleanup(transaction.id));
    }
}
