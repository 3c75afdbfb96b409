//! Suspend/resume of scope-local transaction state.

use crate::context::{SharedTransaction, TransactionContext};
use crate::error::Result;
use crate::resource::ResourceAdapter;
use crate::status::SuspendedResourcesHolder;
use crate::synchronization::SharedSynchronization;

use super::manager::TransactionManager;

impl<A: ResourceAdapter> TransactionManager<A> {
    /// Captures and clears the scope's synchronization state and, when a
    /// transaction handle is supplied, detaches its physical resource.
    ///
    /// Returns `None` when neither a transaction nor synchronization is
    /// active, distinguishing "nothing to resume" from "resume with empty
    /// state". Every suspend must be matched by a resume on every exit path.
    pub(crate) fn suspend(
        &self,
        ctx: &mut TransactionContext<A>,
        transaction: Option<SharedTransaction<A>>,
    ) -> Result<Option<SuspendedResourcesHolder<A>>> {
        if ctx.registry().is_synchronization_active() {
            let synchronizations = self.suspend_synchronizations(ctx);
            let resource = match &transaction {
                Some(tx) => {
                    let mut guard = tx.lock();
                    match self.adapter.suspend(&mut guard) {
                        Ok(token) => Some(token),
                        Err(err) => {
                            drop(guard);
                            // The physical suspend failed: reattach the
                            // already-detached synchronizations.
                            self.reattach_synchronizations(ctx, synchronizations);
                            return Err(err);
                        }
                    }
                }
                None => None,
            };
            let bound = if transaction.is_some() {
                ctx.unbind()
            } else {
                None
            };
            let registry = ctx.registry_mut();
            let name = registry.transaction_name().map(str::to_string);
            registry.set_transaction_name(None);
            let read_only = registry.is_read_only();
            registry.set_read_only(false);
            let isolation = registry.isolation();
            registry.set_isolation(None);
            let was_active = registry.is_actual_transaction_active();
            registry.set_actual_transaction_active(false);
            Ok(Some(SuspendedResourcesHolder {
                resource,
                transaction: bound,
                synchronizations: Some(synchronizations),
                name,
                read_only,
                isolation,
                was_active,
            }))
        } else if let Some(tx) = transaction {
            // Transaction active but no synchronization to transfer.
            let token = {
                let mut guard = tx.lock();
                self.adapter.suspend(&mut guard)?
            };
            let bound = ctx.unbind();
            Ok(Some(SuspendedResourcesHolder {
                resource: Some(token),
                transaction: bound,
                synchronizations: None,
                name: None,
                read_only: false,
                isolation: None,
                was_active: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Restores a previously suspended scope: physical resource first, then
    /// characteristics, then the synchronization callbacks in their original
    /// registration order.
    pub(crate) fn resume(
        &self,
        ctx: &mut TransactionContext<A>,
        holder: Option<SuspendedResourcesHolder<A>>,
    ) -> Result<()> {
        let holder = match holder {
            Some(holder) => holder,
            None => return Ok(()),
        };
        if let Some(tx) = holder.transaction {
            if let Some(token) = holder.resource {
                let mut guard = tx.lock();
                self.adapter.resume(&mut guard, token)?;
            }
            ctx.bind(tx);
        }
        let registry = ctx.registry_mut();
        registry.set_actual_transaction_active(holder.was_active);
        registry.set_isolation(holder.isolation);
        registry.set_read_only(holder.read_only);
        registry.set_transaction_name(holder.name);
        if let Some(synchronizations) = holder.synchronizations {
            ctx.registry_mut().init_synchronization()?;
            for sync in synchronizations {
                sync.resume();
                ctx.registry_mut().register(sync)?;
            }
        }
        Ok(())
    }

    fn suspend_synchronizations(
        &self,
        ctx: &mut TransactionContext<A>,
    ) -> Vec<SharedSynchronization> {
        let synchronizations = ctx
            .registry_mut()
            .detach_synchronizations()
            .unwrap_or_default();
        for sync in &synchronizations {
            sync.suspend();
        }
        synchronizations
    }

    fn reattach_synchronizations(
        &self,
        ctx: &mut TransactionContext<A>,
        synchronizations: Vec<SharedSynchronization>,
    ) {
        for sync in &synchronizations {
            sync.resume();
        }
        ctx.registry_mut().restore_synchronizations(synchronizations);
    }
}
