//! Propagation decisions: mapping a transaction request onto the scope's
//! existing transaction, if any.

use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;

use crate::context::{SharedTransaction, TransactionContext};
use crate::definition::{Isolation, Propagation, TransactionDefinition};
use crate::error::{Result, TransactionError};
use crate::resource::ResourceAdapter;
use crate::status::{SuspendedResourcesHolder, TransactionStatus};

use super::manager::{SynchronizationPolicy, TransactionManager};

impl<A: ResourceAdapter> TransactionManager<A> {
    /// Creates a status for the given definition, honoring its propagation
    /// behavior against the scope's current transaction.
    ///
    /// Fails with [`TransactionError::InvalidTimeout`] for a negative
    /// timeout and with [`TransactionError::IllegalState`] when the
    /// propagation is incompatible with the scope (`Never` with an existing
    /// transaction, `Mandatory` without one).
    pub fn get_transaction(
        &self,
        ctx: &mut TransactionContext<A>,
        definition: &TransactionDefinition,
    ) -> Result<TransactionStatus<A>> {
        definition.validate()?;

        if let Some(existing) = ctx.current_transaction().cloned() {
            if self.adapter.is_existing(&existing.lock()) {
                return self.handle_existing(ctx, definition, existing);
            }
        }

        match definition.propagation {
            Propagation::Mandatory => Err(TransactionError::IllegalState(
                "no existing transaction found for transaction marked with propagation \
                 'mandatory'"
                    .to_string(),
            )),
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                // Suspension here is synchronization bookkeeping only: there
                // is no transaction to detach.
                let suspended = self.suspend(ctx, None)?;
                debug!(
                    "creating new transaction with name [{}]",
                    definition.name.as_deref().unwrap_or("")
                );
                self.begin_transaction(ctx, definition, suspended)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                // "Empty" status: no physical transaction, synchronization
                // only if the policy says always.
                let new_sync = self.synchronization == SynchronizationPolicy::Always;
                self.prepare_status(ctx, definition, None, false, new_sync, None)
            }
        }
    }

    fn handle_existing(
        &self,
        ctx: &mut TransactionContext<A>,
        definition: &TransactionDefinition,
        existing: SharedTransaction<A>,
    ) -> Result<TransactionStatus<A>> {
        match definition.propagation {
            Propagation::Never => Err(TransactionError::IllegalState(
                "existing transaction found for transaction marked with propagation 'never'"
                    .to_string(),
            )),
            Propagation::NotSupported => {
                debug!("suspending current transaction");
                let suspended = self.suspend(ctx, Some(existing))?;
                let new_sync = self.synchronization == SynchronizationPolicy::Always;
                self.prepare_status(ctx, definition, None, false, new_sync, suspended)
            }
            Propagation::RequiresNew => {
                debug!(
                    "suspending current transaction, creating new transaction with name [{}]",
                    definition.name.as_deref().unwrap_or("")
                );
                let suspended = self.suspend(ctx, Some(existing))?;
                self.begin_transaction(ctx, definition, suspended)
            }
            Propagation::Nested => {
                if !self.nested_allowed {
                    return Err(TransactionError::NestedNotSupported(
                        "nested transactions are disallowed by this transaction manager"
                            .to_string(),
                    ));
                }
                debug!(
                    "creating nested transaction with name [{}]",
                    definition.name.as_deref().unwrap_or("")
                );
                if self.adapter.supports_savepoints() {
                    // Nested scope within the same physical transaction,
                    // bounded by a savepoint on the existing transaction.
                    let savepoint = {
                        let mut tx = existing.lock();
                        self.adapter.create_savepoint(&mut tx)?
                    };
                    let mut status =
                        self.prepare_status(ctx, definition, Some(existing), false, false, None)?;
                    status.savepoint = Some(savepoint);
                    Ok(status)
                } else {
                    // The resource nests physical begins itself: perform a
                    // second begin inside the existing transaction.
                    {
                        let mut tx = existing.lock();
                        self.adapter.begin(&mut tx, definition)?;
                    }
                    let new_sync = self.synchronization != SynchronizationPolicy::Never;
                    let mut status =
                        self.prepare_status(ctx, definition, Some(existing), true, new_sync, None)?;
                    // The outer scope keeps the binding.
                    status.owns_binding = false;
                    Ok(status)
                }
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                if self.validate_existing {
                    self.validate_compatibility(ctx, definition)?;
                }
                debug!("participating in existing transaction");
                let new_sync = self.synchronization != SynchronizationPolicy::Never;
                self.prepare_status(ctx, definition, Some(existing), false, new_sync, None)
            }
        }
    }

    /// Physically begins a fresh transaction and binds it to the scope. On
    /// failure, whatever was suspended is resumed before the error
    /// propagates.
    fn begin_transaction(
        &self,
        ctx: &mut TransactionContext<A>,
        definition: &TransactionDefinition,
        suspended: Option<SuspendedResourcesHolder<A>>,
    ) -> Result<TransactionStatus<A>> {
        let begun = self.adapter.new_transaction().and_then(|mut tx| {
            self.adapter.begin(&mut tx, definition).map(|_| tx)
        });
        match begun {
            Ok(tx) => {
                let shared = Arc::new(Mutex::new(tx));
                ctx.bind(shared.clone());
                let new_sync = self.synchronization != SynchronizationPolicy::Never;
                self.prepare_status(ctx, definition, Some(shared), true, new_sync, suspended)
            }
            Err(err) => {
                if let Some(holder) = suspended {
                    if let Err(resume_err) = self.resume(ctx, Some(holder)) {
                        error!(
                            "failed to resume suspended scope after begin failure: {resume_err}"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Builds the status and, when it owns a fresh synchronization scope,
    /// initializes the registry with the definition's characteristics.
    fn prepare_status(
        &self,
        ctx: &mut TransactionContext<A>,
        definition: &TransactionDefinition,
        transaction: Option<SharedTransaction<A>>,
        new_transaction: bool,
        new_synchronization: bool,
        suspended: Option<SuspendedResourcesHolder<A>>,
    ) -> Result<TransactionStatus<A>> {
        let actual_new_sync = new_synchronization && !ctx.registry().is_synchronization_active();
        let status = TransactionStatus::new(
            transaction,
            new_transaction,
            actual_new_sync,
            definition.read_only,
            suspended,
        );
        if actual_new_sync {
            let registry = ctx.registry_mut();
            registry.set_actual_transaction_active(status.has_transaction());
            registry.set_isolation(match definition.isolation {
                Isolation::Default => None,
                other => Some(other),
            });
            registry.set_read_only(definition.read_only);
            registry.set_transaction_name(definition.name.clone());
            registry.init_synchronization()?;
        }
        Ok(status)
    }

    fn validate_compatibility(
        &self,
        ctx: &TransactionContext<A>,
        definition: &TransactionDefinition,
    ) -> Result<()> {
        if definition.isolation != Isolation::Default
            && ctx.registry().isolation() != Some(definition.isolation)
        {
            return Err(TransactionError::IllegalState(format!(
                "participating transaction specifies isolation level {:?} which is incompatible \
                 with the existing transaction ({:?})",
                definition.isolation,
                ctx.registry().isolation()
            )));
        }
        if !definition.read_only && ctx.registry().is_read_only() {
            return Err(TransactionError::IllegalState(
                "participating transaction is not marked as read-only but the existing \
                 transaction is"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
