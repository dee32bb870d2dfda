//! Transaction coordinator - resolves propagation and drives completion.
//!
//! The coordinator is the main entry point for transactions. It handles:
//! - Propagation resolution against an existing transaction
//! - Suspending and resuming enclosing transactions (strict LIFO)
//! - Synchronization callback dispatch around commit and rollback
//! - Exactly-once completion and unconditional cleanup
//!
//! Everything resource-specific goes through [`ResourceManagerHooks`].

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::definition::{Propagation, TransactionDefinition, TIMEOUT_NONE};
use crate::sync::{
    invoke_after_commit, invoke_after_completion, invoke_before_commit, invoke_before_completion,
    CompletionStatus, SynchronizationRegistry,
};
use crate::transaction::config::{CoordinatorConfig, SynchronizationMode};
use crate::transaction::error::{HeuristicOutcome, Phase, TransactionError, TransactionResult};
use crate::transaction::hooks::ResourceManagerHooks;
use crate::transaction::status::{StatusParts, SuspendedResourcesHolder, TransactionStatus};

type Suspended<H> = SuspendedResourcesHolder<<H as ResourceManagerHooks>::Suspended>;

/// Transaction coordinator over one backing resource manager.
///
/// Cheap to clone: clones share the hooks and configuration. The coordinator
/// itself holds no per-context state; that lives in the
/// [`SynchronizationRegistry`] passed into every call.
pub struct TransactionCoordinator<H: ResourceManagerHooks> {
    inner: Arc<CoordinatorInner<H>>,
}

struct CoordinatorInner<H> {
    hooks: H,
    config: CoordinatorConfig,
}

impl<H: ResourceManagerHooks> Clone for TransactionCoordinator<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ResourceManagerHooks> TransactionCoordinator<H> {
    /// Create a coordinator with the default configuration.
    pub fn new(hooks: H) -> Self {
        Self::with_config(hooks, CoordinatorConfig::default())
    }

    pub fn with_config(hooks: H, config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner { hooks, config }),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.inner.hooks
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    // ==================== Begin ====================

    /// Return a status for the requested definition, beginning, joining or
    /// suspending transactions according to its propagation behavior.
    pub fn get_transaction(
        &self,
        registry: &mut SynchronizationRegistry,
        definition: &TransactionDefinition,
    ) -> TransactionResult<TransactionStatus<H>> {
        if definition.get_timeout() < TIMEOUT_NONE {
            return Err(TransactionError::InvalidTimeout(definition.get_timeout()));
        }

        let transaction = self
            .hooks()
            .do_get_transaction(registry)
            .map_err(TransactionError::from_begin_failure)?;

        if self.hooks().is_existing_transaction(&transaction) {
            return self.handle_existing_transaction(registry, definition, transaction);
        }

        match definition.get_propagation() {
            Propagation::Mandatory => Err(TransactionError::illegal_state(
                "no existing transaction found for transaction marked with propagation 'MANDATORY'",
            )),
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                self.check_begin_supported(definition)?;
                let suspended = self.suspend(registry, None)?;
                debug!(
                    name = ?definition.get_name(),
                    propagation = %definition.get_propagation(),
                    "creating new transaction"
                );
                self.start_transaction(registry, definition, transaction, suspended)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                if !definition.get_isolation().is_default() {
                    warn!(
                        isolation = %definition.get_isolation(),
                        "custom isolation level specified but no actual transaction initiated; \
                         isolation level will effectively be ignored"
                    );
                }
                self.new_status(registry, definition, None, false, None)
            }
        }
    }

    fn handle_existing_transaction(
        &self,
        registry: &mut SynchronizationRegistry,
        definition: &TransactionDefinition,
        mut transaction: H::Transaction,
    ) -> TransactionResult<TransactionStatus<H>> {
        match definition.get_propagation() {
            Propagation::Never => Err(TransactionError::illegal_state(
                "existing transaction found for transaction marked with propagation 'NEVER'",
            )),
            Propagation::NotSupported => {
                debug!("suspending current transaction");
                let suspended = self.suspend(registry, Some(&mut transaction))?;
                self.new_status(registry, definition, None, false, suspended)
            }
            Propagation::RequiresNew => {
                self.check_begin_supported(definition)?;
                debug!(
                    name = ?definition.get_name(),
                    "suspending current transaction, creating new transaction"
                );
                let suspended = self.suspend(registry, Some(&mut transaction))?;
                self.start_transaction(registry, definition, transaction, suspended)
            }
            Propagation::Nested => {
                if !self.config().nested_transaction_allowed {
                    return Err(TransactionError::NestedTransactionNotPermitted {
                        message: "nested transactions are disabled by configuration".into(),
                        cause: None,
                    });
                }
                if !self.hooks().supports_savepoints(&transaction) {
                    debug!("resource manager has no savepoints; nested transaction joins existing one");
                    return self.participate(registry, definition, transaction);
                }
                debug!(name = ?definition.get_name(), "creating nested transaction");
                let savepoint = self
                    .hooks()
                    .create_savepoint(&mut transaction)
                    .map_err(TransactionError::from_savepoint_failure)?;
                let mut status = self.new_status(registry, definition, Some(transaction), false, None)?;
                status.set_savepoint(savepoint);
                Ok(status)
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                self.participate(registry, definition, transaction)
            }
        }
    }

    fn participate(
        &self,
        registry: &mut SynchronizationRegistry,
        definition: &TransactionDefinition,
        transaction: H::Transaction,
    ) -> TransactionResult<TransactionStatus<H>> {
        let isolation = definition.get_isolation();
        if !isolation.is_default() {
            if !self.hooks().supports_isolation(isolation) {
                return Err(TransactionError::InvalidIsolationLevel {
                    requested: isolation,
                    message: "backing resource cannot honor this level on a participating transaction"
                        .into(),
                });
            }
            if self.config().validate_existing_transaction
                && registry.current_transaction_isolation() != Some(isolation)
            {
                return Err(TransactionError::InvalidIsolationLevel {
                    requested: isolation,
                    message: format!(
                        "participating transaction is incompatible with existing transaction isolation {}",
                        registry
                            .current_transaction_isolation()
                            .map_or_else(|| "DEFAULT".to_string(), |i| i.to_string())
                    ),
                });
            }
        }
        if self.config().validate_existing_transaction
            && !definition.is_read_only()
            && registry.is_current_transaction_read_only()
        {
            return Err(TransactionError::illegal_state(
                "participating transaction is not marked as read-only but existing transaction is",
            ));
        }
        debug!(name = ?definition.get_name(), "participating in existing transaction");
        self.new_status(registry, definition, Some(transaction), false, None)
    }

    fn check_begin_supported(&self, definition: &TransactionDefinition) -> TransactionResult<()> {
        let isolation = definition.get_isolation();
        if !isolation.is_default() && !self.hooks().supports_isolation(isolation) {
            return Err(TransactionError::InvalidIsolationLevel {
                requested: isolation,
                message: "backing resource cannot apply a custom isolation level".into(),
            });
        }
        Ok(())
    }

    /// The definition handed to `do_begin`: default timeout applied, and the
    /// timeout dropped when the resource cannot enforce one.
    fn effective_definition(&self, definition: &TransactionDefinition) -> TransactionDefinition {
        let timeout = definition.timeout().or(self.config().default_timeout);
        match timeout {
            // The config caps default timeouts at i32::MAX; saturate if the
            // field was set directly past that.
            Some(seconds) if self.hooks().supports_timeout() => definition
                .clone()
                .timeout_seconds(i32::try_from(seconds).unwrap_or(i32::MAX)),
            Some(seconds) => {
                debug!(seconds, "resource manager does not enforce timeouts; ignoring");
                definition.clone().timeout_seconds(TIMEOUT_NONE)
            }
            None => definition.clone(),
        }
    }

    fn start_transaction(
        &self,
        registry: &mut SynchronizationRegistry,
        definition: &TransactionDefinition,
        mut transaction: H::Transaction,
        suspended: Option<Suspended<H>>,
    ) -> TransactionResult<TransactionStatus<H>> {
        let effective = self.effective_definition(definition);
        if let Err(failure) = self.hooks().do_begin(&mut transaction, &effective, registry) {
            let err = TransactionError::from_begin_failure(failure);
            if let Err(resume_err) = self.resume(registry, Some(&mut transaction), suspended) {
                error!(
                    error = %err,
                    resume_error = %resume_err,
                    "resuming outer transaction failed after inner begin failure"
                );
            }
            return Err(err);
        }
        self.new_status(registry, &effective, Some(transaction), true, suspended)
    }

    fn new_status(
        &self,
        registry: &mut SynchronizationRegistry,
        definition: &TransactionDefinition,
        transaction: Option<H::Transaction>,
        new_transaction: bool,
        suspended: Option<Suspended<H>>,
    ) -> TransactionResult<TransactionStatus<H>> {
        // Only a physical transaction begun here may own synchronization.
        let new_synchronization = new_transaction
            && self.config().synchronization != SynchronizationMode::Never
            && !registry.is_synchronization_active();

        if new_synchronization {
            registry.set_actual_transaction_active(true);
            registry.set_current_transaction_isolation(
                Some(definition.get_isolation()).filter(|i| !i.is_default()),
            );
            registry.set_current_transaction_read_only(definition.is_read_only());
            registry.set_current_transaction_name(definition.get_name().map(str::to_owned));
            registry.set_synchronization_active(true)?;
        }

        Ok(TransactionStatus::new(StatusParts {
            name: definition.get_name().map(str::to_owned),
            transaction,
            new_transaction,
            new_synchronization,
            read_only: definition.is_read_only(),
            suspended,
            suspension_depth: registry.suspension_depth(),
        }))
    }

    // ==================== Suspend / resume ====================

    fn suspend(
        &self,
        registry: &mut SynchronizationRegistry,
        transaction: Option<&mut H::Transaction>,
    ) -> TransactionResult<Option<Suspended<H>>> {
        if let Some(synchronizations) = registry.take_synchronizations() {
            for synchronization in &synchronizations {
                synchronization.suspend();
            }
            let suspended_resources = match transaction {
                Some(transaction) => match self.hooks().do_suspend(transaction, registry) {
                    Ok(resources) => Some(resources),
                    Err(failure) => {
                        for synchronization in &synchronizations {
                            synchronization.resume();
                        }
                        registry.restore_synchronizations(synchronizations);
                        return Err(TransactionError::from_suspend_failure(failure));
                    }
                },
                None => None,
            };

            let name = registry.current_transaction_name().map(str::to_owned);
            let read_only = registry.is_current_transaction_read_only();
            let isolation = registry.current_transaction_isolation();
            let was_active = registry.is_actual_transaction_active();
            registry.set_current_transaction_name(None);
            registry.set_current_transaction_read_only(false);
            registry.set_current_transaction_isolation(None);
            registry.set_actual_transaction_active(false);

            let token = registry.push_suspension();
            debug!(%token, name = ?name, "suspended transaction");
            Ok(Some(SuspendedResourcesHolder {
                token,
                suspended_resources,
                synchronizations: Some(synchronizations),
                name,
                read_only,
                isolation,
                was_active,
            }))
        } else if let Some(transaction) = transaction {
            let resources = self
                .hooks()
                .do_suspend(transaction, registry)
                .map_err(TransactionError::from_suspend_failure)?;
            let token = registry.push_suspension();
            debug!(%token, "suspended transaction without synchronization");
            Ok(Some(SuspendedResourcesHolder {
                token,
                suspended_resources: Some(resources),
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

    fn resume(
        &self,
        registry: &mut SynchronizationRegistry,
        transaction: Option<&mut H::Transaction>,
        suspended: Option<Suspended<H>>,
    ) -> TransactionResult<()> {
        let Some(holder) = suspended else {
            return Ok(());
        };
        if !registry.pop_suspension(holder.token) {
            return Err(TransactionError::illegal_state(format!(
                "suspended transaction {} resumed out of order",
                holder.token
            )));
        }
        debug!(token = %holder.token, name = ?holder.name, "resuming suspended transaction");

        let mut result = Ok(());
        if let Some(resources) = holder.suspended_resources {
            result = self
                .hooks()
                .do_resume(transaction, resources, registry)
                .map_err(|f| TransactionError::from_resource_failure(Phase::Resume, f));
        }
        if let Some(synchronizations) = holder.synchronizations {
            registry.set_actual_transaction_active(holder.was_active);
            registry.set_current_transaction_isolation(holder.isolation);
            registry.set_current_transaction_read_only(holder.read_only);
            registry.set_current_transaction_name(holder.name);
            for synchronization in &synchronizations {
                synchronization.resume();
            }
            registry.restore_synchronizations(synchronizations);
        }
        result
    }

    // ==================== Commit ====================

    /// Commit the transaction represented by `status`.
    ///
    /// A rollback-only status is rolled back instead, without error. A
    /// participating status does not commit physically. Cleanup always runs.
    pub fn commit(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
    ) -> TransactionResult<()> {
        self.check_completion(registry, status)?;

        if status.is_rollback_only() {
            debug!(id = status.id(), "transactional code has requested rollback");
            return self.process_rollback(registry, status, false);
        }
        if self.is_global_rollback_only(status) {
            debug!(
                id = status.id(),
                "global transaction is marked as rollback-only but transactional code requested commit"
            );
            return self.process_rollback(registry, status, true);
        }

        let result = self.commit_inner(registry, status);
        self.finish(registry, status, result)
    }

    fn commit_inner(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
    ) -> TransactionResult<()> {
        if let Err(err) = self.trigger_before_commit(registry, status) {
            self.trigger_before_completion(registry, status);
            self.rollback_on_commit_exception(registry, status, &err);
            return Err(err);
        }
        self.trigger_before_completion(registry, status);

        let mut unexpected_rollback = false;
        let outcome = if status.has_savepoint() {
            debug!(id = status.id(), "releasing transaction savepoint");
            unexpected_rollback = self.is_global_rollback_only(status);
            self.release_held_savepoint(status)
        } else if status.is_new_transaction() {
            debug!(id = status.id(), "initiating transaction commit");
            unexpected_rollback = self.is_global_rollback_only(status);
            let transaction = Self::transaction_of(status)?;
            self.hooks()
                .do_commit(transaction)
                .map_err(|f| TransactionError::from_resource_failure(Phase::Commit, f))
        } else {
            if self.config().fail_early_on_global_rollback_only {
                unexpected_rollback = self.is_global_rollback_only(status);
            }
            Ok(())
        };
        let outcome = outcome.and_then(|()| {
            if unexpected_rollback {
                Err(TransactionError::unexpected_rollback(
                    "transaction silently rolled back because it has been marked as rollback-only",
                ))
            } else {
                Ok(())
            }
        });

        match outcome {
            Err(err @ TransactionError::UnexpectedRollback { .. }) => {
                self.trigger_after_completion(registry, status, CompletionStatus::RolledBack);
                Err(err)
            }
            Err(err) => {
                if status.is_new_transaction() && self.config().rollback_on_commit_failure {
                    self.rollback_on_commit_exception(registry, status, &err);
                } else {
                    let completion = match err.heuristic_outcome() {
                        Some(HeuristicOutcome::Committed) => CompletionStatus::Committed,
                        Some(HeuristicOutcome::RolledBack) => CompletionStatus::RolledBack,
                        _ => CompletionStatus::Unknown,
                    };
                    self.trigger_after_completion(registry, status, completion);
                }
                Err(err)
            }
            Ok(()) => {
                let after_commit = self.trigger_after_commit(registry, status);
                self.trigger_after_completion(registry, status, CompletionStatus::Committed);
                after_commit
            }
        }
    }

    /// Roll back after a failure during commit. The original failure is what
    /// the caller sees; a rollback failure is only logged.
    fn rollback_on_commit_exception(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
        err: &TransactionError,
    ) {
        let rollback = if status.is_new_transaction() {
            debug!(id = status.id(), "initiating transaction rollback after commit exception");
            Self::transaction_of(status).and_then(|transaction| {
                self.hooks()
                    .do_rollback(transaction)
                    .map_err(|f| TransactionError::from_resource_failure(Phase::Rollback, f))
            })
        } else if status.has_transaction() && self.config().global_rollback_on_participation_failure {
            debug!(id = status.id(), "marking existing transaction as rollback-only after commit exception");
            Self::transaction_of(status).and_then(|transaction| {
                self.hooks()
                    .do_set_rollback_only(transaction)
                    .map_err(|f| TransactionError::from_resource_failure(Phase::SetRollbackOnly, f))
            })
        } else {
            Ok(())
        };

        match rollback {
            Ok(()) => self.trigger_after_completion(registry, status, CompletionStatus::RolledBack),
            Err(rollback_err) => {
                error!(
                    error = %err,
                    related = %rollback_err,
                    "rollback after commit exception failed"
                );
                self.trigger_after_completion(registry, status, CompletionStatus::Unknown);
            }
        }
    }

    // ==================== Rollback ====================

    /// Roll back the transaction represented by `status`.
    ///
    /// A participating status marks the enclosing transaction rollback-only;
    /// a nested status rolls back to its savepoint. Cleanup always runs.
    pub fn rollback(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
    ) -> TransactionResult<()> {
        self.check_completion(registry, status)?;
        self.process_rollback(registry, status, false)
    }

    fn process_rollback(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
        unexpected: bool,
    ) -> TransactionResult<()> {
        let result = self.rollback_inner(registry, status, unexpected);
        self.finish(registry, status, result)
    }

    fn rollback_inner(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
        unexpected: bool,
    ) -> TransactionResult<()> {
        let mut unexpected = unexpected;
        self.trigger_before_completion(registry, status);

        let outcome = if status.has_savepoint() {
            debug!(id = status.id(), "rolling back transaction to savepoint");
            self.rollback_to_held_savepoint(status)
        } else if status.is_new_transaction() {
            debug!(id = status.id(), "initiating transaction rollback");
            let transaction = Self::transaction_of(status)?;
            self.hooks()
                .do_rollback(transaction)
                .map_err(|f| TransactionError::from_resource_failure(Phase::Rollback, f))
        } else {
            let marked = if !status.has_transaction() {
                debug!("should roll back transaction but cannot - no transaction available");
                Ok(())
            } else if status.is_rollback_only() || self.config().global_rollback_on_participation_failure {
                debug!(
                    id = status.id(),
                    "participating transaction failed - marking existing transaction as rollback-only"
                );
                let transaction = Self::transaction_of(status)?;
                self.hooks()
                    .do_set_rollback_only(transaction)
                    .map_err(|f| TransactionError::from_resource_failure(Phase::SetRollbackOnly, f))
            } else {
                debug!(
                    id = status.id(),
                    "participating transaction failed - letting transaction originator decide on rollback"
                );
                Ok(())
            };
            if !self.config().fail_early_on_global_rollback_only {
                unexpected = false;
            }
            marked
        };

        match outcome {
            Err(err) => {
                self.trigger_after_completion(registry, status, CompletionStatus::Unknown);
                Err(err)
            }
            Ok(()) => {
                self.trigger_after_completion(registry, status, CompletionStatus::RolledBack);
                if unexpected {
                    Err(TransactionError::unexpected_rollback(
                        "transaction rolled back because it has been marked as rollback-only",
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    // ==================== Savepoints ====================

    /// Create a savepoint inside the transaction of `status`.
    pub fn create_savepoint(&self, status: &mut TransactionStatus<H>) -> TransactionResult<H::Savepoint> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state("transaction is already completed"));
        }
        let transaction = status.transaction_mut().ok_or_else(|| {
            TransactionError::NoTransaction("cannot create savepoint without a transaction".into())
        })?;
        if !self.hooks().supports_savepoints(transaction) {
            return Err(TransactionError::NestedTransactionNotPermitted {
                message: "backing resource does not support savepoints".into(),
                cause: None,
            });
        }
        self.hooks()
            .create_savepoint(transaction)
            .map_err(TransactionError::from_savepoint_failure)
    }

    /// Roll back to a savepoint created by `create_savepoint`.
    pub fn rollback_to_savepoint(
        &self,
        status: &mut TransactionStatus<H>,
        savepoint: &H::Savepoint,
    ) -> TransactionResult<()> {
        let transaction = Self::transaction_of(status)?;
        self.hooks()
            .rollback_to_savepoint(transaction, savepoint)
            .map_err(|f| TransactionError::from_resource_failure(Phase::Savepoint, f))
    }

    /// Release a savepoint created by `create_savepoint`.
    pub fn release_savepoint(
        &self,
        status: &mut TransactionStatus<H>,
        savepoint: H::Savepoint,
    ) -> TransactionResult<()> {
        let transaction = Self::transaction_of(status)?;
        self.hooks()
            .release_savepoint(transaction, savepoint)
            .map_err(|f| TransactionError::from_resource_failure(Phase::Savepoint, f))
    }

    fn rollback_to_held_savepoint(&self, status: &mut TransactionStatus<H>) -> TransactionResult<()> {
        let savepoint = status
            .take_savepoint()
            .ok_or_else(|| TransactionError::illegal_state("no savepoint associated with current transaction"))?;
        let transaction = Self::transaction_of(status)?;
        self.hooks()
            .rollback_to_savepoint(transaction, &savepoint)
            .map_err(|f| TransactionError::from_resource_failure(Phase::Savepoint, f))?;
        self.hooks()
            .release_savepoint(transaction, savepoint)
            .map_err(|f| TransactionError::from_resource_failure(Phase::Savepoint, f))
    }

    fn release_held_savepoint(&self, status: &mut TransactionStatus<H>) -> TransactionResult<()> {
        let savepoint = status
            .take_savepoint()
            .ok_or_else(|| TransactionError::illegal_state("no savepoint associated with current transaction"))?;
        let transaction = Self::transaction_of(status)?;
        self.hooks()
            .release_savepoint(transaction, savepoint)
            .map_err(|f| TransactionError::from_resource_failure(Phase::Savepoint, f))
    }

    // ==================== Completion helpers ====================

    fn check_completion(
        &self,
        registry: &SynchronizationRegistry,
        status: &TransactionStatus<H>,
    ) -> TransactionResult<()> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state(
                "transaction is already completed - do not call commit or rollback more than once per transaction",
            ));
        }
        let depth = registry.suspension_depth();
        let token_matches = status
            .suspension_token()
            .is_none_or(|token| registry.innermost_suspension() == Some(token));
        if depth != status.suspension_depth() || !token_matches {
            return Err(TransactionError::illegal_state(format!(
                "transaction {} completed out of order: {} suspension(s) outstanding, expected {}",
                status.id(),
                depth,
                status.suspension_depth()
            )));
        }
        Ok(())
    }

    fn is_global_rollback_only(&self, status: &TransactionStatus<H>) -> bool {
        status
            .transaction()
            .is_some_and(|transaction| self.hooks().is_global_rollback_only(transaction))
    }

    fn transaction_of(status: &mut TransactionStatus<H>) -> TransactionResult<&mut H::Transaction> {
        status
            .transaction_mut()
            .ok_or_else(|| TransactionError::NoTransaction("status carries no transaction".into()))
    }

    fn trigger_before_commit(
        &self,
        registry: &SynchronizationRegistry,
        status: &TransactionStatus<H>,
    ) -> TransactionResult<()> {
        if !status.is_new_synchronization() {
            return Ok(());
        }
        let synchronizations = registry.synchronizations().unwrap_or_default();
        invoke_before_commit(&synchronizations, status.is_read_only())
    }

    fn trigger_before_completion(&self, registry: &SynchronizationRegistry, status: &TransactionStatus<H>) {
        if status.is_new_synchronization() {
            invoke_before_completion(&registry.synchronizations().unwrap_or_default());
        }
    }

    fn trigger_after_commit(
        &self,
        registry: &SynchronizationRegistry,
        status: &TransactionStatus<H>,
    ) -> TransactionResult<()> {
        if !status.is_new_synchronization() {
            return Ok(());
        }
        invoke_after_commit(&registry.synchronizations().unwrap_or_default())
    }

    /// Deactivates synchronization before notifying, so `after_completion`
    /// callbacks cannot register further callbacks.
    fn trigger_after_completion(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &TransactionStatus<H>,
        completion: CompletionStatus,
    ) {
        if status.is_new_synchronization() {
            let synchronizations = registry.take_synchronizations().unwrap_or_default();
            invoke_after_completion(&synchronizations, completion);
        }
    }

    /// Run cleanup and combine its result with the completion result. A
    /// cleanup failure never replaces an earlier error; it is attached to it.
    fn finish(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
        result: TransactionResult<()>,
    ) -> TransactionResult<()> {
        let cleanup = self.cleanup_after_completion(registry, status);
        match (result, cleanup) {
            (Err(err), Err(cleanup_err)) => {
                error!(error = %err, related = %cleanup_err, "cleanup after completion failed");
                Err(err.with_related(cleanup_err))
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), cleanup) => cleanup,
        }
    }

    fn cleanup_after_completion(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
    ) -> TransactionResult<()> {
        status.set_completed();
        let mut result = Ok(());

        if status.is_new_transaction() {
            if let Some(transaction) = status.transaction_mut() {
                if let Err(failure) = self.hooks().do_cleanup_after_completion(transaction, registry) {
                    result = Err(TransactionError::from_resource_failure(Phase::Cleanup, failure));
                }
            }
        }
        if status.is_new_synchronization() {
            registry.clear();
        }
        if let Some(suspended) = status.take_suspended() {
            debug!(id = status.id(), "resuming suspended transaction after completion of inner transaction");
            let resumed = self.resume(registry, status.transaction_mut(), Some(suspended));
            if let Err(err) = resumed {
                result = match result {
                    Ok(()) => Err(err),
                    Err(first) => {
                        error!(error = %first, related = %err, "resume after completion failed");
                        Err(first.with_related(err))
                    }
                };
            }
        }
        result
    }
}

impl<H: ResourceManagerHooks> std::fmt::Debug for TransactionCoordinator<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("config", self.config())
            .finish()
    }
}
