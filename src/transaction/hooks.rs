//! The resource-manager hook contract.
//!
//! This trait is the only extension point of the coordinator. A backing
//! resource (a single connection, a two-phase coordinator, ...) implements it
//! once; the coordinator resolves propagation, drives synchronizations and
//! cleans up, and never branches on the concrete resource type.
//!
//! Hooks report failures as [`ResourceFailure`] signals. The coordinator
//! translates them into the unified error taxonomy.

use std::fmt;

use crate::definition::{Isolation, TransactionDefinition};
use crate::sync::SynchronizationRegistry;
use crate::transaction::error::ResourceFailure;

/// Result type for hook operations.
pub type HookResult<T> = Result<T, ResourceFailure>;

/// Operations a backing resource manager provides to the coordinator.
pub trait ResourceManagerHooks {
    /// Transaction object describing the current state of this resource
    /// manager on one execution context.
    type Transaction: fmt::Debug;

    /// Whatever the resource needs to restore a suspended transaction.
    type Suspended;

    /// Resource-specific savepoint handle.
    type Savepoint: fmt::Debug;

    /// Build a transaction object for the current context, picking up any
    /// holder already bound in the registry.
    fn do_get_transaction(&self, registry: &mut SynchronizationRegistry) -> HookResult<Self::Transaction>;

    /// Check if the transaction object represents an active transaction.
    fn is_existing_transaction(&self, transaction: &Self::Transaction) -> bool;

    /// Check if `isolation` can be applied when beginning a transaction.
    fn supports_isolation(&self, isolation: Isolation) -> bool {
        isolation.is_default()
    }

    /// Check if the resource enforces transaction timeouts.
    fn supports_timeout(&self) -> bool {
        false
    }

    /// Begin a new transaction. The definition carries the effective timeout.
    fn do_begin(
        &self,
        transaction: &mut Self::Transaction,
        definition: &TransactionDefinition,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()>;

    /// Set the current transaction aside, unbinding its resources.
    fn do_suspend(
        &self,
        _transaction: &mut Self::Transaction,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<Self::Suspended> {
        Err(ResourceFailure::NotSupported(
            "resource manager does not support transaction suspension".into(),
        ))
    }

    /// Restore a transaction set aside by `do_suspend`.
    fn do_resume(
        &self,
        _transaction: Option<&mut Self::Transaction>,
        _suspended: Self::Suspended,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        Err(ResourceFailure::NotSupported(
            "resource manager does not support transaction suspension".into(),
        ))
    }

    fn do_commit(&self, transaction: &mut Self::Transaction) -> HookResult<()>;

    fn do_rollback(&self, transaction: &mut Self::Transaction) -> HookResult<()>;

    /// Mark the whole resource transaction rollback-only. Called when a
    /// participant rolls back.
    fn do_set_rollback_only(&self, transaction: &mut Self::Transaction) -> HookResult<()>;

    /// Check if the resource transaction has been marked rollback-only by
    /// any participant.
    fn is_global_rollback_only(&self, _transaction: &Self::Transaction) -> bool {
        false
    }

    fn supports_savepoints(&self, _transaction: &Self::Transaction) -> bool {
        false
    }

    fn create_savepoint(&self, _transaction: &mut Self::Transaction) -> HookResult<Self::Savepoint> {
        Err(ResourceFailure::NotSupported(
            "resource manager does not support savepoints".into(),
        ))
    }

    fn rollback_to_savepoint(
        &self,
        _transaction: &mut Self::Transaction,
        _savepoint: &Self::Savepoint,
    ) -> HookResult<()> {
        Err(ResourceFailure::NotSupported(
            "resource manager does not support savepoints".into(),
        ))
    }

    fn release_savepoint(
        &self,
        _transaction: &mut Self::Transaction,
        _savepoint: Self::Savepoint,
    ) -> HookResult<()> {
        Err(ResourceFailure::NotSupported(
            "resource manager does not support savepoints".into(),
        ))
    }

    /// Release resources after a new transaction completed, whatever the
    /// outcome. Typically unbinds the holder bound by `do_begin`.
    fn do_cleanup_after_completion(
        &self,
        _transaction: &mut Self::Transaction,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        Ok(())
    }
}
