//! Transaction status handles.
//!
//! A [`TransactionStatus`] represents one transaction attempt. It is created
//! by the coordinator, handed to the caller, and advanced to completion
//! exactly once by `commit` or `rollback`. Completion takes `&mut`, so only
//! the owning flow can ever complete it.

use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::definition::Isolation;
use crate::sync::SharedSynchronization;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::hooks::ResourceManagerHooks;

/// State set aside while an enclosing transaction is suspended.
///
/// Owned by the status of the transaction that caused the suspension and
/// consumed when that status completes.
pub struct SuspendedResourcesHolder<S> {
    pub(crate) token: Ulid,
    pub(crate) suspended_resources: Option<S>,
    pub(crate) synchronizations: Option<Vec<SharedSynchronization>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<Isolation>,
    pub(crate) was_active: bool,
}

impl<S> SuspendedResourcesHolder<S> {
    /// Check if resources of the backing resource manager were set aside.
    pub fn has_resources(&self) -> bool {
        self.suspended_resources.is_some()
    }

    pub fn synchronization_count(&self) -> usize {
        self.synchronizations.as_ref().map_or(0, Vec::len)
    }

    /// Name of the suspended transaction.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn was_active(&self) -> bool {
        self.was_active
    }
}

impl<S> fmt::Debug for SuspendedResourcesHolder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedResourcesHolder")
            .field("token", &self.token)
            .field("has_resources", &self.has_resources())
            .field("synchronizations", &self.synchronization_count())
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("isolation", &self.isolation)
            .field("was_active", &self.was_active)
            .finish()
    }
}

/// Construction parameters for a status.
pub(crate) struct StatusParts<H: ResourceManagerHooks> {
    pub name: Option<String>,
    pub transaction: Option<H::Transaction>,
    pub new_transaction: bool,
    pub new_synchronization: bool,
    pub read_only: bool,
    pub suspended: Option<SuspendedResourcesHolder<H::Suspended>>,
    pub suspension_depth: usize,
}

/// Handle representing one transaction attempt.
pub struct TransactionStatus<H: ResourceManagerHooks> {
    id: String,
    started_at: DateTime<Utc>,
    name: Option<String>,
    transaction: Option<H::Transaction>,
    new_transaction: bool,
    new_synchronization: bool,
    read_only: bool,
    savepoint: Option<H::Savepoint>,
    rollback_only: bool,
    completed: bool,
    suspended: Option<SuspendedResourcesHolder<H::Suspended>>,
    /// Registry suspension depth this status must be completed at.
    suspension_depth: usize,
}

impl<H: ResourceManagerHooks> TransactionStatus<H> {
    pub(crate) fn new(parts: StatusParts<H>) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            started_at: Utc::now(),
            name: parts.name,
            transaction: parts.transaction,
            new_transaction: parts.new_transaction,
            new_synchronization: parts.new_synchronization,
            read_only: parts.read_only,
            savepoint: None,
            rollback_only: false,
            completed: false,
            suspended: parts.suspended,
            suspension_depth: parts.suspension_depth,
        }
    }

    /// Unique id of this attempt, for diagnostics.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Check if this attempt began a physical transaction, as opposed to
    /// participating in one or running unmanaged.
    pub fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Check if a resource transaction backs this attempt.
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction(&self) -> Option<&H::Transaction> {
        self.transaction.as_ref()
    }

    /// Check if this attempt runs inside a savepoint.
    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Check if this attempt activated synchronization on the registry.
    pub fn is_new_synchronization(&self) -> bool {
        self.new_synchronization
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Check if the attempt has been committed or rolled back.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Check if this attempt set aside an enclosing transaction.
    pub fn has_suspended_resources(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn suspended_resources(&self) -> Option<&SuspendedResourcesHolder<H::Suspended>> {
        self.suspended.as_ref()
    }

    /// Check if the caller marked this attempt rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Mark this attempt rollback-only.
    ///
    /// The only outcome will then be a rollback. Once set, the flag is never
    /// cleared.
    pub fn set_rollback_only(&mut self) -> TransactionResult<()> {
        if self.completed {
            return Err(TransactionError::illegal_state(
                "transaction is already completed - cannot mark it rollback-only",
            ));
        }
        if self.transaction.is_none() {
            return Err(TransactionError::NoTransaction(
                "cannot mark rollback-only: no transaction is active for this scope".into(),
            ));
        }
        self.rollback_only = true;
        Ok(())
    }

    pub(crate) fn transaction_mut(&mut self) -> Option<&mut H::Transaction> {
        self.transaction.as_mut()
    }

    pub(crate) fn set_savepoint(&mut self, savepoint: H::Savepoint) {
        self.savepoint = Some(savepoint);
    }

    pub(crate) fn take_savepoint(&mut self) -> Option<H::Savepoint> {
        self.savepoint.take()
    }

    pub(crate) fn savepoint(&self) -> Option<&H::Savepoint> {
        self.savepoint.as_ref()
    }

    pub(crate) fn take_suspended(&mut self) -> Option<SuspendedResourcesHolder<H::Suspended>> {
        self.suspended.take()
    }

    pub(crate) fn suspension_token(&self) -> Option<Ulid> {
        self.suspended.as_ref().map(|s| s.token)
    }

    pub(crate) fn suspension_depth(&self) -> usize {
        self.suspension_depth
    }

    pub(crate) fn set_completed(&mut self) {
        self.completed = true;
    }
}

impl<H: ResourceManagerHooks> fmt::Debug for TransactionStatus<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("transaction", &self.transaction)
            .field("new_transaction", &self.new_transaction)
            .field("new_synchronization", &self.new_synchronization)
            .field("savepoint", &self.savepoint)
            .field("rollback_only", &self.rollback_only)
            .field("completed", &self.completed)
            .field("suspended", &self.suspended)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHooks;

    fn status(transaction: bool) -> TransactionStatus<RecordingHooks> {
        TransactionStatus::new(StatusParts {
            name: Some("audit".into()),
            transaction: transaction.then(Default::default),
            new_transaction: transaction,
            new_synchronization: false,
            read_only: false,
            suspended: None,
            suspension_depth: 0,
        })
    }

    #[test]
    fn test_rollback_only_is_monotonic() {
        let mut status = status(true);
        assert!(!status.is_rollback_only());
        status.set_rollback_only().unwrap();
        status.set_rollback_only().unwrap();
        assert!(status.is_rollback_only());
    }

    #[test]
    fn test_rollback_only_without_transaction() {
        let mut status = status(false);
        let err = status.set_rollback_only().unwrap_err();
        assert!(matches!(err, TransactionError::NoTransaction(_)));
    }

    #[test]
    fn test_rollback_only_after_completion() {
        let mut status = status(true);
        status.set_completed();
        assert!(matches!(
            status.set_rollback_only(),
            Err(TransactionError::IllegalTransactionState(_))
        ));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = status(true);
        let b = status(true);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), Some("audit"));
        assert!(!a.has_savepoint());
    }
}
