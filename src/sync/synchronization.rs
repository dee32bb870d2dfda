//! Transaction synchronization callbacks.
//!
//! Listeners registered with the registry are notified at fixed points of a
//! transaction's completion. `before_*` callbacks run in registration order,
//! `after_*` callbacks run in reverse registration order so the first
//! registered listener observes completion last.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::transaction::{BoxError, TransactionError, TransactionResult};

/// Result type for synchronization callbacks.
pub type SynchronizationResult = Result<(), BoxError>;

/// Completion outcome passed to `after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// Heuristic or otherwise undetermined outcome.
    Unknown,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Committed => write!(f, "COMMITTED"),
            CompletionStatus::RolledBack => write!(f, "ROLLED_BACK"),
            CompletionStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Listener notified during a transaction's lifecycle.
///
/// Every method has a no-op default. Failures from `before_commit` abort the
/// commit and roll the transaction back; failures from `after_commit`
/// propagate to the committer. Failures from `before_completion` and
/// `after_completion` are logged and swallowed.
pub trait TransactionSynchronization: Send + Sync {
    /// The transaction is being suspended; unbind any resources.
    fn suspend(&self) {}

    /// The transaction is being resumed; rebind any resources.
    fn resume(&self) {}

    /// Flush pending state to the underlying resource.
    fn flush(&self) {}

    /// Invoked before commit, before `before_completion`.
    fn before_commit(&self, _read_only: bool) -> SynchronizationResult {
        Ok(())
    }

    /// Invoked before commit or rollback.
    fn before_completion(&self) -> SynchronizationResult {
        Ok(())
    }

    /// Invoked after a successful commit, before `after_completion`.
    fn after_commit(&self) -> SynchronizationResult {
        Ok(())
    }

    /// Invoked after commit or rollback.
    fn after_completion(&self, _status: CompletionStatus) -> SynchronizationResult {
        Ok(())
    }
}

/// Shared handle to a registered synchronization.
pub type SharedSynchronization = Arc<dyn TransactionSynchronization>;

pub(crate) fn invoke_before_commit(
    synchronizations: &[SharedSynchronization],
    read_only: bool,
) -> TransactionResult<()> {
    for (index, synchronization) in synchronizations.iter().enumerate() {
        trace!(index, read_only, "invoking before_commit");
        synchronization
            .before_commit(read_only)
            .map_err(|e| TransactionError::system("before-commit synchronization failed", e))?;
    }
    Ok(())
}

pub(crate) fn invoke_before_completion(synchronizations: &[SharedSynchronization]) {
    for (index, synchronization) in synchronizations.iter().enumerate() {
        trace!(index, "invoking before_completion");
        if let Err(e) = synchronization.before_completion() {
            warn!(index, error = %e, "before_completion synchronization failed");
        }
    }
}

pub(crate) fn invoke_after_commit(synchronizations: &[SharedSynchronization]) -> TransactionResult<()> {
    for (index, synchronization) in synchronizations.iter().enumerate().rev() {
        trace!(index, "invoking after_commit");
        synchronization
            .after_commit()
            .map_err(|e| TransactionError::system("after-commit synchronization failed", e))?;
    }
    Ok(())
}

pub(crate) fn invoke_after_completion(
    synchronizations: &[SharedSynchronization],
    status: CompletionStatus,
) {
    for (index, synchronization) in synchronizations.iter().enumerate().rev() {
        trace!(index, %status, "invoking after_completion");
        if let Err(e) = synchronization.after_completion(status) {
            warn!(index, %status, error = %e, "after_completion synchronization failed");
        }
    }
}
