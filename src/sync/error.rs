//! Synchronization registry error types.

use thiserror::Error;

use crate::sync::holder::ResourceKey;
use crate::transaction::TransactionError;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Misuse of the synchronization registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A holder is already bound for this key.
    #[error("already bound a resource holder for key [{0}]")]
    AlreadyBound(ResourceKey),

    /// No holder is bound for this key.
    #[error("no resource holder bound for key [{0}]")]
    NotBound(ResourceKey),

    /// The bound holder is not of the requested type.
    #[error("resource holder bound for key [{0}] has an unexpected type")]
    TypeMismatch(ResourceKey),

    /// Synchronization is not active.
    #[error("transaction synchronization is not active")]
    SynchronizationInactive,

    /// Synchronization is already active.
    #[error("cannot activate transaction synchronization - already active")]
    SynchronizationAlreadyActive,

    /// Synchronization is active but no actual transaction is.
    #[error("no actual transaction is active")]
    NoActualTransaction,
}

impl From<RegistryError> for TransactionError {
    fn from(err: RegistryError) -> Self {
        TransactionError::IllegalTransactionState(err.to_string())
    }
}
