//! Transaction error types.
//!
//! Backing resources report failures as [`ResourceFailure`] signals through
//! the hook contract. The coordinator translates every signal into the single
//! [`TransactionError`] taxonomy, so no resource-specific error type ever
//! reaches a caller; the original signal stays available as the error source.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::definition::Isolation;

/// Boxed error used to carry foreign causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Outcome of an ambiguous two-phase completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeuristicOutcome {
    /// All participants committed, but the coordinator decided on its own.
    Committed,
    /// All participants rolled back.
    RolledBack,
    /// Some participants committed and others rolled back.
    Mixed,
    /// The outcome could not be determined.
    Unknown,
}

impl fmt::Display for HeuristicOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeuristicOutcome::Committed => write!(f, "committed"),
            HeuristicOutcome::RolledBack => write!(f, "rolled back"),
            HeuristicOutcome::Mixed => write!(f, "mixed"),
            HeuristicOutcome::Unknown => write!(f, "unknown"),
        }
    }
}

/// Failure signal raised by a backing resource through the hook contract.
#[derive(Debug, Error)]
pub enum ResourceFailure {
    /// The resource does not support the requested operation, e.g. beginning
    /// while a transaction is already active.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// The resource had already rolled the transaction back.
    #[error("transaction was rolled back by the resource: {0}")]
    RolledBack(String),

    /// The resource reached a heuristic decision.
    #[error("heuristic completion ({outcome}): {message}")]
    Heuristic {
        outcome: HeuristicOutcome,
        message: String,
    },

    /// The resource was asked to do something its state does not allow.
    #[error("resource in illegal state: {0}")]
    IllegalState(String),

    /// Any other resource failure.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ResourceFailure {
    /// Create a failure without an underlying cause.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a foreign error.
    pub fn wrap(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a heuristic failure.
    pub fn heuristic(outcome: HeuristicOutcome, message: impl Into<String>) -> Self {
        Self::Heuristic {
            outcome,
            message: message.into(),
        }
    }
}

/// Lifecycle step during which a resource failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    Commit,
    Rollback,
    SetRollbackOnly,
    Suspend,
    Resume,
    Savepoint,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Begin => "begin",
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
            Phase::SetRollbackOnly => "set rollback-only",
            Phase::Suspend => "suspend",
            Phase::Resume => "resume",
            Phase::Savepoint => "savepoint",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while coordinating transactions.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The backing resource failed to begin a transaction.
    #[error("could not create transaction: {message}")]
    CannotCreateTransaction {
        message: String,
        #[source]
        cause: Option<ResourceFailure>,
    },

    /// Propagation or nesting misuse.
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// The requested isolation level cannot be honored.
    #[error("invalid isolation level {requested}: {message}")]
    InvalidIsolationLevel {
        requested: Isolation,
        message: String,
    },

    /// The requested timeout is not a valid value.
    #[error("invalid transaction timeout: {0}")]
    InvalidTimeout(i32),

    /// The backing resource refused to begin a nested transaction.
    #[error("nested transaction not permitted: {message}")]
    NestedTransactionNotPermitted {
        message: String,
        #[source]
        cause: Option<ResourceFailure>,
    },

    /// The backing resource cannot set an existing transaction aside.
    #[error("transaction suspension not supported: {message}")]
    SuspensionNotSupported {
        message: String,
        #[source]
        cause: Option<ResourceFailure>,
    },

    /// Commit was attempted but the transaction had already been rolled back.
    #[error("unexpected rollback: {message}")]
    UnexpectedRollback {
        message: String,
        #[source]
        cause: Option<ResourceFailure>,
    },

    /// Two-phase completion ended heuristically.
    #[error("heuristic completion: outcome {outcome}")]
    HeuristicCompletion {
        outcome: HeuristicOutcome,
        #[source]
        cause: Option<ResourceFailure>,
    },

    /// The transaction deadline has passed.
    #[error("transaction timed out: deadline was {deadline}")]
    TimedOut { deadline: DateTime<Utc> },

    /// An operation required an active transaction but there was none.
    #[error("no transaction: {0}")]
    NoTransaction(String),

    /// Any other failure of the backing resource or of a synchronization.
    #[error("transaction system error: {message}")]
    TransactionSystem {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },

    /// A failure followed by a second one while cleaning up after it.
    /// `error` is what went wrong first and stays the source.
    #[error("{error} (followed by: {related})")]
    WithRelated {
        #[source]
        error: Box<TransactionError>,
        related: Box<TransactionError>,
    },
}

impl TransactionError {
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalTransactionState(message.into())
    }

    pub fn system(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::TransactionSystem {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn unexpected_rollback(message: impl Into<String>) -> Self {
        Self::UnexpectedRollback {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a failure that happened while cleaning up after `self`.
    pub fn with_related(self, related: TransactionError) -> Self {
        Self::WithRelated {
            error: Box::new(self),
            related: Box::new(related),
        }
    }

    /// The first failure, looking through attached related failures.
    pub fn primary(&self) -> &TransactionError {
        match self {
            Self::WithRelated { error, .. } => error.primary(),
            other => other,
        }
    }

    /// Failures attached by `with_related`, outermost first.
    pub fn related(&self) -> Vec<&TransactionError> {
        let mut related = Vec::new();
        let mut current = self;
        while let Self::WithRelated { error, related: next } = current {
            related.push(next.as_ref());
            current = error.as_ref();
        }
        related
    }

    /// Translate a failure raised while beginning a transaction.
    ///
    /// "Not supported" means the resource refuses to begin while already
    /// active, which is a nesting problem; everything else is a creation
    /// failure.
    pub fn from_begin_failure(failure: ResourceFailure) -> Self {
        match failure {
            ResourceFailure::NotSupported(ref message) => Self::NestedTransactionNotPermitted {
                message: format!("resource refused to begin: {}", message),
                cause: Some(failure),
            },
            other => Self::CannotCreateTransaction {
                message: other.to_string(),
                cause: Some(other),
            },
        }
    }

    /// Translate a failure raised while creating a savepoint.
    pub fn from_savepoint_failure(failure: ResourceFailure) -> Self {
        match failure {
            ResourceFailure::NotSupported(ref message) => Self::NestedTransactionNotPermitted {
                message: format!("savepoints not supported: {}", message),
                cause: Some(failure),
            },
            other => Self::CannotCreateTransaction {
                message: format!("could not create savepoint: {}", other),
                cause: Some(other),
            },
        }
    }

    /// Translate a failure raised while suspending a transaction.
    pub fn from_suspend_failure(failure: ResourceFailure) -> Self {
        match failure {
            ResourceFailure::NotSupported(ref message) => Self::SuspensionNotSupported {
                message: message.clone(),
                cause: Some(failure),
            },
            other => Self::from_resource_failure(Phase::Suspend, other),
        }
    }

    /// Translate a failure raised during any other lifecycle step.
    pub fn from_resource_failure(phase: Phase, failure: ResourceFailure) -> Self {
        match failure {
            ResourceFailure::RolledBack(ref message) => Self::UnexpectedRollback {
                message: format!("{} found the transaction already rolled back: {}", phase, message),
                cause: Some(failure),
            },
            ResourceFailure::Heuristic { outcome, .. } => Self::HeuristicCompletion {
                outcome,
                cause: Some(failure),
            },
            other => Self::TransactionSystem {
                message: format!("{} failed", phase),
                cause: Some(Box::new(other)),
            },
        }
    }

    /// Get the heuristic outcome, if this is a heuristic completion.
    pub fn heuristic_outcome(&self) -> Option<HeuristicOutcome> {
        match self.primary() {
            Self::HeuristicCompletion { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }

    /// Check if this error reports an ambiguous two-phase outcome.
    pub fn is_heuristic(&self) -> bool {
        self.heuristic_outcome().is_some()
    }

    /// Check if this error is caused by misuse of the API rather than by the
    /// backing resource.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self.primary(),
            Self::IllegalTransactionState(_)
                | Self::NoTransaction(_)
                | Self::InvalidIsolationLevel { .. }
                | Self::InvalidTimeout(_)
                | Self::NestedTransactionNotPermitted { .. }
                | Self::SuspensionNotSupported { .. }
        )
    }

    /// Check if the whole unit of work may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.primary(),
            Self::CannotCreateTransaction { .. }
                | Self::UnexpectedRollback { .. }
                | Self::TimedOut { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_begin_translation() {
        let nested = TransactionError::from_begin_failure(ResourceFailure::NotSupported(
            "already active".into(),
        ));
        assert!(matches!(
            nested,
            TransactionError::NestedTransactionNotPermitted { .. }
        ));
        assert!(nested.source().is_some());

        let create = TransactionError::from_begin_failure(ResourceFailure::failed("unreachable"));
        assert!(matches!(
            create,
            TransactionError::CannotCreateTransaction { .. }
        ));
        assert!(create.is_retryable());
    }

    #[test]
    fn test_completion_translation() {
        let heuristic = TransactionError::from_resource_failure(
            Phase::Commit,
            ResourceFailure::heuristic(HeuristicOutcome::Mixed, "participant 2 committed"),
        );
        assert_eq!(heuristic.heuristic_outcome(), Some(HeuristicOutcome::Mixed));

        let rolled_back = TransactionError::from_resource_failure(
            Phase::Commit,
            ResourceFailure::RolledBack("deadlock victim".into()),
        );
        assert!(matches!(
            rolled_back,
            TransactionError::UnexpectedRollback { .. }
        ));

        let system = TransactionError::from_resource_failure(
            Phase::Rollback,
            ResourceFailure::wrap("socket closed", std::io::Error::other("eof")),
        );
        assert!(matches!(system, TransactionError::TransactionSystem { .. }));
        assert_eq!(system.to_string(), "transaction system error: rollback failed");
        let cause = system.source().unwrap();
        assert_eq!(cause.to_string(), "socket closed");
        assert_eq!(cause.source().unwrap().to_string(), "eof");
    }

    #[test]
    fn test_related_failure_keeps_primary() {
        let primary = TransactionError::from_resource_failure(
            Phase::Commit,
            ResourceFailure::heuristic(HeuristicOutcome::Mixed, "split"),
        );
        let cleanup = TransactionError::from_resource_failure(
            Phase::Cleanup,
            ResourceFailure::failed("holder still bound"),
        );
        let err = primary.with_related(cleanup);

        assert_eq!(err.heuristic_outcome(), Some(HeuristicOutcome::Mixed));
        assert!(matches!(err.primary(), TransactionError::HeuristicCompletion { .. }));
        assert_eq!(err.related().len(), 1);
        assert_eq!(
            err.related()[0].to_string(),
            "transaction system error: cleanup failed"
        );
        assert!(err.to_string().starts_with("heuristic completion: outcome"));
        assert!(err.to_string().contains("cleanup failed"));
        assert!(format!("{:?}", err).contains("holder still bound"));
        assert_eq!(
            err.source().unwrap().to_string(),
            err.primary().to_string()
        );
    }

    #[test]
    fn test_suspend_translation() {
        let err = TransactionError::from_suspend_failure(ResourceFailure::NotSupported(
            "no suspend".into(),
        ));
        assert!(matches!(err, TransactionError::SuspensionNotSupported { .. }));
        assert!(err.is_usage_error());
        assert!(!err.is_heuristic());
    }
}
