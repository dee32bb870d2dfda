//! Coordinator configuration.

use serde::{Deserialize, Serialize};

use crate::transaction::error::{TransactionError, TransactionResult};

/// Largest timeout a definition can carry, in seconds.
pub const MAX_TIMEOUT_SECONDS: u32 = i32::MAX as u32;

/// When the coordinator activates synchronization on the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronizationMode {
    /// Activate synchronization for every physical transaction begun.
    #[default]
    OnActualTransaction,
    /// Never activate synchronization.
    Never,
}

/// Coordinator configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// When synchronization callbacks are supported.
    pub synchronization: SynchronizationMode,
    /// Timeout applied when a definition specifies none. At most
    /// [`MAX_TIMEOUT_SECONDS`].
    pub default_timeout: Option<u32>,
    /// Allow NESTED propagation inside an existing transaction.
    pub nested_transaction_allowed: bool,
    /// Reject participating definitions whose isolation or read-only flag
    /// conflicts with the existing transaction.
    pub validate_existing_transaction: bool,
    /// Mark the outer transaction rollback-only when a participant fails.
    pub global_rollback_on_participation_failure: bool,
    /// Raise `UnexpectedRollback` as soon as a participant sees the global
    /// rollback-only marker, instead of only at the outermost commit.
    pub fail_early_on_global_rollback_only: bool,
    /// Roll back when the commit hook itself fails.
    pub rollback_on_commit_failure: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            synchronization: SynchronizationMode::default(),
            default_timeout: None,
            nested_transaction_allowed: true,
            validate_existing_transaction: false,
            global_rollback_on_participation_failure: true,
            fail_early_on_global_rollback_only: false,
            rollback_on_commit_failure: false,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> TransactionResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TransactionError::system("invalid coordinator configuration", e))?;
        if let Some(seconds) = config.default_timeout.filter(|s| *s > MAX_TIMEOUT_SECONDS) {
            return Err(TransactionError::system(
                "invalid coordinator configuration",
                format!("default_timeout {} exceeds {} seconds", seconds, MAX_TIMEOUT_SECONDS),
            ));
        }
        Ok(config)
    }

    /// Set the synchronization mode.
    pub fn synchronization(mut self, value: SynchronizationMode) -> Self {
        self.synchronization = value;
        self
    }

    /// Set the default timeout in seconds, clamped to [`MAX_TIMEOUT_SECONDS`].
    pub fn default_timeout(mut self, seconds: u32) -> Self {
        self.default_timeout = Some(seconds.min(MAX_TIMEOUT_SECONDS));
        self
    }

    /// Set nested_transaction_allowed flag.
    pub fn nested_transaction_allowed(mut self, value: bool) -> Self {
        self.nested_transaction_allowed = value;
        self
    }

    /// Set validate_existing_transaction flag.
    pub fn validate_existing_transaction(mut self, value: bool) -> Self {
        self.validate_existing_transaction = value;
        self
    }

    /// Set global_rollback_on_participation_failure flag.
    pub fn global_rollback_on_participation_failure(mut self, value: bool) -> Self {
        self.global_rollback_on_participation_failure = value;
        self
    }

    /// Set fail_early_on_global_rollback_only flag.
    pub fn fail_early_on_global_rollback_only(mut self, value: bool) -> Self {
        self.fail_early_on_global_rollback_only = value;
        self
    }

    /// Set rollback_on_commit_failure flag.
    pub fn rollback_on_commit_failure(mut self, value: bool) -> Self {
        self.rollback_on_commit_failure = value;
        self
    }
}
