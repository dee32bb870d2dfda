//! Immutable description of a requested transaction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::definition::isolation::Isolation;
use crate::definition::propagation::Propagation;

/// Timeout value meaning "no timeout".
pub const TIMEOUT_NONE: i32 = -1;

/// What a caller asks for when it requests a transaction.
///
/// Created per `get_transaction` call and compared by value only. The
/// defaults are `REQUIRED`, `DEFAULT` isolation, no timeout, read-write and
/// no name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionDefinition {
    propagation: Propagation,
    isolation: Isolation,
    timeout_seconds: i32,
    read_only: bool,
    name: Option<String>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::default(),
            isolation: Isolation::default(),
            timeout_seconds: TIMEOUT_NONE,
            read_only: false,
            name: None,
        }
    }
}

impl TransactionDefinition {
    /// Create a definition with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a definition with the given propagation and other defaults.
    pub fn with_propagation(propagation: Propagation) -> Self {
        Self::default().propagation(propagation)
    }

    /// Set the propagation behavior.
    pub fn propagation(mut self, value: Propagation) -> Self {
        self.propagation = value;
        self
    }

    /// Set the isolation level.
    pub fn isolation(mut self, value: Isolation) -> Self {
        self.isolation = value;
        self
    }

    /// Set the timeout in seconds; `TIMEOUT_NONE` clears it.
    pub fn timeout_seconds(mut self, value: i32) -> Self {
        self.timeout_seconds = value;
        self
    }

    /// Set the read-only hint.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Set the diagnostic name.
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = Some(value.into());
        self
    }

    pub fn get_propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn get_isolation(&self) -> Isolation {
        self.isolation
    }

    /// Timeout in seconds, `TIMEOUT_NONE` when unset.
    pub fn get_timeout(&self) -> i32 {
        self.timeout_seconds
    }

    /// Timeout as an option, `None` when unset.
    pub fn timeout(&self) -> Option<u32> {
        u32::try_from(self.timeout_seconds).ok()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Renders the comma-separated attribute form accepted by `FromStr`.
impl fmt::Display for TransactionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PROPAGATION_{}", self.propagation)?;
        if !self.isolation.is_default() {
            write!(f, ",ISOLATION_{}", self.isolation.to_string().replace(' ', "_"))?;
        }
        if self.timeout_seconds != TIMEOUT_NONE {
            write!(f, ",timeout_{}", self.timeout_seconds)?;
        }
        if self.read_only {
            write!(f, ",readOnly")?;
        }
        Ok(())
    }
}

/// Parse `PROPAGATION_REQUIRES_NEW,ISOLATION_SERIALIZABLE,timeout_10,readOnly`.
///
/// Tokens may appear in any order; a missing token keeps its default.
impl FromStr for TransactionDefinition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut definition = TransactionDefinition::default();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.starts_with("PROPAGATION_") {
                definition.propagation = token.parse()?;
            } else if token.starts_with("ISOLATION_") {
                definition.isolation = token.parse()?;
            } else if let Some(secs) = token.strip_prefix("timeout_") {
                definition.timeout_seconds = secs
                    .parse()
                    .map_err(|_| format!("invalid timeout: {}", token))?;
            } else if token == "readOnly" {
                definition.read_only = true;
            } else {
                return Err(format!("unknown transaction attribute: {}", token));
            }
        }
        Ok(definition)
    }
}
