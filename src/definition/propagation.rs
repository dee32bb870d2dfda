//! Propagation behaviors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a requested transaction relates to one already active in the same
/// execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current transaction, or begin one if none exists.
    #[default]
    Required,

    /// Suspend the current transaction, if any, and always begin a new one.
    RequiresNew,

    /// Join the current transaction, or run unmanaged if none exists.
    Supports,

    /// Suspend the current transaction, if any, and run unmanaged.
    NotSupported,

    /// Run unmanaged; fail if a transaction exists.
    Never,

    /// Join the current transaction; fail if none exists.
    Mandatory,

    /// Run inside a savepoint of the current transaction, or begin one if
    /// none exists.
    Nested,
}

impl Propagation {
    pub const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::RequiresNew,
        Propagation::Supports,
        Propagation::NotSupported,
        Propagation::Never,
        Propagation::Mandatory,
        Propagation::Nested,
    ];

    /// Check if this behavior begins a transaction when none exists.
    pub fn begins_when_absent(&self) -> bool {
        matches!(
            self,
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested
        )
    }

    /// Check if this behavior sets an existing transaction aside.
    pub fn suspends_existing(&self) -> bool {
        matches!(self, Propagation::RequiresNew | Propagation::NotSupported)
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Supports => "SUPPORTS",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Mandatory => "MANDATORY",
            Propagation::Nested => "NESTED",
        };
        f.write_str(name)
    }
}

impl FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase().replace('-', "_");
        let name = upper.strip_prefix("PROPAGATION_").unwrap_or(&upper);
        match name {
            "REQUIRED" => Ok(Propagation::Required),
            "REQUIRES_NEW" => Ok(Propagation::RequiresNew),
            "SUPPORTS" => Ok(Propagation::Supports),
            "NOT_SUPPORTED" => Ok(Propagation::NotSupported),
            "NEVER" => Ok(Propagation::Never),
            "MANDATORY" => Ok(Propagation::Mandatory),
            "NESTED" => Ok(Propagation::Nested),
            _ => Err(format!("unknown propagation behavior: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_propagation() {
        assert_eq!(
            "PROPAGATION_REQUIRES_NEW".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert_eq!(
            "not-supported".parse::<Propagation>().unwrap(),
            Propagation::NotSupported
        );
        assert!("sometimes".parse::<Propagation>().is_err());

        for propagation in Propagation::ALL {
            assert_eq!(
                propagation.to_string().parse::<Propagation>().unwrap(),
                propagation
            );
        }
    }

    #[test]
    fn test_classification() {
        assert!(Propagation::Nested.begins_when_absent());
        assert!(!Propagation::Supports.begins_when_absent());
        assert!(Propagation::NotSupported.suspends_existing());
        assert!(!Propagation::Mandatory.suspends_existing());
    }
}
