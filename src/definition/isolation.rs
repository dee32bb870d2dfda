//! Transaction isolation levels.
//!
//! The coordinator never interprets an isolation level itself. It checks that
//! the backing resource can honor the requested level and forwards it to
//! `do_begin`; `Default` means "whatever the resource uses".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Requested degree of visibility between concurrent transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Isolation {
    /// Use the backing resource's default level.
    #[default]
    Default,

    /// Dirty reads, non-repeatable reads and phantom reads can occur.
    ReadUncommitted,

    /// Dirty reads are prevented; non-repeatable reads and phantoms can occur.
    ReadCommitted,

    /// Dirty and non-repeatable reads are prevented; phantoms can occur.
    RepeatableRead,

    /// Full serializability.
    Serializable,
}

impl Isolation {
    /// Check if this is the resource-default level.
    pub fn is_default(&self) -> bool {
        matches!(self, Isolation::Default)
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::Default => write!(f, "DEFAULT"),
            Isolation::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            Isolation::ReadCommitted => write!(f, "READ COMMITTED"),
            Isolation::RepeatableRead => write!(f, "REPEATABLE READ"),
            Isolation::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// Parse isolation level from string (SQL syntax or attribute constant).
impl FromStr for Isolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let name = upper.strip_prefix("ISOLATION_").unwrap_or(&upper);
        match name.replace(|c: char| c == '-' || c == '_', " ").as_str() {
            "DEFAULT" => Ok(Isolation::Default),
            "READ UNCOMMITTED" | "READUNCOMMITTED" => Ok(Isolation::ReadUncommitted),
            "READ COMMITTED" | "READCOMMITTED" => Ok(Isolation::ReadCommitted),
            "REPEATABLE READ" | "REPEATABLEREAD" => Ok(Isolation::RepeatableRead),
            "SERIALIZABLE" => Ok(Isolation::Serializable),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_isolation() {
        assert_eq!(Isolation::default(), Isolation::Default);
        assert!(Isolation::default().is_default());
        assert!(!Isolation::Serializable.is_default());
    }

    #[test]
    fn test_parse_isolation() {
        assert_eq!(
            "READ COMMITTED".parse::<Isolation>().unwrap(),
            Isolation::ReadCommitted
        );
        assert_eq!(
            "ISOLATION_REPEATABLE_READ".parse::<Isolation>().unwrap(),
            Isolation::RepeatableRead
        );
        assert_eq!(
            "read-uncommitted".parse::<Isolation>().unwrap(),
            Isolation::ReadUncommitted
        );
        assert_eq!("serializable".parse::<Isolation>().unwrap(), Isolation::Serializable);
        assert!("snapshot".parse::<Isolation>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for level in [
            Isolation::Default,
            Isolation::ReadUncommitted,
            Isolation::ReadCommitted,
            Isolation::RepeatableRead,
            Isolation::Serializable,
        ] {
            assert_eq!(level.to_string().parse::<Isolation>().unwrap(), level);
        }
    }
}
