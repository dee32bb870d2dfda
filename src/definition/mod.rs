//! Transaction definitions: what a caller asks for.
//!
//! A [`TransactionDefinition`] combines a [`Propagation`] behavior, an
//! [`Isolation`] level, a timeout, a read-only hint and an optional name.
//!
//! # Usage
//!
//! ```
//! use txcoord::definition::{Isolation, Propagation, TransactionDefinition};
//!
//! let def = TransactionDefinition::with_propagation(Propagation::RequiresNew)
//!     .isolation(Isolation::Serializable)
//!     .timeout_seconds(10)
//!     .name("nightly-report");
//!
//! let parsed: TransactionDefinition =
//!     "PROPAGATION_REQUIRES_NEW,ISOLATION_SERIALIZABLE,timeout_10".parse().unwrap();
//! assert_eq!(parsed.get_propagation(), def.get_propagation());
//! ```

mod attributes;
mod isolation;
mod propagation;

pub use attributes::{TransactionDefinition, TIMEOUT_NONE};
pub use isolation::Isolation;
pub use propagation::Propagation;
