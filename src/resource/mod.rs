//! Reference backing resources.
//!
//! Two implementations of [`ResourceManagerHooks`](crate::transaction::ResourceManagerHooks):
//!
//! - [`ConnectionTransactionManager`] drives local transactions on a single
//!   connection obtained from a [`ConnectionFactory`].
//! - [`GlobalTransactionManager`] adapts an external two-phase
//!   [`GlobalCoordinator`].
//!
//! [`MemoryStore`] is an in-memory connection factory for exercising the
//! connection manager without a real database.

mod connection;
mod global;
mod memory;

pub use connection::{
    Connection, ConnectionError, ConnectionFactory, ConnectionHolder, ConnectionTransaction,
    ConnectionTransactionManager,
};
pub use global::{GlobalCoordinator, GlobalFailure, GlobalStatus, GlobalTransaction, GlobalTransactionManager};
pub use memory::{ConnectionSnapshot, MemoryConnection, MemoryStore};

use crate::transaction::BoxError;

/// Naming layer that resolves a resource handle by name.
///
/// Managers call it once, at construction.
pub trait ResourceLookup {
    type Handle;

    fn lookup(&self, name: &str) -> Result<Self::Handle, BoxError>;
}
