//! txcoord - resource-agnostic transaction coordination
//!
//! This crate resolves propagation behavior (join, suspend, nest, reject),
//! suspends and resumes enclosing transactions in strict LIFO order, and
//! notifies registered synchronizations around commit and rollback. The
//! backing resource plugs in through one trait,
//! [`ResourceManagerHooks`](transaction::ResourceManagerHooks).
//!
//! Per-context state lives in a [`SynchronizationRegistry`](sync::SynchronizationRegistry)
//! the caller owns and passes into every call; there is no global state.
//!
//! # Example
//!
//! ```
//! use txcoord::resource::{ConnectionTransactionManager, MemoryStore};
//! use txcoord::sync::SynchronizationRegistry;
//! use txcoord::transaction::{TransactionCoordinator, TransactionTemplate};
//!
//! let store = MemoryStore::new();
//! let coordinator = TransactionCoordinator::new(ConnectionTransactionManager::new("orders", store.clone()));
//! let template = TransactionTemplate::new(coordinator.clone());
//! let mut registry = SynchronizationRegistry::new();
//!
//! template
//!     .execute(&mut registry, |_status, registry| {
//!         coordinator
//!             .hooks()
//!             .with_connection(registry, |conn| conn.put("order-1", "pending"))
//!     })
//!     .unwrap();
//! assert_eq!(store.get("order-1").as_deref(), Some("pending"));
//! ```

pub mod definition;
pub mod resource;
pub mod sync;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;
