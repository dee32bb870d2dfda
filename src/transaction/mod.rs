//! Transaction coordination.
//!
//! The coordinator resolves propagation behavior against whatever is bound in
//! the caller's [`SynchronizationRegistry`](crate::sync::SynchronizationRegistry),
//! suspends and resumes enclosing transactions, and drives commit and
//! rollback through the [`ResourceManagerHooks`] of one backing resource.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionTemplate                       │
//! │        (execute closure, commit on Ok, rollback on Err)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionCoordinator                     │
//! │   (propagation, suspend/resume, synchronization dispatch)   │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │ Resource-   │       │Synchroniz-  │
//!  │   Status    │       │ ManagerHooks│       │ationRegistry│
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use txcoord::definition::{Propagation, TransactionDefinition};
//! use txcoord::sync::SynchronizationRegistry;
//! use txcoord::transaction::TransactionCoordinator;
//!
//! let coordinator = TransactionCoordinator::new(hooks);
//! let mut registry = SynchronizationRegistry::new();
//!
//! let mut status = coordinator.get_transaction(&mut registry, &TransactionDefinition::new())?;
//! // work against the bound resource
//! coordinator.commit(&mut registry, &mut status)?;
//! ```

mod config;
mod coordinator;
mod error;
mod hooks;
mod status;
mod template;

pub use config::{CoordinatorConfig, SynchronizationMode, MAX_TIMEOUT_SECONDS};
pub use coordinator::TransactionCoordinator;
pub use error::{
    BoxError, HeuristicOutcome, Phase, ResourceFailure, TransactionError, TransactionResult,
};
pub use hooks::{HookResult, ResourceManagerHooks};
pub use status::{SuspendedResourcesHolder, TransactionStatus};
pub use template::TransactionTemplate;
