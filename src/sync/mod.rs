//! Transaction synchronization: per-context resources and callbacks.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  SynchronizationRegistry                     │
//! │        (one per logical execution context, passed in)        │
//! └──────────────────────────────────────────────────────────────┘
//!          │                        │                      │
//!          ▼                        ▼                      ▼
//!  ┌───────────────┐     ┌─────────────────────┐   ┌───────────────┐
//!  │ ResourceKey → │     │ Transaction-        │   │   Ambient     │
//!  │ ResourceHolder│     │ Synchronization list│   │  attributes   │
//!  └───────────────┘     └─────────────────────┘   └───────────────┘
//! ```

mod error;
mod holder;
mod registry;
mod synchronization;

pub use error::{RegistryError, RegistryResult};
pub use holder::{AsAnyArc, HolderSupport, ResourceHolder, ResourceKey};
pub use registry::{RegistryState, SynchronizationRegistry};
pub use synchronization::{
    CompletionStatus, SharedSynchronization, SynchronizationResult, TransactionSynchronization,
};

pub(crate) use synchronization::{
    invoke_after_commit, invoke_after_completion, invoke_before_commit, invoke_before_completion,
};
