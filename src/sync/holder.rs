//! Resource holders: per-resource state bound to the current transaction.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::transaction::{TransactionError, TransactionResult};

/// Key under which a resource manager binds its holder in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Shared bookkeeping embedded in every resource holder.
///
/// Holders are shared between the registry and the transaction object that
/// created them, so all state uses interior mutability.
#[derive(Debug, Default)]
pub struct HolderSupport {
    synchronized_with_transaction: AtomicBool,
    rollback_only: AtomicBool,
    deadline: Mutex<Option<DateTime<Utc>>>,
    reference_count: AtomicUsize,
    void: AtomicBool,
}

impl HolderSupport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the holder as synchronized with a transaction.
    pub fn set_synchronized_with_transaction(&self, value: bool) {
        self.synchronized_with_transaction
            .store(value, Ordering::SeqCst);
    }

    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.synchronized_with_transaction.load(Ordering::SeqCst)
    }

    /// Mark the resource transaction as rollback-only.
    ///
    /// This is the global marker every participant of the transaction sees.
    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    pub fn reset_rollback_only(&self) {
        self.rollback_only.store(false, Ordering::SeqCst);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Set the deadline to `seconds` from now.
    pub fn set_timeout_in_seconds(&self, seconds: u32) {
        self.set_deadline(Utc::now() + Duration::seconds(i64::from(seconds)));
    }

    pub fn set_deadline(&self, deadline: DateTime<Utc>) {
        *self.deadline.lock() = Some(deadline);
    }

    pub fn has_timeout(&self) -> bool {
        self.deadline.lock().is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        *self.deadline.lock()
    }

    /// Remaining time in milliseconds.
    ///
    /// Once the deadline has passed, the holder is marked rollback-only and
    /// `TimedOut` is returned.
    pub fn time_to_live_in_millis(&self) -> TransactionResult<i64> {
        let deadline = self
            .deadline()
            .ok_or_else(|| TransactionError::illegal_state("no timeout specified for this resource holder"))?;
        let remaining = (deadline - Utc::now()).num_milliseconds();
        if remaining <= 0 {
            self.set_rollback_only();
            return Err(TransactionError::TimedOut { deadline });
        }
        Ok(remaining)
    }

    /// Remaining time in whole seconds, rounded up.
    pub fn time_to_live_in_seconds(&self) -> TransactionResult<i64> {
        let millis = self.time_to_live_in_millis()?;
        Ok((millis + 999) / 1000)
    }

    /// Fail with `TimedOut` if the deadline, when set, has passed.
    pub fn check_deadline(&self) -> TransactionResult<()> {
        if self.has_timeout() {
            self.time_to_live_in_millis()?;
        }
        Ok(())
    }

    /// Increase the reference count by one.
    pub fn requested(&self) {
        self.reference_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrease the reference count by one.
    pub fn released(&self) {
        let _ = self
            .reference_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn is_open(&self) -> bool {
        self.reference_count.load(Ordering::SeqCst) > 0
    }

    /// Reset the transactional state, keeping the reference count.
    pub fn clear(&self) {
        self.set_synchronized_with_transaction(false);
        self.reset_rollback_only();
        *self.deadline.lock() = None;
    }

    /// Reset all state.
    pub fn reset(&self) {
        self.clear();
        self.reference_count.store(0, Ordering::SeqCst);
    }

    /// Mark the holder as void: no longer usable after unbinding.
    pub fn unbound(&self) {
        self.void.store(true, Ordering::SeqCst);
    }

    pub fn is_void(&self) -> bool {
        self.void.load(Ordering::SeqCst)
    }
}

/// Conversion used to downcast shared holders back to their concrete type.
pub trait AsAnyArc {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// State a resource manager binds to the registry for one transaction.
pub trait ResourceHolder: AsAnyArc + fmt::Debug + Send + Sync {
    fn support(&self) -> &HolderSupport;

    /// Reset the transactional state of this holder.
    fn reset(&self) {
        self.support().reset();
    }

    /// Notify the holder that it has been unbound.
    fn unbound(&self) {
        self.support().unbound();
    }

    /// Check if the holder has been unbound and must not be reused.
    fn is_void(&self) -> bool {
        self.support().is_void()
    }
}
