//! The per-context synchronization registry.
//!
//! One registry exists per logical execution context. It is an ordinary value
//! owned by whoever drives the transactions on that context and passed into
//! every coordinator call, so suspend/resume can be exercised without threads.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{trace, warn};
use ulid::Ulid;

use crate::definition::Isolation;
use crate::sync::error::{RegistryError, RegistryResult};
use crate::sync::holder::{AsAnyArc, ResourceHolder, ResourceKey};
use crate::sync::synchronization::{SharedSynchronization, TransactionSynchronization};

/// Snapshot of a registry's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryState {
    pub resource_keys: Vec<ResourceKey>,
    pub synchronization_active: bool,
    pub synchronization_count: usize,
    pub transaction_name: Option<String>,
    pub read_only: bool,
    pub isolation: Option<Isolation>,
    pub actual_transaction_active: bool,
}

/// Resources, callbacks and ambient attributes of one execution context.
#[derive(Default)]
pub struct SynchronizationRegistry {
    resources: BTreeMap<ResourceKey, Arc<dyn ResourceHolder>>,
    /// `None` while synchronization is inactive.
    synchronizations: Option<Vec<SharedSynchronization>>,
    current_transaction_name: Option<String>,
    current_transaction_read_only: bool,
    current_transaction_isolation: Option<Isolation>,
    actual_transaction_active: bool,
    /// Tokens of outstanding suspensions, innermost last. Survives `clear`.
    suspensions: Vec<Ulid>,
}

impl SynchronizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Resources ====================

    /// Bind a holder for `key`.
    pub fn bind_resource(
        &mut self,
        key: ResourceKey,
        holder: Arc<dyn ResourceHolder>,
    ) -> RegistryResult<()> {
        if let Some(existing) = self.resources.get(&key) {
            if !existing.is_void() {
                return Err(RegistryError::AlreadyBound(key));
            }
        }
        trace!(%key, "bound resource holder");
        self.resources.insert(key, holder);
        Ok(())
    }

    /// Unbind and return the holder for `key`.
    pub fn unbind_resource(&mut self, key: &ResourceKey) -> RegistryResult<Arc<dyn ResourceHolder>> {
        self.unbind_resource_if_possible(key)
            .ok_or_else(|| RegistryError::NotBound(key.clone()))
    }

    /// Unbind the holder for `key`, if any.
    pub fn unbind_resource_if_possible(&mut self, key: &ResourceKey) -> Option<Arc<dyn ResourceHolder>> {
        let holder = self.resources.remove(key)?;
        if holder.is_void() {
            return None;
        }
        trace!(%key, "unbound resource holder");
        Some(holder)
    }

    /// Get the holder bound for `key`. Void holders are dropped.
    pub fn get_resource(&mut self, key: &ResourceKey) -> Option<Arc<dyn ResourceHolder>> {
        if self.resources.get(key)?.is_void() {
            self.resources.remove(key);
            return None;
        }
        self.resources.get(key).cloned()
    }

    /// Get the holder bound for `key` as its concrete type.
    pub fn get_resource_as<H: ResourceHolder + 'static>(
        &mut self,
        key: &ResourceKey,
    ) -> RegistryResult<Option<Arc<H>>> {
        match self.get_resource(key) {
            Some(holder) => holder
                .into_any_arc()
                .downcast::<H>()
                .map(Some)
                .map_err(|_| RegistryError::TypeMismatch(key.clone())),
            None => Ok(None),
        }
    }

    pub fn has_resource(&mut self, key: &ResourceKey) -> bool {
        self.get_resource(key).is_some()
    }

    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        self.resources.keys().cloned().collect()
    }

    // ==================== Synchronizations ====================

    pub fn is_synchronization_active(&self) -> bool {
        self.synchronizations.is_some()
    }

    /// Activate or deactivate synchronization for the current transaction.
    ///
    /// Activating starts with an empty callback list. Deactivating drops any
    /// registered callbacks without notifying them.
    pub fn set_synchronization_active(&mut self, active: bool) -> RegistryResult<()> {
        match (active, self.is_synchronization_active()) {
            (true, true) => Err(RegistryError::SynchronizationAlreadyActive),
            (false, false) => Err(RegistryError::SynchronizationInactive),
            (true, false) => {
                self.synchronizations = Some(Vec::new());
                Ok(())
            }
            (false, true) => {
                self.synchronizations = None;
                Ok(())
            }
        }
    }

    /// Register a callback for the current transaction.
    pub fn register_synchronization(
        &mut self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> RegistryResult<()> {
        if !self.actual_transaction_active {
            return Err(if self.is_synchronization_active() {
                RegistryError::NoActualTransaction
            } else {
                RegistryError::SynchronizationInactive
            });
        }
        let synchronizations = self
            .synchronizations
            .as_mut()
            .ok_or(RegistryError::SynchronizationInactive)?;
        synchronizations.push(synchronization);
        Ok(())
    }

    /// Registered callbacks in registration order.
    pub fn synchronizations(&self) -> RegistryResult<Vec<SharedSynchronization>> {
        self.synchronizations
            .clone()
            .ok_or(RegistryError::SynchronizationInactive)
    }

    /// Take the callback list, leaving synchronization inactive.
    pub(crate) fn take_synchronizations(&mut self) -> Option<Vec<SharedSynchronization>> {
        self.synchronizations.take()
    }

    /// Restore a callback list taken by `take_synchronizations`.
    pub(crate) fn restore_synchronizations(&mut self, synchronizations: Vec<SharedSynchronization>) {
        self.synchronizations = Some(synchronizations);
    }

    /// Ask every registered callback to flush.
    pub fn flush(&self) {
        for synchronization in self.synchronizations.iter().flatten() {
            synchronization.flush();
        }
    }

    // ==================== Ambient attributes ====================

    pub fn set_current_transaction_name(&mut self, name: Option<String>) {
        self.current_transaction_name = name;
    }

    pub fn current_transaction_name(&self) -> Option<&str> {
        self.current_transaction_name.as_deref()
    }

    pub fn set_current_transaction_read_only(&mut self, read_only: bool) {
        self.current_transaction_read_only = read_only;
    }

    pub fn is_current_transaction_read_only(&self) -> bool {
        self.current_transaction_read_only
    }

    pub fn set_current_transaction_isolation(&mut self, isolation: Option<Isolation>) {
        self.current_transaction_isolation = isolation;
    }

    pub fn current_transaction_isolation(&self) -> Option<Isolation> {
        self.current_transaction_isolation
    }

    pub fn set_actual_transaction_active(&mut self, active: bool) {
        self.actual_transaction_active = active;
    }

    pub fn is_actual_transaction_active(&self) -> bool {
        self.actual_transaction_active
    }

    // ==================== Suspension stack ====================

    pub(crate) fn push_suspension(&mut self) -> Ulid {
        let token = Ulid::new();
        self.suspensions.push(token);
        token
    }

    /// Pop `token` if it is the innermost outstanding suspension.
    pub(crate) fn pop_suspension(&mut self, token: Ulid) -> bool {
        if self.suspensions.last() == Some(&token) {
            self.suspensions.pop();
            true
        } else {
            false
        }
    }

    pub(crate) fn innermost_suspension(&self) -> Option<Ulid> {
        self.suspensions.last().copied()
    }

    /// Number of outstanding suspensions.
    pub fn suspension_depth(&self) -> usize {
        self.suspensions.len()
    }

    // ==================== Lifecycle ====================

    /// Reset all per-transaction state.
    ///
    /// Holders still bound at this point were leaked by their resource
    /// manager; they are unbound and reported. Outstanding suspensions are
    /// kept, since they belong to enclosing transactions.
    pub fn clear(&mut self) {
        for (key, holder) in std::mem::take(&mut self.resources) {
            if !holder.is_void() {
                warn!(%key, "resource holder still bound at transaction completion");
                holder.unbound();
            }
        }
        self.synchronizations = None;
        self.current_transaction_name = None;
        self.current_transaction_read_only = false;
        self.current_transaction_isolation = None;
        self.actual_transaction_active = false;
    }

    pub fn state(&self) -> RegistryState {
        RegistryState {
            resource_keys: self.resource_keys(),
            synchronization_active: self.is_synchronization_active(),
            synchronization_count: self.synchronizations.as_ref().map_or(0, Vec::len),
            transaction_name: self.current_transaction_name.clone(),
            read_only: self.current_transaction_read_only,
            isolation: self.current_transaction_isolation,
            actual_transaction_active: self.actual_transaction_active,
        }
    }
}

impl std::fmt::Debug for SynchronizationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizationRegistry")
            .field("resources", &self.resource_keys())
            .field(
                "synchronizations",
                &self.synchronizations.as_ref().map(Vec::len),
            )
            .field("name", &self.current_transaction_name)
            .field("actual_transaction_active", &self.actual_transaction_active)
            .field("suspensions", &self.suspensions.len())
            .finish()
    }
}
