//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::definition::{Isolation, TransactionDefinition};
use crate::sync::{
    CompletionStatus, HolderSupport, ResourceHolder, ResourceKey, SharedSynchronization,
    SynchronizationRegistry, SynchronizationResult, TransactionSynchronization,
};
use crate::transaction::{HookResult, ResourceFailure, ResourceManagerHooks};

/// A hook invocation, keyed by the id of the holder it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin {
        id: u32,
        timeout: i32,
        isolation: Isolation,
        read_only: bool,
    },
    Commit(u32),
    Rollback(u32),
    SetRollbackOnly(u32),
    Suspend(u32),
    Resume(u32),
    CreateSavepoint(u32),
    RollbackToSavepoint(u32),
    ReleaseSavepoint(u32),
    Cleanup(u32),
}

impl Call {
    pub fn begin(id: u32, timeout: i32) -> Self {
        Call::Begin {
            id,
            timeout,
            isolation: Isolation::Default,
            read_only: false,
        }
    }
}

#[derive(Debug)]
pub struct MockHolder {
    pub id: u32,
    pub support: HolderSupport,
}

impl ResourceHolder for MockHolder {
    fn support(&self) -> &HolderSupport {
        &self.support
    }
}

#[derive(Debug, Default)]
pub struct MockTransaction {
    pub holder: Option<Arc<MockHolder>>,
    /// The holder was created by `do_begin` on this transaction object.
    pub new_holder: bool,
}

impl MockTransaction {
    fn id(&self) -> u32 {
        self.holder.as_ref().map_or(0, |h| h.id)
    }
}

#[derive(Default)]
struct Failures {
    begin: Option<ResourceFailure>,
    commit: Option<ResourceFailure>,
    rollback: Option<ResourceFailure>,
    resume: Option<ResourceFailure>,
    cleanup: Option<ResourceFailure>,
}

/// Hooks over an imaginary resource that journal every call.
pub struct RecordingHooks {
    key: ResourceKey,
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: AtomicU32,
    failures: Mutex<Failures>,
    savepoints: bool,
    suspension: bool,
    isolation: bool,
    timeouts: bool,
}

impl Default for RecordingHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self {
            key: ResourceKey::new("mock"),
            calls: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU32::new(1),
            failures: Mutex::new(Failures::default()),
            savepoints: true,
            suspension: true,
            isolation: true,
            timeouts: true,
        }
    }

    pub fn without_savepoints(mut self) -> Self {
        self.savepoints = false;
        self
    }

    pub fn without_suspension(mut self) -> Self {
        self.suspension = false;
        self
    }

    pub fn without_isolation(mut self) -> Self {
        self.isolation = false;
        self
    }

    pub fn without_timeouts(mut self) -> Self {
        self.timeouts = false;
        self
    }

    pub fn fail_next_begin(&self, failure: ResourceFailure) {
        self.failures.lock().begin = Some(failure);
    }

    pub fn fail_next_commit(&self, failure: ResourceFailure) {
        self.failures.lock().commit = Some(failure);
    }

    pub fn fail_next_rollback(&self, failure: ResourceFailure) {
        self.failures.lock().rollback = Some(failure);
    }

    pub fn fail_next_resume(&self, failure: ResourceFailure) {
        self.failures.lock().resume = Some(failure);
    }

    pub fn fail_next_cleanup(&self, failure: ResourceFailure) {
        self.failures.lock().cleanup = Some(failure);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl ResourceManagerHooks for RecordingHooks {
    type Transaction = MockTransaction;
    type Suspended = Arc<MockHolder>;
    type Savepoint = u32;

    fn do_get_transaction(&self, registry: &mut SynchronizationRegistry) -> HookResult<MockTransaction> {
        let holder = registry
            .get_resource_as::<MockHolder>(&self.key)
            .map_err(|e| ResourceFailure::wrap("lookup failed", e))?;
        Ok(MockTransaction {
            holder,
            new_holder: false,
        })
    }

    fn is_existing_transaction(&self, transaction: &MockTransaction) -> bool {
        transaction.holder.is_some()
    }

    fn supports_isolation(&self, isolation: Isolation) -> bool {
        self.isolation || isolation.is_default()
    }

    fn supports_timeout(&self) -> bool {
        self.timeouts
    }

    fn do_begin(
        &self,
        transaction: &mut MockTransaction,
        definition: &TransactionDefinition,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        if let Some(failure) = self.failures.lock().begin.take() {
            return Err(failure);
        }
        let holder = Arc::new(MockHolder {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            support: HolderSupport::new(),
        });
        if let Some(seconds) = definition.timeout() {
            holder.support.set_timeout_in_seconds(seconds);
        }
        holder.support.set_synchronized_with_transaction(true);
        registry
            .bind_resource(self.key.clone(), holder.clone())
            .map_err(|e| ResourceFailure::wrap("bind failed", e))?;
        self.record(Call::Begin {
            id: holder.id,
            timeout: definition.get_timeout(),
            isolation: definition.get_isolation(),
            read_only: definition.is_read_only(),
        });
        transaction.holder = Some(holder);
        transaction.new_holder = true;
        Ok(())
    }

    fn do_suspend(
        &self,
        transaction: &mut MockTransaction,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<Arc<MockHolder>> {
        if !self.suspension {
            return Err(ResourceFailure::NotSupported("mock cannot suspend".into()));
        }
        let holder = transaction
            .holder
            .take()
            .ok_or_else(|| ResourceFailure::IllegalState("nothing to suspend".into()))?;
        transaction.new_holder = false;
        registry.unbind_resource_if_possible(&self.key);
        self.record(Call::Suspend(holder.id));
        Ok(holder)
    }

    fn do_resume(
        &self,
        _transaction: Option<&mut MockTransaction>,
        suspended: Arc<MockHolder>,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        if let Some(failure) = self.failures.lock().resume.take() {
            return Err(failure);
        }
        self.record(Call::Resume(suspended.id));
        registry
            .bind_resource(self.key.clone(), suspended)
            .map_err(|e| ResourceFailure::wrap("rebind failed", e))
    }

    fn do_commit(&self, transaction: &mut MockTransaction) -> HookResult<()> {
        if let Some(failure) = self.failures.lock().commit.take() {
            return Err(failure);
        }
        self.record(Call::Commit(transaction.id()));
        Ok(())
    }

    fn do_rollback(&self, transaction: &mut MockTransaction) -> HookResult<()> {
        if let Some(failure) = self.failures.lock().rollback.take() {
            return Err(failure);
        }
        self.record(Call::Rollback(transaction.id()));
        Ok(())
    }

    fn do_set_rollback_only(&self, transaction: &mut MockTransaction) -> HookResult<()> {
        if let Some(holder) = &transaction.holder {
            holder.support.set_rollback_only();
        }
        self.record(Call::SetRollbackOnly(transaction.id()));
        Ok(())
    }

    fn is_global_rollback_only(&self, transaction: &MockTransaction) -> bool {
        transaction
            .holder
            .as_ref()
            .is_some_and(|h| h.support.is_rollback_only())
    }

    fn supports_savepoints(&self, _transaction: &MockTransaction) -> bool {
        self.savepoints
    }

    fn create_savepoint(&self, transaction: &mut MockTransaction) -> HookResult<u32> {
        self.record(Call::CreateSavepoint(transaction.id()));
        Ok(transaction.id())
    }

    fn rollback_to_savepoint(&self, transaction: &mut MockTransaction, _savepoint: &u32) -> HookResult<()> {
        if let Some(holder) = &transaction.holder {
            holder.support.reset_rollback_only();
        }
        self.record(Call::RollbackToSavepoint(transaction.id()));
        Ok(())
    }

    fn release_savepoint(&self, transaction: &mut MockTransaction, _savepoint: u32) -> HookResult<()> {
        self.record(Call::ReleaseSavepoint(transaction.id()));
        Ok(())
    }

    fn do_cleanup_after_completion(
        &self,
        transaction: &mut MockTransaction,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        if let Some(failure) = self.failures.lock().cleanup.take() {
            return Err(failure);
        }
        self.record(Call::Cleanup(transaction.id()));
        if transaction.new_holder {
            registry.unbind_resource_if_possible(&self.key);
        }
        Ok(())
    }
}

pub type Journal = Arc<Mutex<Vec<String>>>;

/// Synchronization that appends `label:event` entries to a shared journal.
pub struct RecordingSynchronization {
    label: String,
    journal: Journal,
    fail: bool,
}

impl RecordingSynchronization {
    pub fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn shared(label: &str, journal: &Journal) -> SharedSynchronization {
        Arc::new(Self {
            label: label.to_string(),
            journal: journal.clone(),
            fail: false,
        })
    }

    /// Like `shared`, but every fallible callback returns an error.
    pub fn failing(label: &str, journal: &Journal) -> SharedSynchronization {
        Arc::new(Self {
            label: label.to_string(),
            journal: journal.clone(),
            fail: true,
        })
    }

    fn record(&self, event: impl std::fmt::Display) -> SynchronizationResult {
        self.journal.lock().push(format!("{}:{}", self.label, event));
        if self.fail {
            Err(format!("{} failed", self.label).into())
        } else {
            Ok(())
        }
    }
}

impl TransactionSynchronization for RecordingSynchronization {
    fn suspend(&self) {
        let _ = self.record("suspend");
    }

    fn resume(&self) {
        let _ = self.record("resume");
    }

    fn flush(&self) {
        let _ = self.record("flush");
    }

    fn before_commit(&self, _read_only: bool) -> SynchronizationResult {
        self.record("before_commit")
    }

    fn before_completion(&self) -> SynchronizationResult {
        self.record("before_completion")
    }

    fn after_commit(&self) -> SynchronizationResult {
        self.record("after_commit")
    }

    fn after_completion(&self, status: CompletionStatus) -> SynchronizationResult {
        self.record(format!("after_completion({})", status))
    }
}
