//! Adapter for an external two-phase transaction coordinator.
//!
//! The external coordinator tracks one transaction per execution context on
//! its own, the way a thread-bound user transaction does. This adapter only
//! translates the coordinator's status codes and failure signals.

use std::convert::Infallible;
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::definition::{Isolation, TransactionDefinition};
use crate::resource::ResourceLookup;
use crate::sync::SynchronizationRegistry;
use crate::transaction::{
    HeuristicOutcome, HookResult, ResourceFailure, ResourceManagerHooks, TransactionError,
    TransactionResult,
};

/// Status of the global transaction associated with the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalStatus {
    Active,
    MarkedRollback,
    Prepared,
    Committed,
    RolledBack,
    Unknown,
    NoTransaction,
    Preparing,
    Committing,
    RollingBack,
}

/// Failure signals of the external coordinator.
#[derive(Debug, Error)]
pub enum GlobalFailure {
    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("rolled back: {0}")]
    RolledBack(String),

    #[error("heuristic mixed: {0}")]
    HeuristicMixed(String),

    #[error("heuristic rollback: {0}")]
    HeuristicRollback(String),

    #[error("heuristic commit: {0}")]
    HeuristicCommit(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("system failure: {0}")]
    System(String),
}

impl From<GlobalFailure> for ResourceFailure {
    fn from(failure: GlobalFailure) -> Self {
        match failure {
            GlobalFailure::NotSupported(message) => ResourceFailure::NotSupported(message),
            GlobalFailure::RolledBack(message) => ResourceFailure::RolledBack(message),
            GlobalFailure::HeuristicMixed(message) => {
                ResourceFailure::heuristic(HeuristicOutcome::Mixed, message)
            }
            GlobalFailure::HeuristicRollback(message) => {
                ResourceFailure::heuristic(HeuristicOutcome::RolledBack, message)
            }
            GlobalFailure::HeuristicCommit(message) => {
                ResourceFailure::heuristic(HeuristicOutcome::Committed, message)
            }
            GlobalFailure::IllegalState(message) => ResourceFailure::IllegalState(message),
            other => ResourceFailure::wrap("global coordinator failure", other),
        }
    }
}

/// External coordinator driving global transactions.
pub trait GlobalCoordinator {
    /// Opaque handle for a suspended global transaction.
    type Handle;

    fn status(&self) -> Result<GlobalStatus, GlobalFailure>;

    fn begin(&self) -> Result<(), GlobalFailure>;

    fn commit(&self) -> Result<(), GlobalFailure>;

    fn rollback(&self) -> Result<(), GlobalFailure>;

    fn set_rollback_only(&self) -> Result<(), GlobalFailure>;

    /// Timeout for transactions begun afterwards; 0 restores the default.
    fn set_transaction_timeout(&self, seconds: u32) -> Result<(), GlobalFailure>;

    fn suspend(&self) -> Result<Self::Handle, GlobalFailure> {
        Err(GlobalFailure::NotSupported("coordinator cannot suspend transactions".into()))
    }

    fn resume(&self, _handle: Self::Handle) -> Result<(), GlobalFailure> {
        Err(GlobalFailure::NotSupported("coordinator cannot resume transactions".into()))
    }
}

/// Transaction object of the global manager.
#[derive(Debug, Clone, Copy)]
pub struct GlobalTransaction {
    status: GlobalStatus,
    timeout_applied: bool,
}

impl GlobalTransaction {
    /// Status observed when the transaction object was obtained.
    pub fn status(&self) -> GlobalStatus {
        self.status
    }
}

/// Hooks delegating to a [`GlobalCoordinator`].
pub struct GlobalTransactionManager<C> {
    coordinator: C,
    allow_custom_isolation: bool,
}

impl<C: GlobalCoordinator> GlobalTransactionManager<C> {
    pub fn new(coordinator: C) -> Self {
        Self {
            coordinator,
            allow_custom_isolation: false,
        }
    }

    pub fn from_lookup<L>(lookup: &L, name: &str) -> TransactionResult<Self>
    where
        L: ResourceLookup<Handle = C>,
    {
        let coordinator = lookup
            .lookup(name)
            .map_err(|e| TransactionError::system(format!("lookup of '{}' failed", name), e))?;
        Ok(Self::new(coordinator))
    }

    /// Accept non-default isolation levels, for coordinators that apply
    /// them to their enlisted resources.
    pub fn allow_custom_isolation(mut self, value: bool) -> Self {
        self.allow_custom_isolation = value;
        self
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    fn current_status(&self) -> HookResult<GlobalStatus> {
        self.coordinator.status().map_err(ResourceFailure::from)
    }

    fn reset_timeout(&self) {
        if let Err(e) = self.coordinator.set_transaction_timeout(0) {
            warn!(error = %e, "could not reset global transaction timeout");
        }
    }
}

impl<C: GlobalCoordinator> ResourceManagerHooks for GlobalTransactionManager<C> {
    type Transaction = GlobalTransaction;
    type Suspended = C::Handle;
    type Savepoint = Infallible;

    fn do_get_transaction(&self, _registry: &mut SynchronizationRegistry) -> HookResult<GlobalTransaction> {
        Ok(GlobalTransaction {
            status: self.current_status()?,
            timeout_applied: false,
        })
    }

    fn is_existing_transaction(&self, transaction: &GlobalTransaction) -> bool {
        transaction.status != GlobalStatus::NoTransaction
    }

    fn supports_isolation(&self, isolation: Isolation) -> bool {
        self.allow_custom_isolation || isolation.is_default()
    }

    fn supports_timeout(&self) -> bool {
        true
    }

    fn do_begin(
        &self,
        transaction: &mut GlobalTransaction,
        definition: &TransactionDefinition,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        if let Some(seconds) = definition.timeout() {
            self.coordinator.set_transaction_timeout(seconds)?;
            transaction.timeout_applied = true;
        }
        if let Err(failure) = self.coordinator.begin() {
            if transaction.timeout_applied {
                self.reset_timeout();
                transaction.timeout_applied = false;
            }
            return Err(failure.into());
        }
        debug!(timeout = ?definition.timeout(), "began global transaction");
        transaction.status = GlobalStatus::Active;
        Ok(())
    }

    fn do_suspend(
        &self,
        transaction: &mut GlobalTransaction,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<C::Handle> {
        let handle = self.coordinator.suspend()?;
        transaction.status = GlobalStatus::NoTransaction;
        Ok(handle)
    }

    fn do_resume(
        &self,
        _transaction: Option<&mut GlobalTransaction>,
        suspended: C::Handle,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        self.coordinator.resume(suspended).map_err(ResourceFailure::from)
    }

    fn do_commit(&self, _transaction: &mut GlobalTransaction) -> HookResult<()> {
        match self.current_status()? {
            GlobalStatus::NoTransaction => Err(ResourceFailure::RolledBack(
                "global transaction already completed - probably rolled back".into(),
            )),
            GlobalStatus::RolledBack => {
                if let Err(e) = self.coordinator.rollback() {
                    debug!(error = %e, "rollback of already rolled back global transaction failed");
                }
                Err(ResourceFailure::RolledBack(
                    "global transaction already rolled back (probably due to a timeout)".into(),
                ))
            }
            _ => self.coordinator.commit().map_err(ResourceFailure::from),
        }
    }

    fn do_rollback(&self, _transaction: &mut GlobalTransaction) -> HookResult<()> {
        let status = self.current_status()?;
        if status == GlobalStatus::NoTransaction {
            return Ok(());
        }
        match self.coordinator.rollback() {
            Err(GlobalFailure::IllegalState(message)) if status == GlobalStatus::RolledBack => {
                debug!(%message, "global transaction already rolled back");
                Ok(())
            }
            other => other.map_err(ResourceFailure::from),
        }
    }

    fn do_set_rollback_only(&self, _transaction: &mut GlobalTransaction) -> HookResult<()> {
        if self.current_status()? != GlobalStatus::NoTransaction {
            self.coordinator.set_rollback_only()?;
        }
        Ok(())
    }

    fn is_global_rollback_only(&self, _transaction: &GlobalTransaction) -> bool {
        match self.coordinator.status() {
            Ok(status) => status == GlobalStatus::MarkedRollback,
            Err(e) => {
                warn!(error = %e, "could not determine global transaction status");
                false
            }
        }
    }

    fn do_cleanup_after_completion(
        &self,
        transaction: &mut GlobalTransaction,
        _registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        if transaction.timeout_applied {
            self.reset_timeout();
            transaction.timeout_applied = false;
        }
        Ok(())
    }
}

impl<C> fmt::Debug for GlobalTransactionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalTransactionManager")
            .field("allow_custom_isolation", &self.allow_custom_isolation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::definition::Propagation;
    use crate::transaction::{TransactionCoordinator, TransactionTemplate};

    #[derive(Debug, Clone)]
    struct FakeTx {
        id: u32,
        status: GlobalStatus,
    }

    #[derive(Default)]
    struct FakeState {
        current: Option<FakeTx>,
        next_id: u32,
        fail_begin: Option<GlobalFailure>,
        fail_commit: Option<GlobalFailure>,
        log: Vec<String>,
    }

    #[derive(Default)]
    struct FakeCoordinator {
        state: Mutex<FakeState>,
    }

    impl FakeCoordinator {
        fn log(&self) -> Vec<String> {
            self.state.lock().log.clone()
        }

        fn set_status(&self, status: GlobalStatus) {
            if let Some(tx) = self.state.lock().current.as_mut() {
                tx.status = status;
            }
        }
    }

    impl GlobalCoordinator for FakeCoordinator {
        type Handle = FakeTx;

        fn status(&self) -> Result<GlobalStatus, GlobalFailure> {
            Ok(self
                .state
                .lock()
                .current
                .as_ref()
                .map_or(GlobalStatus::NoTransaction, |tx| tx.status))
        }

        fn begin(&self) -> Result<(), GlobalFailure> {
            let mut state = self.state.lock();
            if let Some(failure) = state.fail_begin.take() {
                return Err(failure);
            }
            if state.current.is_some() {
                return Err(GlobalFailure::NotSupported("nested transactions not supported".into()));
            }
            state.next_id += 1;
            let id = state.next_id;
            state.log.push(format!("begin {}", id));
            state.current = Some(FakeTx {
                id,
                status: GlobalStatus::Active,
            });
            Ok(())
        }

        fn commit(&self) -> Result<(), GlobalFailure> {
            let mut state = self.state.lock();
            let tx = state
                .current
                .take()
                .ok_or_else(|| GlobalFailure::IllegalState("no transaction".into()))?;
            if let Some(failure) = state.fail_commit.take() {
                return Err(failure);
            }
            if tx.status == GlobalStatus::MarkedRollback {
                state.log.push(format!("rollback {}", tx.id));
                return Err(GlobalFailure::RolledBack("marked rollback-only".into()));
            }
            state.log.push(format!("commit {}", tx.id));
            Ok(())
        }

        fn rollback(&self) -> Result<(), GlobalFailure> {
            let mut state = self.state.lock();
            let tx = state
                .current
                .take()
                .ok_or_else(|| GlobalFailure::IllegalState("no transaction".into()))?;
            state.log.push(format!("rollback {}", tx.id));
            Ok(())
        }

        fn set_rollback_only(&self) -> Result<(), GlobalFailure> {
            let mut state = self.state.lock();
            let tx = state
                .current
                .as_mut()
                .ok_or_else(|| GlobalFailure::IllegalState("no transaction".into()))?;
            tx.status = GlobalStatus::MarkedRollback;
            let id = tx.id;
            state.log.push(format!("set_rollback_only {}", id));
            Ok(())
        }

        fn set_transaction_timeout(&self, seconds: u32) -> Result<(), GlobalFailure> {
            self.state.lock().log.push(format!("timeout {}", seconds));
            Ok(())
        }

        fn suspend(&self) -> Result<FakeTx, GlobalFailure> {
            let mut state = self.state.lock();
            let tx = state
                .current
                .take()
                .ok_or_else(|| GlobalFailure::IllegalState("no transaction".into()))?;
            state.log.push(format!("suspend {}", tx.id));
            Ok(tx)
        }

        fn resume(&self, handle: FakeTx) -> Result<(), GlobalFailure> {
            let mut state = self.state.lock();
            if state.current.is_some() {
                return Err(GlobalFailure::IllegalState("transaction already associated".into()));
            }
            state.log.push(format!("resume {}", handle.id));
            state.current = Some(handle);
            Ok(())
        }
    }

    type Manager = GlobalTransactionManager<FakeCoordinator>;

    fn setup() -> (SynchronizationRegistry, TransactionCoordinator<Manager>) {
        (
            SynchronizationRegistry::new(),
            TransactionCoordinator::new(GlobalTransactionManager::new(FakeCoordinator::default())),
        )
    }

    fn fake(coordinator: &TransactionCoordinator<Manager>) -> &FakeCoordinator {
        coordinator.hooks().coordinator()
    }

    #[test]
    fn test_commit_with_timeout() {
        let (mut registry, coordinator) = setup();

        let mut status = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new().timeout_seconds(10))
            .unwrap();
        assert!(status.is_new_transaction());
        coordinator.commit(&mut registry, &mut status).unwrap();

        assert_eq!(fake(&coordinator).log(), vec!["timeout 10", "begin 1", "commit 1", "timeout 0"]);
    }

    #[test]
    fn test_requires_new_suspends_global_transaction() {
        let (mut registry, coordinator) = setup();
        let template = TransactionTemplate::new(coordinator.clone()).propagation(Propagation::RequiresNew);

        let mut outer = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap();
        template
            .execute(&mut registry, |_, _| Ok::<_, TransactionError>(()))
            .unwrap();
        coordinator.commit(&mut registry, &mut outer).unwrap();

        assert_eq!(
            fake(&coordinator).log(),
            vec!["begin 1", "suspend 1", "begin 2", "commit 2", "resume 1", "commit 1"]
        );
    }

    #[test]
    fn test_participant_failure_rolls_back_global() {
        let (mut registry, coordinator) = setup();

        let mut outer = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap();
        let mut inner = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::with_propagation(Propagation::Mandatory))
            .unwrap();
        coordinator.rollback(&mut registry, &mut inner).unwrap();

        let err = coordinator.commit(&mut registry, &mut outer).unwrap_err();
        assert!(matches!(err, TransactionError::UnexpectedRollback { .. }));
        assert_eq!(
            fake(&coordinator).log(),
            vec!["begin 1", "set_rollback_only 1", "rollback 1"]
        );
    }

    #[test]
    fn test_heuristic_mixed() {
        let (mut registry, coordinator) = setup();

        let mut status = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap();
        fake(&coordinator).state.lock().fail_commit =
            Some(GlobalFailure::HeuristicMixed("one participant committed".into()));

        let err = coordinator.commit(&mut registry, &mut status).unwrap_err();
        assert!(matches!(
            err,
            TransactionError::HeuristicCompletion {
                outcome: HeuristicOutcome::Mixed,
                ..
            }
        ));
        assert!(status.is_completed());
        assert!(!registry.is_synchronization_active());
    }

    #[test]
    fn test_already_rolled_back_by_coordinator() {
        let (mut registry, coordinator) = setup();

        let mut status = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap();
        fake(&coordinator).set_status(GlobalStatus::RolledBack);

        let err = coordinator.commit(&mut registry, &mut status).unwrap_err();
        assert!(matches!(err, TransactionError::UnexpectedRollback { .. }));
        assert_eq!(fake(&coordinator).log(), vec!["begin 1", "rollback 1"]);
    }

    #[test]
    fn test_begin_not_supported() {
        let (mut registry, coordinator) = setup();
        fake(&coordinator).state.lock().fail_begin =
            Some(GlobalFailure::NotSupported("nested transactions not supported".into()));

        let err = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap_err();
        assert!(matches!(err, TransactionError::NestedTransactionNotPermitted { .. }));
        assert!(!registry.is_synchronization_active());
    }

    #[test]
    fn test_begin_system_failure() {
        let (mut registry, coordinator) = setup();
        fake(&coordinator).state.lock().fail_begin = Some(GlobalFailure::System("unreachable".into()));

        let err = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new().timeout_seconds(5))
            .unwrap_err();
        assert!(matches!(err, TransactionError::CannotCreateTransaction { .. }));
        assert_eq!(fake(&coordinator).log(), vec!["timeout 5", "timeout 0"]);
    }

    #[test]
    fn test_isolation_support() {
        let (mut registry, coordinator) = setup();
        let definition = TransactionDefinition::new().isolation(Isolation::Serializable);

        let err = coordinator.get_transaction(&mut registry, &definition).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidIsolationLevel { .. }));

        let permissive = TransactionCoordinator::new(
            GlobalTransactionManager::new(FakeCoordinator::default()).allow_custom_isolation(true),
        );
        let mut status = permissive.get_transaction(&mut registry, &definition).unwrap();
        permissive.commit(&mut registry, &mut status).unwrap();
    }

    #[test]
    fn test_nested_joins_without_savepoints() {
        let (mut registry, coordinator) = setup();

        let mut outer = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap();
        let mut nested = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::with_propagation(Propagation::Nested))
            .unwrap();
        assert!(!nested.is_new_transaction());
        assert!(!nested.has_savepoint());
        coordinator.commit(&mut registry, &mut nested).unwrap();
        coordinator.commit(&mut registry, &mut outer).unwrap();
        assert_eq!(fake(&coordinator).log(), vec!["begin 1", "commit 1"]);
    }

    #[test]
    fn test_failure_translation() {
        let failure: ResourceFailure = GlobalFailure::HeuristicCommit("x".into()).into();
        assert!(matches!(
            failure,
            ResourceFailure::Heuristic {
                outcome: HeuristicOutcome::Committed,
                ..
            }
        ));
        let failure: ResourceFailure = GlobalFailure::HeuristicRollback("x".into()).into();
        assert!(matches!(
            failure,
            ResourceFailure::Heuristic {
                outcome: HeuristicOutcome::RolledBack,
                ..
            }
        ));
        let failure: ResourceFailure = GlobalFailure::System("x".into()).into();
        assert!(matches!(failure, ResourceFailure::Failed { source: Some(_), .. }));
    }
}
