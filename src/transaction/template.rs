//! Callback-driven transaction demarcation.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::definition::{Isolation, Propagation, TransactionDefinition};
use crate::sync::SynchronizationRegistry;
use crate::transaction::coordinator::TransactionCoordinator;
use crate::transaction::error::TransactionError;
use crate::transaction::hooks::ResourceManagerHooks;
use crate::transaction::status::TransactionStatus;

/// Runs closures inside a transaction: commit when they return `Ok`, roll
/// back when they fail or mark the status rollback-only.
///
/// ```ignore
/// let template = TransactionTemplate::new(coordinator).timeout_seconds(10);
/// let total = template.execute(&mut registry, |status, registry| {
///     // work against the bound resource
///     Ok::<_, TransactionError>(42)
/// })?;
/// ```
pub struct TransactionTemplate<H: ResourceManagerHooks> {
    coordinator: TransactionCoordinator<H>,
    definition: TransactionDefinition,
}

impl<H: ResourceManagerHooks> Clone for TransactionTemplate<H> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            definition: self.definition.clone(),
        }
    }
}

impl<H: ResourceManagerHooks> TransactionTemplate<H> {
    pub fn new(coordinator: TransactionCoordinator<H>) -> Self {
        Self::with_definition(coordinator, TransactionDefinition::new())
    }

    pub fn with_definition(coordinator: TransactionCoordinator<H>, definition: TransactionDefinition) -> Self {
        Self { coordinator, definition }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator<H> {
        &self.coordinator
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    pub fn propagation(mut self, value: Propagation) -> Self {
        self.definition = self.definition.propagation(value);
        self
    }

    pub fn isolation(mut self, value: Isolation) -> Self {
        self.definition = self.definition.isolation(value);
        self
    }

    pub fn timeout_seconds(mut self, value: i32) -> Self {
        self.definition = self.definition.timeout_seconds(value);
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.definition = self.definition.read_only(value);
        self
    }

    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.definition = self.definition.name(value);
        self
    }

    /// Run `callback` with the template's definition.
    pub fn execute<T, E, F>(&self, registry: &mut SynchronizationRegistry, callback: F) -> Result<T, E>
    where
        F: FnOnce(&mut TransactionStatus<H>, &mut SynchronizationRegistry) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.execute_with(registry, &self.definition, callback)
    }

    /// Run `callback` with an explicit definition.
    ///
    /// An error from the callback is returned unchanged, even when the
    /// rollback it triggers fails. A panic rolls back and then resumes
    /// unwinding.
    pub fn execute_with<T, E, F>(
        &self,
        registry: &mut SynchronizationRegistry,
        definition: &TransactionDefinition,
        callback: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut TransactionStatus<H>, &mut SynchronizationRegistry) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let mut status = self.coordinator.get_transaction(registry, definition)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&mut status, &mut *registry)));
        match outcome {
            Err(payload) => {
                self.rollback_on_failure(registry, &mut status, "callback panicked");
                panic::resume_unwind(payload)
            }
            Ok(Err(err)) => {
                self.rollback_on_failure(registry, &mut status, "callback failed");
                Err(err)
            }
            Ok(Ok(value)) => {
                if status.is_rollback_only() {
                    debug!(id = status.id(), "callback requested rollback");
                    self.coordinator.rollback(registry, &mut status)?;
                } else {
                    self.coordinator.commit(registry, &mut status)?;
                }
                Ok(value)
            }
        }
    }

    /// Run infallible unit work with the template's definition.
    pub fn execute_without_result<F>(
        &self,
        registry: &mut SynchronizationRegistry,
        callback: F,
    ) -> Result<(), TransactionError>
    where
        F: FnOnce(&mut TransactionStatus<H>, &mut SynchronizationRegistry),
    {
        self.execute(registry, |status, registry| {
            callback(status, registry);
            Ok(())
        })
    }

    fn rollback_on_failure(
        &self,
        registry: &mut SynchronizationRegistry,
        status: &mut TransactionStatus<H>,
        reason: &str,
    ) {
        debug!(id = status.id(), reason, "initiating transaction rollback on application failure");
        if status.is_completed() {
            return;
        }
        if let Err(rollback_err) = self.coordinator.rollback(registry, status) {
            error!(
                id = status.id(),
                reason,
                related = %rollback_err,
                "rollback after application failure failed; keeping the application error"
            );
        }
    }
}

impl<H: ResourceManagerHooks> std::fmt::Debug for TransactionTemplate<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTemplate")
            .field("definition", &self.definition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingHooks};
    use crate::transaction::error::ResourceFailure;

    #[derive(Debug, thiserror::Error)]
    enum AppError {
        #[error("validation failed")]
        Validation,
        #[error(transparent)]
        Transaction(#[from] TransactionError),
    }

    fn setup() -> (SynchronizationRegistry, TransactionTemplate<RecordingHooks>) {
        let coordinator = TransactionCoordinator::new(RecordingHooks::new());
        (SynchronizationRegistry::new(), TransactionTemplate::new(coordinator))
    }

    #[test]
    fn test_commit_on_success() {
        let (mut registry, template) = setup();

        let value = template
            .execute(&mut registry, |status, _| {
                assert!(status.is_new_transaction());
                Ok::<_, TransactionError>(7)
            })
            .unwrap();
        assert_eq!(value, 7);

        let hooks = template.coordinator().hooks();
        assert_eq!(hooks.count(|c| matches!(c, Call::Begin { .. })), 1);
        assert_eq!(hooks.count(|c| matches!(c, Call::Commit(_))), 1);
        assert_eq!(hooks.count(|c| matches!(c, Call::Rollback(_))), 0);
        assert!(registry.resource_keys().is_empty());
    }

    #[test]
    fn test_rollback_only_is_not_an_error() {
        let (mut registry, template) = setup();
        let template = template.timeout_seconds(10);

        template
            .execute_without_result(&mut registry, |status, _| {
                status.set_rollback_only().unwrap();
            })
            .unwrap();

        assert_eq!(
            template.coordinator().hooks().calls(),
            vec![Call::begin(1, 10), Call::Rollback(1), Call::Cleanup(1)]
        );
    }

    #[test]
    fn test_participant_rollback_only_marks_existing() {
        let (mut registry, template) = setup();
        let coordinator = template.coordinator().clone();

        let mut outer = coordinator
            .get_transaction(&mut registry, &TransactionDefinition::new())
            .unwrap();
        template
            .execute_without_result(&mut registry, |status, _| {
                assert!(!status.is_new_transaction());
                status.set_rollback_only().unwrap();
            })
            .unwrap();

        let hooks = coordinator.hooks();
        assert_eq!(hooks.count(|c| matches!(c, Call::Begin { .. })), 1);
        assert_eq!(hooks.count(|c| matches!(c, Call::SetRollbackOnly(_))), 1);
        coordinator.rollback(&mut registry, &mut outer).unwrap();
    }

    #[test]
    fn test_callback_error_rolls_back() {
        let (mut registry, template) = setup();

        let err = template
            .execute(&mut registry, |_, _| Err::<(), _>(AppError::Validation))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation));
        assert_eq!(template.coordinator().hooks().count(|c| matches!(c, Call::Rollback(_))), 1);
    }

    #[test]
    fn test_rollback_failure_does_not_mask_callback_error() {
        let (mut registry, template) = setup();
        template
            .coordinator()
            .hooks()
            .fail_next_rollback(ResourceFailure::failed("connection reset"));

        let err = template
            .execute(&mut registry, |_, _| Err::<(), _>(AppError::Validation))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation));
        assert!(registry.resource_keys().is_empty());
        assert!(!registry.is_synchronization_active());
    }

    #[test]
    fn test_begin_failure_surfaces_as_transaction_error() {
        let (mut registry, template) = setup();
        let template = template.propagation(Propagation::Mandatory);

        let err = template
            .execute(&mut registry, |_, _| Ok::<_, AppError>(()))
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Transaction(TransactionError::IllegalTransactionState(_))
        ));
    }

    #[test]
    fn test_panic_rolls_back_and_resumes() {
        let (mut registry, template) = setup();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = template.execute(&mut registry, |_, _| -> Result<(), TransactionError> {
                panic!("boom")
            });
        }));
        assert!(result.is_err());
        assert_eq!(template.coordinator().hooks().count(|c| matches!(c, Call::Rollback(_))), 1);
        assert!(registry.resource_keys().is_empty());
    }

    #[test]
    fn test_nested_templates() {
        let (mut registry, template) = setup();
        let inner = template.clone().propagation(Propagation::RequiresNew).name("audit");

        template
            .execute(&mut registry, |_, registry| {
                inner.execute(registry, |status, registry| {
                    assert!(status.is_new_transaction());
                    assert_eq!(registry.current_transaction_name(), Some("audit"));
                    Ok::<_, TransactionError>(())
                })
            })
            .unwrap();

        let hooks = template.coordinator().hooks();
        assert_eq!(hooks.count(|c| matches!(c, Call::Commit(_))), 2);
        assert_eq!(hooks.count(|c| matches!(c, Call::Resume(_))), 1);
        assert_eq!(registry.suspension_depth(), 0);
    }
}
