//! Local transactions on a single connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::definition::{Isolation, TransactionDefinition};
use crate::resource::ResourceLookup;
use crate::sync::{AsAnyArc, HolderSupport, ResourceHolder, ResourceKey, SynchronizationRegistry};
use crate::transaction::{
    HookResult, ResourceFailure, ResourceManagerHooks, TransactionError, TransactionResult,
};

/// Errors raised by a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The connection already aborted the transaction.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("connection is read-only")]
    ReadOnly,

    #[error("connection is closed")]
    Closed,

    #[error("savepoint not found: {0}")]
    NoSuchSavepoint(String),

    #[error("connection failure: {0}")]
    Other(String),
}

impl From<ConnectionError> for ResourceFailure {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Unsupported(message) => ResourceFailure::NotSupported(message),
            ConnectionError::Aborted(message) => ResourceFailure::RolledBack(message),
            other => ResourceFailure::wrap("connection operation failed", other),
        }
    }
}

/// A connection capable of local transactions.
pub trait Connection: Send + 'static {
    fn is_auto_commit(&self) -> bool;

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError>;

    fn isolation(&self) -> Isolation;

    fn set_isolation(&mut self, isolation: Isolation) -> Result<(), ConnectionError>;

    fn is_read_only(&self) -> bool;

    fn set_read_only(&mut self, read_only: bool) -> Result<(), ConnectionError>;

    fn commit(&mut self) -> Result<(), ConnectionError>;

    fn rollback(&mut self) -> Result<(), ConnectionError>;

    fn supports_savepoints(&self) -> bool {
        false
    }

    fn set_savepoint(&mut self, name: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported(format!("cannot create savepoint {}", name)))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported(format!("cannot roll back to savepoint {}", name)))
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported(format!("cannot release savepoint {}", name)))
    }

    /// Release the connection. Called once, after its last transaction.
    fn close(&mut self) {}
}

/// Source of connections.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> Result<Self::Connection, ConnectionError>;
}

/// Holder binding one connection to the registry for one transaction.
pub struct ConnectionHolder<C> {
    connection: Mutex<C>,
    support: HolderSupport,
    transaction_active: AtomicBool,
    savepoint_counter: AtomicU32,
    restore_auto_commit: AtomicBool,
    previous_isolation: Mutex<Option<Isolation>>,
}

impl<C: Connection> ConnectionHolder<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection: Mutex::new(connection),
            support: HolderSupport::new(),
            transaction_active: AtomicBool::new(false),
            savepoint_counter: AtomicU32::new(0),
            restore_auto_commit: AtomicBool::new(false),
            previous_isolation: Mutex::new(None),
        }
    }

    /// Lock the connection.
    pub fn connection(&self) -> MutexGuard<'_, C> {
        self.connection.lock()
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_active.load(Ordering::SeqCst)
    }

    fn next_savepoint_name(&self) -> String {
        format!("SAVEPOINT_{}", self.savepoint_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl<C: Connection> ResourceHolder for ConnectionHolder<C> {
    fn support(&self) -> &HolderSupport {
        &self.support
    }
}

impl<C> fmt::Debug for ConnectionHolder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHolder")
            .field("support", &self.support)
            .field("transaction_active", &self.transaction_active.load(Ordering::SeqCst))
            .finish()
    }
}

/// Transaction object of the connection manager.
pub struct ConnectionTransaction<C> {
    holder: Option<Arc<ConnectionHolder<C>>>,
    /// The holder was created and bound by this transaction's begin.
    new_holder: bool,
}

impl<C> ConnectionTransaction<C> {
    pub fn holder(&self) -> Option<&Arc<ConnectionHolder<C>>> {
        self.holder.as_ref()
    }

    fn active_holder(&self) -> HookResult<&Arc<ConnectionHolder<C>>> {
        self.holder
            .as_ref()
            .ok_or_else(|| ResourceFailure::IllegalState("no connection holder".into()))
    }
}

impl<C> fmt::Debug for ConnectionTransaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTransaction")
            .field("holder", &self.holder)
            .field("new_holder", &self.new_holder)
            .finish()
    }
}

/// Hooks for local transactions on connections from `F`.
pub struct ConnectionTransactionManager<F> {
    factory: F,
    key: ResourceKey,
}

impl<F: ConnectionFactory> ConnectionTransactionManager<F> {
    /// Create a manager binding its connections under `key`.
    pub fn new(key: impl Into<ResourceKey>, factory: F) -> Self {
        Self {
            factory,
            key: key.into(),
        }
    }

    /// Resolve the factory by name; the name doubles as the resource key.
    pub fn from_lookup<L>(lookup: &L, name: &str) -> TransactionResult<Self>
    where
        L: ResourceLookup<Handle = F>,
    {
        let factory = lookup
            .lookup(name)
            .map_err(|e| TransactionError::system(format!("lookup of '{}' failed", name), e))?;
        Ok(Self::new(name, factory))
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Run `f` against the connection bound for the current transaction.
    ///
    /// Fails with `NoTransaction` when none is bound and with `TimedOut`
    /// once the transaction deadline has passed.
    pub fn with_connection<T>(
        &self,
        registry: &mut SynchronizationRegistry,
        f: impl FnOnce(&mut F::Connection) -> Result<T, ConnectionError>,
    ) -> TransactionResult<T> {
        let holder = registry
            .get_resource_as::<ConnectionHolder<F::Connection>>(&self.key)?
            .ok_or_else(|| {
                TransactionError::NoTransaction(format!("no connection bound for '{}'", self.key))
            })?;
        holder.support().check_deadline()?;
        holder.support().requested();
        let result = {
            let mut connection = holder.connection();
            f(&mut *connection)
        };
        holder.support().released();
        result.map_err(|e| TransactionError::system("connection work failed", e))
    }

    fn prepare_connection(
        &self,
        holder: &ConnectionHolder<F::Connection>,
        definition: &TransactionDefinition,
    ) -> Result<(), ConnectionError> {
        let mut connection = holder.connection();
        if definition.is_read_only() {
            connection.set_read_only(true)?;
        }
        let isolation = definition.get_isolation();
        if !isolation.is_default() {
            let previous = connection.isolation();
            if previous != isolation {
                connection.set_isolation(isolation)?;
                *holder.previous_isolation.lock() = Some(previous);
            }
        }
        if connection.is_auto_commit() {
            holder.restore_auto_commit.store(true, Ordering::SeqCst);
            debug!(key = %self.key, "switching connection to manual commit");
            connection.set_auto_commit(false)?;
        }
        Ok(())
    }

    fn reset_connection(&self, holder: &ConnectionHolder<F::Connection>) {
        let mut connection = holder.connection();
        if holder.restore_auto_commit.swap(false, Ordering::SeqCst) {
            if let Err(e) = connection.set_auto_commit(true) {
                warn!(key = %self.key, error = %e, "could not restore auto-commit");
            }
        }
        if let Some(previous) = holder.previous_isolation.lock().take() {
            if let Err(e) = connection.set_isolation(previous) {
                warn!(key = %self.key, error = %e, "could not restore isolation level");
            }
        }
        if connection.is_read_only() {
            if let Err(e) = connection.set_read_only(false) {
                warn!(key = %self.key, error = %e, "could not reset read-only flag");
            }
        }
    }
}

impl<F: ConnectionFactory> ResourceManagerHooks for ConnectionTransactionManager<F> {
    type Transaction = ConnectionTransaction<F::Connection>;
    type Suspended = Arc<ConnectionHolder<F::Connection>>;
    type Savepoint = String;

    fn do_get_transaction(&self, registry: &mut SynchronizationRegistry) -> HookResult<Self::Transaction> {
        let holder = registry
            .get_resource_as::<ConnectionHolder<F::Connection>>(&self.key)
            .map_err(|e| ResourceFailure::wrap("connection holder lookup failed", e))?;
        Ok(ConnectionTransaction {
            holder,
            new_holder: false,
        })
    }

    fn is_existing_transaction(&self, transaction: &Self::Transaction) -> bool {
        transaction.holder.as_ref().is_some_and(|h| h.is_transaction_active())
    }

    fn supports_isolation(&self, _isolation: Isolation) -> bool {
        true
    }

    fn supports_timeout(&self) -> bool {
        true
    }

    fn do_begin(
        &self,
        transaction: &mut Self::Transaction,
        definition: &TransactionDefinition,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        let holder = match &transaction.holder {
            Some(holder) if !holder.support().is_synchronized_with_transaction() => holder.clone(),
            _ => {
                let connection = self.factory.connect()?;
                debug!(key = %self.key, "acquired connection for transaction");
                transaction.new_holder = true;
                Arc::new(ConnectionHolder::new(connection))
            }
        };
        holder.support().set_synchronized_with_transaction(true);

        if let Err(e) = self.prepare_connection(&holder, definition) {
            holder.support().set_synchronized_with_transaction(false);
            self.reset_connection(&holder);
            if transaction.new_holder {
                holder.connection().close();
                transaction.new_holder = false;
            }
            transaction.holder = None;
            return Err(e.into());
        }

        holder.transaction_active.store(true, Ordering::SeqCst);
        if let Some(seconds) = definition.timeout() {
            holder.support().set_timeout_in_seconds(seconds);
        }
        if transaction.new_holder {
            registry
                .bind_resource(self.key.clone(), holder.clone())
                .map_err(|e| ResourceFailure::wrap("could not bind connection holder", e))?;
        }
        transaction.holder = Some(holder);
        Ok(())
    }

    fn do_suspend(
        &self,
        transaction: &mut Self::Transaction,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<Self::Suspended> {
        transaction.holder = None;
        transaction.new_holder = false;
        registry
            .unbind_resource(&self.key)
            .map_err(|e| ResourceFailure::wrap("could not unbind connection holder", e))?
            .into_any_arc()
            .downcast::<ConnectionHolder<F::Connection>>()
            .map_err(|_| ResourceFailure::IllegalState(format!("unexpected holder type for '{}'", self.key)))
    }

    fn do_resume(
        &self,
        _transaction: Option<&mut Self::Transaction>,
        suspended: Self::Suspended,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        registry
            .bind_resource(self.key.clone(), suspended)
            .map_err(|e| ResourceFailure::wrap("could not rebind connection holder", e))
    }

    fn do_commit(&self, transaction: &mut Self::Transaction) -> HookResult<()> {
        let holder = transaction.active_holder()?;
        debug!(key = %self.key, "committing connection transaction");
        holder.connection().commit()?;
        Ok(())
    }

    fn do_rollback(&self, transaction: &mut Self::Transaction) -> HookResult<()> {
        let holder = transaction.active_holder()?;
        debug!(key = %self.key, "rolling back connection transaction");
        holder.connection().rollback()?;
        Ok(())
    }

    fn do_set_rollback_only(&self, transaction: &mut Self::Transaction) -> HookResult<()> {
        transaction.active_holder()?.support().set_rollback_only();
        Ok(())
    }

    fn is_global_rollback_only(&self, transaction: &Self::Transaction) -> bool {
        transaction
            .holder
            .as_ref()
            .is_some_and(|h| h.support().is_rollback_only())
    }

    fn supports_savepoints(&self, transaction: &Self::Transaction) -> bool {
        transaction
            .holder
            .as_ref()
            .is_some_and(|h| h.connection().supports_savepoints())
    }

    fn create_savepoint(&self, transaction: &mut Self::Transaction) -> HookResult<String> {
        let holder = transaction.active_holder()?;
        let name = holder.next_savepoint_name();
        holder.connection().set_savepoint(&name)?;
        Ok(name)
    }

    fn rollback_to_savepoint(&self, transaction: &mut Self::Transaction, savepoint: &String) -> HookResult<()> {
        let holder = transaction.active_holder()?;
        holder.connection().rollback_to_savepoint(savepoint)?;
        holder.support().reset_rollback_only();
        Ok(())
    }

    fn release_savepoint(&self, transaction: &mut Self::Transaction, savepoint: String) -> HookResult<()> {
        let holder = transaction.active_holder()?;
        if let Err(e) = holder.connection().release_savepoint(&savepoint) {
            debug!(key = %self.key, %savepoint, error = %e, "could not explicitly release savepoint");
        }
        Ok(())
    }

    fn do_cleanup_after_completion(
        &self,
        transaction: &mut Self::Transaction,
        registry: &mut SynchronizationRegistry,
    ) -> HookResult<()> {
        let Some(holder) = transaction.holder.take() else {
            return Ok(());
        };
        if transaction.new_holder {
            registry.unbind_resource_if_possible(&self.key);
        }
        self.reset_connection(&holder);
        holder.transaction_active.store(false, Ordering::SeqCst);
        holder.support().clear();
        if transaction.new_holder {
            debug!(key = %self.key, "releasing connection after transaction");
            holder.connection().close();
            holder.unbound();
        }
        Ok(())
    }
}

impl<F> fmt::Debug for ConnectionTransactionManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTransactionManager")
            .field("key", &self.key)
            .finish()
    }
}
