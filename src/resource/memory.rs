//! In-memory key/value store with transactional connections.
//!
//! Writes on a connection in manual-commit mode are buffered until commit;
//! savepoints mark positions in that buffer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::definition::Isolation;
use crate::resource::connection::{Connection, ConnectionError, ConnectionFactory};

/// Connection settings observed when a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub auto_commit: bool,
    pub read_only: bool,
    pub isolation: Isolation,
}

#[derive(Default)]
struct StoreInner {
    data: RwLock<BTreeMap<String, String>>,
    open: AtomicUsize,
    created: AtomicUsize,
    unavailable: AtomicBool,
    last_closed: Mutex<Option<ConnectionSnapshot>>,
    isolation_levels: RwLock<Option<Vec<Isolation>>>,
}

/// Shared in-memory store. Clones refer to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.data.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.read().is_empty()
    }

    /// Number of connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Make `connect` fail while `false`.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Accept only `levels` in `set_isolation`, besides the default.
    pub fn restrict_isolation(&self, levels: &[Isolation]) {
        *self.inner.isolation_levels.write() = Some(levels.to_vec());
    }

    fn accepts_isolation(&self, isolation: Isolation) -> bool {
        isolation.is_default()
            || self
                .inner
                .isolation_levels
                .read()
                .as_ref()
                .is_none_or(|levels| levels.contains(&isolation))
    }

    pub fn last_closed(&self) -> Option<ConnectionSnapshot> {
        *self.inner.last_closed.lock()
    }

    pub fn connect(&self) -> Result<MemoryConnection, ConnectionError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(ConnectionError::Other("store unavailable".into()));
        }
        let id = self.inner.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        trace!(id, "opened memory connection");
        Ok(MemoryConnection {
            id,
            store: self.clone(),
            auto_commit: true,
            isolation: Isolation::ReadCommitted,
            read_only: false,
            pending: Vec::new(),
            savepoints: Vec::new(),
            aborted: None,
            closed: false,
        })
    }

    fn apply(&self, writes: Vec<Write>) {
        let mut data = self.inner.data.write();
        for write in writes {
            match write {
                Write::Put(key, value) => {
                    data.insert(key, value);
                }
                Write::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
    }
}

impl ConnectionFactory for MemoryStore {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection, ConnectionError> {
        MemoryStore::connect(self)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .field("open_connections", &self.open_connections())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Write {
    Put(String, String),
    Delete(String),
}

/// Connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    store: MemoryStore,
    auto_commit: bool,
    isolation: Isolation,
    read_only: bool,
    pending: Vec<Write>,
    /// Savepoint names with the buffer length at creation.
    savepoints: Vec<(String, usize)>,
    aborted: Option<String>,
    closed: bool,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Value for `key` as seen by this connection, pending writes included.
    pub fn get(&self, key: &str) -> Option<String> {
        for write in self.pending.iter().rev() {
            match write {
                Write::Put(k, value) if k == key => return Some(value.clone()),
                Write::Delete(k) if k == key => return None,
                _ => {}
            }
        }
        self.store.get(key)
    }

    pub fn put(&mut self, key: &str, value: &str) -> Result<(), ConnectionError> {
        self.write(Write::Put(key.to_string(), value.to_string()))
    }

    pub fn delete(&mut self, key: &str) -> Result<(), ConnectionError> {
        self.write(Write::Delete(key.to_string()))
    }

    /// Number of buffered, uncommitted writes.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Abort the current transaction on the store side. The next commit
    /// fails with `Aborted`.
    pub fn abort(&mut self, reason: &str) {
        self.aborted = Some(reason.to_string());
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.closed {
            Err(ConnectionError::Closed)
        } else {
            Ok(())
        }
    }

    fn write(&mut self, write: Write) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if self.read_only {
            return Err(ConnectionError::ReadOnly);
        }
        if self.auto_commit {
            self.store.apply(vec![write]);
        } else {
            self.pending.push(write);
        }
        Ok(())
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, ConnectionError> {
        self.savepoints
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| ConnectionError::NoSuchSavepoint(name.to_string()))
    }
}

impl Connection for MemoryConnection {
    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Switching auto-commit back on commits pending writes.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if auto_commit && !self.auto_commit && !self.pending.is_empty() {
            self.commit()?;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }

    fn set_isolation(&mut self, isolation: Isolation) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if !self.store.accepts_isolation(isolation) {
            return Err(ConnectionError::Other(format!("isolation level {} not available", isolation)));
        }
        self.isolation = isolation;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.read_only = read_only;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.savepoints.clear();
        if let Some(reason) = self.aborted.take() {
            self.pending.clear();
            return Err(ConnectionError::Aborted(reason));
        }
        let writes = std::mem::take(&mut self.pending);
        trace!(id = self.id, writes = writes.len(), "committing memory connection");
        self.store.apply(writes);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.pending.clear();
        self.savepoints.clear();
        self.aborted = None;
        Ok(())
    }

    fn supports_savepoints(&self) -> bool {
        true
    }

    fn set_savepoint(&mut self, name: &str) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if self.auto_commit {
            return Err(ConnectionError::Other("savepoints require manual commit".into()));
        }
        self.savepoints.push((name.to_string(), self.pending.len()));
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let index = self.savepoint_index(name)?;
        let mark = self.savepoints[index].1;
        self.pending.truncate(mark);
        self.savepoints.truncate(index + 1);
        Ok(())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    /// Uncommitted writes are discarded.
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.savepoints.clear();
        *self.store.inner.last_closed.lock() = Some(ConnectionSnapshot {
            auto_commit: self.auto_commit,
            read_only: self.read_only,
            isolation: self.isolation,
        });
        self.store.inner.open.fetch_sub(1, Ordering::SeqCst);
        trace!(id = self.id, "closed memory connection");
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}
