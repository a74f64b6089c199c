//! The database handle: lifecycle, key/value reads, commit submission,
//! and the resource layer.
//!
//! One [`Database`] owns a redb backend, the ephemeral root table, the
//! fresh-resource buffer, and two workers: the committer thread (sole
//! writer) and the optional GC thread. Handles are cheap to clone and
//! thread-safe; all writes are funneled through the committer.

use std::collections::HashMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use redb::ReadableTableMetadata;
use tokio::sync::oneshot;
use tracing::{info, warn};

use cairn_types::{
    DbError, Hash, Key, Result, Value, validate_key, validate_value,
};

use crate::committer::{self, Commit, Proposal};
use crate::config::DbConfig;
use crate::gc::{self, GcStats};
use crate::lock::DirLock;
use crate::tables::Tables;
use crate::transaction::Transaction;

use crate::eph::EphemeralRoots;

/// Name of the backing redb file inside the database directory.
const STORE_FILE: &str = "store.redb";

/// State shared between handles and worker threads.
pub(crate) struct Shared {
    pub(crate) backend: redb::Database,
    pub(crate) file_path: PathBuf,
    pub(crate) cfg: DbConfig,
    pub(crate) eph: EphemeralRoots,
    /// Newly stowed resources, buffered until the committer flushes them.
    pub(crate) fresh: Mutex<HashMap<Hash, Arc<[u8]>>>,
    pub(crate) poisoned: AtomicBool,
}

/// Worker threads and the directory lock, torn down exactly once.
struct Workers {
    proposals: mpsc::Sender<Proposal>,
    committer: Mutex<Option<JoinHandle<()>>>,
    gc_stop: Arc<StopSignal>,
    gc: Mutex<Option<JoinHandle<()>>>,
    _lock: DirLock,
}

/// Wakeable stop flag for the GC thread.
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Drop for Workers {
    fn drop(&mut self) {
        // Stop the GC first: it holds a proposal sender, and the
        // committer only exits once every sender is gone.
        *self.gc_stop.stopped.lock() = true;
        self.gc_stop.wake.notify_all();
        if let Some(handle) = self.gc.lock().take() {
            let _ = handle.join();
        }

        let (dummy, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.proposals, dummy));
        if let Some(handle) = self.committer.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Aggregate occupancy counters, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy)]
pub struct DbStats {
    /// Bound keys in the data table.
    pub data_entries: u64,
    /// Persisted resources.
    pub resource_entries: u64,
    /// Resources still buffered in memory.
    pub fresh_resources: usize,
    /// Distinct rooted ephemeron ids.
    pub ephemeral_roots: usize,
}

/// A content-addressed stowage database.
///
/// Cloning is cheap; every clone refers to the same store. The last
/// handle to drop stops the workers and releases the directory lock.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
    workers: Arc<Workers>,
}

impl Database {
    /// Open or create a database in `dir`.
    ///
    /// Creates the directory, takes the exclusive lock, opens the
    /// backend, and starts the committer (and the GC thread unless
    /// disabled by configuration).
    pub fn open(dir: impl AsRef<Path>, cfg: DbConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let lock = DirLock::acquire(dir)?;

        let file_path = dir.join(STORE_FILE);
        let backend = redb::Database::create(&file_path).map_err(DbError::backend)?;

        let shared = Arc::new(Shared {
            backend,
            file_path,
            cfg,
            eph: EphemeralRoots::new(),
            fresh: Mutex::new(HashMap::new()),
            poisoned: AtomicBool::new(false),
        });

        let (proposals, committer) = committer::spawn(Arc::clone(&shared));

        let gc_stop = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let gc = shared.cfg.gc_interval.map(|interval| {
            spawn_gc(
                Arc::clone(&shared),
                proposals.clone(),
                Arc::clone(&gc_stop),
                interval,
            )
        });

        info!(path = %dir.display(), "opened database");
        Ok(Self {
            shared,
            workers: Arc::new(Workers {
                proposals,
                committer: Mutex::new(Some(committer)),
                gc_stop,
                gc: Mutex::new(gc),
                _lock: lock,
            }),
        })
    }

    /// The configuration this database was opened with.
    pub fn config(&self) -> &DbConfig {
        &self.shared.cfg
    }

    /// True once the committer has aborted; all operations then fail
    /// immediately with [`DbError::Poisoned`].
    pub fn poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::SeqCst)
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned() {
            return Err(DbError::Poisoned);
        }
        Ok(())
    }

    pub(crate) fn submit(&self, proposal: Proposal) -> Result<()> {
        self.check_poisoned()?;
        self.workers
            .proposals
            .send(proposal)
            .map_err(|_| DbError::Poisoned)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    // ------------------------------------------------------------------
    // Key/value reads
    // ------------------------------------------------------------------

    /// Read the current value of a key. Unbound keys read as empty.
    pub fn read_key(&self, key: &[u8]) -> Result<Value> {
        validate_key(key)?;
        self.check_poisoned()?;
        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        read_one(&snapshot, key)
    }

    /// Read several keys from one snapshot.
    ///
    /// The returned slice is consistent: either all values predate a
    /// concurrent commit or all follow it, never a mix.
    pub fn read_keys(&self, keys: &[&[u8]]) -> Result<Vec<Value>> {
        for key in keys {
            validate_key(key)?;
        }
        self.check_poisoned()?;
        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        keys.iter().map(|&key| read_one(&snapshot, key)).collect()
    }

    /// Report the first read assumption that no longer holds, if any.
    pub fn test_read_assumptions(&self, reads: &[(Key, Value)]) -> Result<Option<Key>> {
        for (key, value) in reads {
            validate_key(key)?;
            validate_value(value)?;
        }
        self.check_poisoned()?;
        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        for (key, assumed) in reads {
            if read_one(&snapshot, key)? != *assumed {
                return Ok(Some(key.clone()));
            }
        }
        Ok(None)
    }

    /// Up to `n_max` bound keys lexicographically after `prev` (from the
    /// smallest when `prev` is `None`).
    pub fn discover_keys(&self, prev: Option<&[u8]>, n_max: usize) -> Result<Vec<Key>> {
        self.check_poisoned()?;
        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        let table = match snapshot.open_table(Tables::DATA) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(DbError::backend(e)),
        };

        let range = match prev {
            Some(p) => (Bound::Excluded(p), Bound::Unbounded),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        let mut keys = Vec::new();
        for entry in table.range::<&[u8]>(range).map_err(DbError::backend)? {
            if keys.len() >= n_max {
                break;
            }
            let (key, value) = entry.map_err(DbError::backend)?;
            if !value.value().is_empty() {
                keys.push(key.value().to_vec());
            }
        }
        Ok(keys)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Submit an atomic compare-and-swap: apply `writes` iff every
    /// `(key, value)` in `reads` still holds.
    pub fn atomic_update(
        &self,
        reads: Vec<(Key, Value)>,
        writes: Vec<(Key, Value)>,
    ) -> Result<Commit> {
        for (key, value) in reads.iter().chain(&writes) {
            validate_key(key)?;
            validate_value(value)?;
        }
        let (tx, rx) = oneshot::channel();
        self.submit(Proposal::Update {
            reads,
            writes,
            release: HashMap::new(),
            done: tx,
        })?;
        Ok(Commit::new(rx))
    }

    /// Blind write of a single key.
    pub fn write_key(&self, key: Key, value: Value) -> Result<Commit> {
        self.atomic_update(Vec::new(), vec![(key, value)])
    }

    /// Block until everything submitted before this call is durable.
    pub fn sync(&self) -> Result<()> {
        let commit = self.atomic_update(Vec::new(), Vec::new())?;
        commit.wait()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Resource layer
    // ------------------------------------------------------------------

    /// Load a resource, returning `None` when it is neither buffered nor
    /// persisted. Takes no ephemeral root.
    pub fn try_load(&self, hash: &Hash) -> Result<Option<Value>> {
        self.check_poisoned()?;
        if let Some(bytes) = self.shared.fresh.lock().get(hash) {
            return Ok(Some(bytes.to_vec()));
        }
        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        let table = match snapshot.open_table(Tables::RESOURCES) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(DbError::backend(e)),
        };
        Ok(table
            .get(hash.as_bytes().as_slice())
            .map_err(DbError::backend)?
            .map(|guard| guard.value().to_vec()))
    }

    /// Load a resource or fail with [`DbError::MissingResource`].
    pub fn load(&self, hash: &Hash) -> Result<Value> {
        self.try_load(hash)?
            .ok_or(DbError::MissingResource { hash: *hash })
    }

    /// Whether the resource is currently buffered or persisted.
    pub fn has_resource(&self, hash: &Hash) -> Result<bool> {
        Ok(self.try_load(hash)?.is_some())
    }

    /// Invoke `f` with the resource bytes without copying them out of the
    /// backend's read transaction.
    ///
    /// The closure must be short-lived and must not call back into the
    /// database.
    pub fn with_resource<R>(&self, hash: &Hash, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.check_poisoned()?;
        // Fresh buffer first; the guard is cheap and briefly held.
        let fresh = self.shared.fresh.lock();
        if let Some(bytes) = fresh.get(hash) {
            let bytes = Arc::clone(bytes);
            drop(fresh);
            return Ok(f(&bytes));
        }
        drop(fresh);

        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        let table = match snapshot.open_table(Tables::RESOURCES) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => {
                return Err(DbError::MissingResource { hash: *hash });
            }
            Err(e) => return Err(DbError::backend(e)),
        };
        let guard = table
            .get(hash.as_bytes().as_slice())
            .map_err(DbError::backend)?
            .ok_or(DbError::MissingResource { hash: *hash })?;
        Ok(f(guard.value()))
    }

    // ------------------------------------------------------------------
    // Transactions, GC, stats
    // ------------------------------------------------------------------

    /// Begin a client transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Run one GC pass synchronously, independent of the background
    /// thread. Useful for tests and for explicit maintenance.
    pub fn run_gc_once(&self) -> Result<GcStats> {
        self.check_poisoned()?;
        gc::run_pass(&self.shared, &self.workers.proposals)
    }

    /// Occupancy counters.
    pub fn stats(&self) -> Result<DbStats> {
        self.check_poisoned()?;
        let snapshot = self.shared.backend.begin_read().map_err(DbError::backend)?;
        let data_entries = match snapshot.open_table(Tables::DATA) {
            Ok(table) => table.len().map_err(DbError::backend)?,
            Err(redb::TableError::TableDoesNotExist(_)) => 0,
            Err(e) => return Err(DbError::backend(e)),
        };
        let resource_entries = match snapshot.open_table(Tables::RESOURCES) {
            Ok(table) => table.len().map_err(DbError::backend)?,
            Err(redb::TableError::TableDoesNotExist(_)) => 0,
            Err(e) => return Err(DbError::backend(e)),
        };
        Ok(DbStats {
            data_entries,
            resource_entries,
            fresh_resources: self.shared.fresh.lock().len(),
            ephemeral_roots: self.shared.eph.len(),
        })
    }
}

fn read_one(snapshot: &redb::ReadTransaction, key: &[u8]) -> Result<Value> {
    let table = match snapshot.open_table(Tables::DATA) {
        Ok(table) => table,
        Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(e) => return Err(DbError::backend(e)),
    };
    Ok(table
        .get(key)
        .map_err(DbError::backend)?
        .map(|guard| guard.value().to_vec())
        .unwrap_or_default())
}

fn spawn_gc(
    shared: Arc<Shared>,
    proposals: mpsc::Sender<Proposal>,
    stop: Arc<StopSignal>,
    interval: Duration,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("cairn-gc".into())
        .spawn(move || {
            loop {
                {
                    let mut stopped = stop.stopped.lock();
                    if !*stopped {
                        let _ = stop.wake.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        return;
                    }
                }
                if shared.poisoned.load(Ordering::SeqCst) {
                    return;
                }
                match gc::run_pass(&shared, &proposals) {
                    Ok(stats) => {
                        if !stats.complete {
                            warn!(traced = stats.traced, "gc pass incomplete");
                        }
                    }
                    Err(e) => warn!(error = %e, "gc pass failed"),
                }
            }
        })
        .expect("spawn gc thread")
}
