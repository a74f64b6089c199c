//! Client-side transactions.
//!
//! A [`Transaction`] accumulates read assumptions and pending writes, and
//! owns a ledger of ephemeral roots taken on behalf of the client: every
//! value read from the backend is scanned for hash dependencies and each
//! dependency's id is incremented before the read is recorded, so nothing
//! the client might subsequently `load` can be collected underneath it.
//!
//! There is no snapshot isolation across separate reads; the committer's
//! validation catches conflicts at commit time. A multi-key `read_keys`
//! is snapshot-consistent within the one call.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::oneshot;

use cairn_types::{
    Hash, Key, Result, Value, iter_hash_deps, validate_key, validate_value,
};

use crate::committer::{Commit, Proposal};
use crate::db::Database;

/// An optimistic transaction over a [`Database`].
///
/// Owned by a single caller. Dropping the transaction releases every
/// ephemeral root it took; committing hands them to the committer, which
/// releases them once the batch carrying the writes has been processed.
pub struct Transaction {
    db: Database,
    reads: HashMap<Key, Value>,
    writes: HashMap<Key, Value>,
    eph: HashMap<u64, u64>,
}

impl Transaction {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            db,
            reads: HashMap::new(),
            writes: HashMap::new(),
            eph: HashMap::new(),
        }
    }

    /// Read a key through the transaction.
    ///
    /// Pending writes shadow recorded reads, which shadow the backend. A
    /// fresh backend read roots the value's hash dependencies and records
    /// the assumption for commit-time validation.
    pub fn read_key(&mut self, key: &[u8]) -> Result<Value> {
        validate_key(key)?;
        if let Some(value) = self.writes.get(key) {
            return Ok(value.clone());
        }
        if let Some(value) = self.reads.get(key) {
            return Ok(value.clone());
        }
        let value = self.db.read_key(key)?;
        self.root_deps(&value);
        self.reads.insert(key.to_vec(), value.clone());
        Ok(value)
    }

    /// Read several keys; uncached keys share one backend snapshot.
    pub fn read_keys(&mut self, keys: &[&[u8]]) -> Result<Vec<Value>> {
        for key in keys {
            validate_key(key)?;
        }
        let missing: Vec<&[u8]> = keys
            .iter()
            .copied()
            .filter(|k| !self.writes.contains_key(*k) && !self.reads.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            let fetched = self.db.read_keys(&missing)?;
            for (key, value) in missing.into_iter().zip(fetched) {
                self.root_deps(&value);
                self.reads.insert(key.to_vec(), value);
            }
        }
        Ok(keys
            .iter()
            .map(|key| {
                self.writes
                    .get(*key)
                    .or_else(|| self.reads.get(*key))
                    .cloned()
                    .expect("every key cached above")
            })
            .collect())
    }

    /// Record a read assumption without consulting the backend.
    ///
    /// # Panics
    ///
    /// Panics if the key was already read with a different value; the
    /// caller is asserting something it has contradicted.
    pub fn assume_key(&mut self, key: Key, value: Value) -> Result<()> {
        validate_key(&key)?;
        validate_value(&value)?;
        match self.reads.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(existing) => {
                assert_eq!(
                    *existing.get(),
                    value,
                    "conflicting read assumption for key {:?}",
                    existing.key()
                );
            }
        }
        Ok(())
    }

    /// Record a pending write. Later reads of `key` in this transaction
    /// return `value`. An empty value unbinds the key.
    pub fn write_key(&mut self, key: Key, value: Value) -> Result<()> {
        validate_key(&key)?;
        validate_value(&value)?;
        self.writes.insert(key, value);
        Ok(())
    }

    /// Stow content into the resource layer, returning its hash.
    ///
    /// The content is buffered in memory until the committer flushes it;
    /// the ephemeral root taken here is charged to this transaction.
    pub fn stow(&mut self, bytes: &[u8]) -> Result<Hash> {
        validate_value(bytes)?;
        let hash = Hash::digest(bytes);
        // Root before publishing into the buffer: a concurrent GC or
        // committer prune drops unrooted buffer entries.
        let id = hash.ephemeron_id();
        self.db.shared().eph.incref(id, 1);
        *self.eph.entry(id).or_insert(0) += 1;
        self.db
            .shared()
            .fresh
            .lock()
            .entry(hash)
            .or_insert_with(|| Arc::from(bytes.to_vec().into_boxed_slice()));
        Ok(hash)
    }

    /// Load a resource. Does not take a root; values read through this
    /// transaction already root their dependencies.
    pub fn load(&self, hash: &Hash) -> Result<Value> {
        self.db.load(hash)
    }

    /// As [`Transaction::load`], returning `None` when absent.
    pub fn try_load(&self, hash: &Hash) -> Result<Option<Value>> {
        self.db.try_load(hash)
    }

    /// Submit this transaction. The completion resolves `true` iff every
    /// recorded read still held and the writes are durable.
    ///
    /// The ephemeral ledger travels with the proposal and is released by
    /// the committer after the batch, so resources referenced by the
    /// writes stay rooted until they are on disk.
    pub fn commit(mut self) -> Result<Commit> {
        let reads: Vec<(Key, Value)> = self.reads.drain().collect();
        let writes: Vec<(Key, Value)> = self.writes.drain().collect();
        let release = std::mem::take(&mut self.eph);
        let (tx, rx) = oneshot::channel();
        let submitted = self.db.submit(Proposal::Update {
            reads,
            writes,
            release: release.clone(),
            done: tx,
        });
        if submitted.is_err() {
            // Not enqueued; the roots are still ours to drop.
            self.db.shared().eph.remove_many(&release);
            submitted?;
        }
        Ok(Commit::new(rx))
    }

    /// Commit and, on success, fold the writes into the read set and
    /// re-derive the ephemeral ledger from reads alone, keeping the
    /// transaction usable for another round.
    ///
    /// Blocks until the commit resolves. Returns the commit verdict.
    pub fn checkpoint(&mut self) -> Result<bool> {
        let reads: Vec<(Key, Value)> = self.reads.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let writes: Vec<(Key, Value)> = self.writes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let (tx, rx) = oneshot::channel();
        self.db.submit(Proposal::Update {
            reads,
            writes,
            release: HashMap::new(),
            done: tx,
        })?;
        let committed = Commit::new(rx).wait()?;
        if !committed {
            return Ok(false);
        }

        let writes = std::mem::take(&mut self.writes);
        self.reads.extend(writes);

        let mut next: HashMap<u64, u64> = HashMap::new();
        for value in self.reads.values() {
            for dep in iter_hash_deps(value) {
                *next.entry(dep.ephemeron_id()).or_insert(0) += 1;
            }
        }
        // Take the new roots before dropping the old ones so nothing is
        // momentarily unrooted.
        self.db.shared().eph.add_many(&next);
        let previous = std::mem::replace(&mut self.eph, next);
        self.db.shared().eph.remove_many(&previous);
        Ok(true)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.eph.is_empty() {
            let ledger = std::mem::take(&mut self.eph);
            self.db.shared().eph.remove_many(&ledger);
        }
    }
}

impl Transaction {
    fn root_deps(&mut self, value: &[u8]) {
        let mut deltas: HashMap<u64, u64> = HashMap::new();
        for dep in iter_hash_deps(value) {
            *deltas.entry(dep.ephemeron_id()).or_insert(0) += 1;
        }
        if deltas.is_empty() {
            return;
        }
        self.db.shared().eph.add_many(&deltas);
        for (id, delta) in deltas {
            *self.eph.entry(id).or_insert(0) += delta;
        }
    }
}
