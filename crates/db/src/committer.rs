//! The committer: a dedicated writer thread with batched validation.
//!
//! All mutation flows through one thread that owns the write side of the
//! backend. Clients enqueue proposals and receive oneshot completion
//! slots; the committer drains the queue into batches, validates read
//! assumptions against a single snapshot (augmented by earlier winners in
//! the same batch), applies the surviving writes plus any GC sweeps in
//! one durable backend transaction, then fulfills the slots.
//!
//! First-commit-wins within a batch; durability is totally ordered across
//! batches. On a backend failure the whole batch reports `false`, the
//! committer retries once with an empty flush, and a second failure
//! poisons the handle.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, mpsc};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use redb::ReadableTable;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use cairn_types::{DbError, Hash, Key, Result, Value, iter_hash_deps};

use crate::db::Shared;
use crate::tables::Tables;

/// A unit of work for the committer thread.
pub(crate) enum Proposal {
    /// A transactional update: validate `reads`, apply `writes`, then
    /// release the ephemeral roots the submitting transaction carried.
    Update {
        reads: Vec<(Key, Value)>,
        writes: Vec<(Key, Value)>,
        release: HashMap<u64, u64>,
        done: oneshot::Sender<bool>,
    },
    /// A GC sweep: delete each victim unless it regained a root.
    Sweep {
        victims: Vec<Hash>,
        done: oneshot::Sender<usize>,
    },
}

/// Per-proposal batch outcome, aligned with the batch by index.
enum Outcome {
    Committed(bool),
    Swept(usize),
}

/// Completion handle for a submitted update.
///
/// Resolves to `true` once every read assumption held and the writes are
/// durable, `false` on an optimistic conflict or a failed batch. Usable
/// from synchronous code via [`Commit::wait`] or awaited as a future.
pub struct Commit {
    rx: oneshot::Receiver<bool>,
}

impl Commit {
    pub(crate) fn new(rx: oneshot::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Block the calling thread until the commit resolves.
    pub fn wait(self) -> Result<bool> {
        self.rx.blocking_recv().map_err(|_| DbError::Poisoned)
    }
}

impl Future for Commit {
    type Output = Result<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| DbError::Poisoned))
    }
}

/// Start the committer thread. Returns the proposal sender and the join
/// handle; the thread exits once every sender is dropped.
pub(crate) fn spawn(shared: Arc<Shared>) -> (mpsc::Sender<Proposal>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("cairn-committer".into())
        .spawn(move || run(&shared, &rx))
        .expect("spawn committer thread");
    (tx, handle)
}

fn run(shared: &Shared, rx: &mpsc::Receiver<Proposal>) {
    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        while batch.len() < shared.cfg.max_batch {
            match rx.try_recv() {
                Ok(p) => batch.push(p),
                Err(_) => break,
            }
        }
        debug!(proposals = batch.len(), "committing batch");

        match process(shared, &batch) {
            Ok(outcomes) => finish(shared, batch, outcomes),
            Err(e) => {
                warn!(error = %e, "batch failed, retrying with empty flush");
                fail(shared, batch);
                if let Err(e) = empty_flush(shared) {
                    error!(error = %e, "empty flush failed, poisoning database");
                    shared.poisoned.store(true, Ordering::SeqCst);
                    while let Ok(p) = rx.try_recv() {
                        fail(shared, vec![p]);
                    }
                    return;
                }
            }
        }
    }
}

/// Validate and apply one batch. Responds to nobody; the caller fulfills
/// completion slots from the returned outcomes.
fn process(shared: &Shared, batch: &[Proposal]) -> Result<Vec<Outcome>> {
    if let Some(mb) = shared.cfg.max_size_mb {
        let len = std::fs::metadata(&shared.file_path).map(|m| m.len()).unwrap_or(0);
        if len > mb.saturating_mul(1024 * 1024) {
            return Err(DbError::backend(format!("backing file exceeds {mb} MiB")));
        }
    }

    // Validation pass against one snapshot, augmented by writes of
    // earlier validated proposals in this batch.
    let snapshot = shared.backend.begin_read().map_err(DbError::backend)?;
    let data = match snapshot.open_table(Tables::DATA) {
        Ok(table) => Some(table),
        Err(redb::TableError::TableDoesNotExist(_)) => None,
        Err(e) => return Err(DbError::backend(e)),
    };

    let mut overlay: HashMap<&[u8], &[u8]> = HashMap::new();
    let mut outcomes = Vec::with_capacity(batch.len());
    for proposal in batch {
        match proposal {
            Proposal::Update { reads, writes, .. } => {
                let mut ok = true;
                for (key, assumed) in reads {
                    let current = match overlay.get(key.as_slice()) {
                        Some(v) => v.to_vec(),
                        None => match &data {
                            Some(table) => table
                                .get(key.as_slice())
                                .map_err(DbError::backend)?
                                .map(|guard| guard.value().to_vec())
                                .unwrap_or_default(),
                            None => Vec::new(),
                        },
                    };
                    if current != *assumed {
                        ok = false;
                        break;
                    }
                }
                if ok {
                    for (key, value) in writes {
                        overlay.insert(key.as_slice(), value.as_slice());
                    }
                }
                outcomes.push(Outcome::Committed(ok));
            }
            Proposal::Sweep { .. } => outcomes.push(Outcome::Swept(0)),
        }
    }

    // Apply pass: one durable write transaction for the whole batch.
    let wtx = shared.backend.begin_write().map_err(DbError::backend)?;
    {
        let mut data_t = wtx.open_table(Tables::DATA).map_err(DbError::backend)?;
        let mut res_t = wtx.open_table(Tables::RESOURCES).map_err(DbError::backend)?;

        let mut referenced: HashSet<Hash> = HashSet::new();
        for (proposal, outcome) in batch.iter().zip(&outcomes) {
            let (Proposal::Update { writes, .. }, Outcome::Committed(true)) = (proposal, outcome)
            else {
                continue;
            };
            for (key, value) in writes {
                if value.is_empty() {
                    data_t.remove(key.as_slice()).map_err(DbError::backend)?;
                } else {
                    data_t
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(DbError::backend)?;
                    referenced.extend(iter_hash_deps(value));
                }
            }
        }

        // Flush fresh resources that are still rooted or that the batch
        // just referenced from a written value.
        let fresh: Vec<(Hash, Arc<[u8]>)> = shared
            .fresh
            .lock()
            .iter()
            .map(|(h, bytes)| (*h, Arc::clone(bytes)))
            .collect();
        for (hash, bytes) in &fresh {
            if !shared.eph.is_rooted(hash.ephemeron_id()) && !referenced.contains(hash) {
                continue;
            }
            let absent = res_t
                .get(hash.as_bytes().as_slice())
                .map_err(DbError::backend)?
                .is_none();
            if absent {
                res_t
                    .insert(hash.as_bytes().as_slice(), &bytes[..])
                    .map_err(DbError::backend)?;
            }
        }

        // Sweeps re-check roots at delete time to serialize with stows
        // racing this batch.
        for (index, proposal) in batch.iter().enumerate() {
            let Proposal::Sweep { victims, .. } = proposal else {
                continue;
            };
            let mut count = 0;
            for hash in victims {
                if shared.eph.is_rooted(hash.ephemeron_id())
                    || referenced.contains(hash)
                    || shared.fresh.lock().contains_key(hash)
                {
                    continue;
                }
                let removed = res_t
                    .remove(hash.as_bytes().as_slice())
                    .map_err(DbError::backend)?
                    .is_some();
                if removed {
                    count += 1;
                }
            }
            outcomes[index] = Outcome::Swept(count);
        }
    }
    wtx.commit().map_err(DbError::backend)?;

    Ok(outcomes)
}

/// Release carried roots, prune the fresh buffer, then fulfill the
/// completion slots.
///
/// Releases come first so a caller observing its completion sees the
/// post-batch root state: the roots its transaction carried are gone and
/// the buffer reflects that.
fn finish(shared: &Shared, batch: Vec<Proposal>, outcomes: Vec<Outcome>) {
    release_roots(shared, &batch);
    for (proposal, outcome) in batch.into_iter().zip(outcomes) {
        match (proposal, outcome) {
            (Proposal::Update { done, .. }, Outcome::Committed(ok)) => {
                let _ = done.send(ok);
            }
            (Proposal::Sweep { done, .. }, Outcome::Swept(count)) => {
                let _ = done.send(count);
            }
            (Proposal::Update { done, .. }, _) => {
                debug_assert!(false, "misaligned batch outcome");
                let _ = done.send(false);
            }
            (Proposal::Sweep { done, .. }, _) => {
                debug_assert!(false, "misaligned batch outcome");
                let _ = done.send(0);
            }
        }
    }
}

/// Report failure to every proposal in the batch, releasing their roots
/// first as in [`finish`].
fn fail(shared: &Shared, batch: Vec<Proposal>) {
    release_roots(shared, &batch);
    for proposal in batch {
        match proposal {
            Proposal::Update { done, .. } => {
                let _ = done.send(false);
            }
            Proposal::Sweep { done, .. } => {
                let _ = done.send(0);
            }
        }
    }
}

fn release_roots(shared: &Shared, batch: &[Proposal]) {
    for proposal in batch {
        if let Proposal::Update { release, .. } = proposal {
            shared.eph.remove_many(release);
        }
    }
    prune_fresh(shared);
}

fn prune_fresh(shared: &Shared) {
    shared
        .fresh
        .lock()
        .retain(|hash, _| shared.eph.is_rooted(hash.ephemeron_id()));
}

/// Commit an empty transaction to advance durability and probe the
/// backend after a failed batch.
fn empty_flush(shared: &Shared) -> Result<()> {
    let wtx = shared.backend.begin_write().map_err(DbError::backend)?;
    wtx.commit().map_err(DbError::backend)?;
    Ok(())
}
