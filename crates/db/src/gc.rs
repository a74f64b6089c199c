//! Conservative garbage collection of stowed resources.
//!
//! A pass marks every resource reachable from (a) the dependencies of
//! stored key/value bindings and (b) resources whose ephemeron id is
//! rooted, fresh-buffer entries included, tracing through resource bytes
//! with the lexical scanner. Unmarked, unrooted resources are handed to
//! the committer as sweep proposals, which re-check roots at delete time
//! so the sweep serializes with concurrent writers.
//!
//! Marking is budgeted. A pass that exhausts its trace budget skips
//! deletion entirely; retention is always safe, and the next pass starts
//! over against a fresh snapshot.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, mpsc};

use redb::ReadableTable;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use cairn_types::{DbError, Hash, Result, iter_hash_deps};

use crate::committer::Proposal;
use crate::db::Shared;
use crate::tables::Tables;

/// Result of a single GC pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Resources whose bytes were traced for dependencies.
    pub traced: usize,
    /// Size of the live set after marking.
    pub live: usize,
    /// Resources deleted by this pass.
    pub swept: usize,
    /// False when the trace budget ran out and deletion was skipped.
    pub complete: bool,
}

/// Run one mark/sweep pass.
pub(crate) fn run_pass(shared: &Shared, proposals: &mpsc::Sender<Proposal>) -> Result<GcStats> {
    // An unrooted buffer entry is unreachable (stows hold a root until
    // the committer has flushed and released them): drop it now rather
    // than waiting for the next commit.
    shared
        .fresh
        .lock()
        .retain(|hash, _| shared.eph.is_rooted(hash.ephemeron_id()));

    let snapshot = shared.backend.begin_read().map_err(DbError::backend)?;
    let data = open_table(&snapshot, Tables::DATA)?;
    let resources = open_table(&snapshot, Tables::RESOURCES)?;

    let mut live: HashSet<Hash> = HashSet::new();
    let mut queue: VecDeque<Hash> = VecDeque::new();
    fn enqueue(live: &mut HashSet<Hash>, queue: &mut VecDeque<Hash>, hash: Hash) {
        if live.insert(hash) {
            queue.push_back(hash);
        }
    }

    // Roots: dependencies of every stored binding.
    if let Some(table) = &data {
        for entry in table.iter().map_err(DbError::backend)? {
            let (_, value) = entry.map_err(DbError::backend)?;
            for dep in iter_hash_deps(value.value()) {
                enqueue(&mut live, &mut queue, dep);
            }
        }
    }

    // Roots: fresh resources still ephemerally rooted, and their deps.
    let fresh: Vec<(Hash, Arc<[u8]>)> = shared
        .fresh
        .lock()
        .iter()
        .map(|(h, bytes)| (*h, Arc::clone(bytes)))
        .collect();
    for (hash, bytes) in &fresh {
        if shared.eph.is_rooted(hash.ephemeron_id()) {
            enqueue(&mut live, &mut queue, *hash);
            for dep in iter_hash_deps(bytes) {
                enqueue(&mut live, &mut queue, dep);
            }
        }
    }

    // Roots: persisted resources with a rooted ephemeron id.
    if let Some(table) = &resources {
        for entry in table.iter().map_err(DbError::backend)? {
            let (key, value) = entry.map_err(DbError::backend)?;
            let Some(hash) = Hash::from_bytes(key.value()) else {
                warn!("resource table key is not a hash");
                continue;
            };
            if shared.eph.is_rooted(hash.ephemeron_id()) {
                enqueue(&mut live, &mut queue, hash);
                for dep in iter_hash_deps(value.value()) {
                    enqueue(&mut live, &mut queue, dep);
                }
            }
        }
    }

    // Trace to a fixpoint, bounded by the step budget.
    let mut traced = 0;
    let mut complete = true;
    while let Some(hash) = queue.pop_front() {
        if traced >= shared.cfg.gc_step_budget {
            complete = false;
            break;
        }
        traced += 1;
        let bytes = match shared.fresh.lock().get(&hash) {
            Some(bytes) => Some(bytes.to_vec()),
            None => match &resources {
                Some(table) => table
                    .get(hash.as_bytes().as_slice())
                    .map_err(DbError::backend)?
                    .map(|guard| guard.value().to_vec()),
                None => None,
            },
        };
        let Some(bytes) = bytes else {
            // Referenced but absent: dangling or already collected.
            continue;
        };
        for dep in iter_hash_deps(&bytes) {
            enqueue(&mut live, &mut queue, dep);
        }
    }

    let mut stats = GcStats {
        traced,
        live: live.len(),
        swept: 0,
        complete,
    };
    if !complete {
        debug!(traced, "gc trace budget exhausted, skipping sweep");
        return Ok(stats);
    }

    // Sweep: everything persisted, unmarked, and unrooted.
    let mut victims: Vec<Hash> = Vec::new();
    if let Some(table) = &resources {
        for entry in table.iter().map_err(DbError::backend)? {
            let (key, _) = entry.map_err(DbError::backend)?;
            let Some(hash) = Hash::from_bytes(key.value()) else {
                continue;
            };
            if !live.contains(&hash) && !shared.eph.is_rooted(hash.ephemeron_id()) {
                victims.push(hash);
            }
        }
    }
    drop(snapshot);

    for chunk in victims.chunks(shared.cfg.gc_sweep_batch.max(1)) {
        let (tx, rx) = oneshot::channel();
        let sweep = Proposal::Sweep {
            victims: chunk.to_vec(),
            done: tx,
        };
        if proposals.send(sweep).is_err() {
            // Database shutting down mid-pass.
            return Ok(stats);
        }
        match rx.blocking_recv() {
            Ok(count) => stats.swept += count,
            Err(_) => return Ok(stats),
        }
    }

    if stats.swept > 0 {
        info!(
            swept = stats.swept,
            live = stats.live,
            traced = stats.traced,
            "gc pass reclaimed resources"
        );
    }
    Ok(stats)
}

fn open_table(
    snapshot: &redb::ReadTransaction,
    def: redb::TableDefinition<'static, &'static [u8], &'static [u8]>,
) -> Result<Option<redb::ReadOnlyTable<&'static [u8], &'static [u8]>>> {
    match snapshot.open_table(def) {
        Ok(table) => Ok(Some(table)),
        Err(redb::TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(DbError::backend(e)),
    }
}
