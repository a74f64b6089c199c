//! Ephemeral root table.
//!
//! An in-process reference counter keyed by ephemeron id (the 64-bit
//! prefix of a hash). A positive count keeps the corresponding resources
//! safe from GC while they are only reachable from memory. Ids collide
//! across distinct hashes; the table over-approximates liveness, which
//! only delays reclamation. The API never faults on unknown ids.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::error;

/// Shared ephemeral root counters.
#[derive(Default)]
pub struct EphemeralRoots {
    table: Mutex<HashMap<u64, u64>>,
}

impl EphemeralRoots {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `id` by `delta`.
    pub fn incref(&self, id: u64, delta: u64) {
        if delta == 0 {
            return;
        }
        *self.table.lock().entry(id).or_insert(0) += delta;
    }

    /// Decrement the counter for `id` by `delta`.
    ///
    /// Counts never go negative; an underflow is a bug in root
    /// accounting, logged and saturated to zero.
    pub fn decref(&self, id: u64, delta: u64) {
        if delta == 0 {
            return;
        }
        let mut table = self.table.lock();
        decref_locked(&mut table, id, delta);
    }

    /// Add a whole multiset of roots atomically.
    pub fn add_many(&self, deltas: &HashMap<u64, u64>) {
        if deltas.is_empty() {
            return;
        }
        let mut table = self.table.lock();
        for (&id, &delta) in deltas {
            if delta > 0 {
                *table.entry(id).or_insert(0) += delta;
            }
        }
    }

    /// Remove a whole multiset of roots atomically.
    pub fn remove_many(&self, deltas: &HashMap<u64, u64>) {
        if deltas.is_empty() {
            return;
        }
        let mut table = self.table.lock();
        for (&id, &delta) in deltas {
            if delta > 0 {
                decref_locked(&mut table, id, delta);
            }
        }
    }

    /// Is `id` currently rooted?
    pub fn is_rooted(&self, id: u64) -> bool {
        self.table.lock().contains_key(&id)
    }

    /// Number of distinct rooted ids.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// True when no id is rooted.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

fn decref_locked(table: &mut HashMap<u64, u64>, id: u64, delta: u64) {
    match table.get_mut(&id) {
        Some(count) if *count > delta => *count -= delta,
        Some(count) => {
            if *count < delta {
                error!(id, count = *count, delta, "ephemeral root underflow");
            }
            table.remove(&id);
        }
        None => {
            error!(id, delta, "ephemeral root decref on absent id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incref_decref_balance() {
        let roots = EphemeralRoots::new();
        assert!(!roots.is_rooted(7));

        roots.incref(7, 2);
        assert!(roots.is_rooted(7));
        roots.decref(7, 1);
        assert!(roots.is_rooted(7));
        roots.decref(7, 1);
        assert!(!roots.is_rooted(7));
        assert!(roots.is_empty());
    }

    #[test]
    fn zero_delta_is_a_no_op() {
        let roots = EphemeralRoots::new();
        roots.incref(1, 0);
        assert!(!roots.is_rooted(1));
        roots.decref(1, 0);
    }

    #[test]
    fn underflow_saturates() {
        let roots = EphemeralRoots::new();
        roots.incref(3, 1);
        roots.decref(3, 10);
        assert!(!roots.is_rooted(3));
        // Decref on an absent id must not fault.
        roots.decref(99, 1);
    }

    #[test]
    fn multiset_add_remove() {
        let roots = EphemeralRoots::new();
        let deltas: HashMap<u64, u64> = [(1, 2), (2, 1)].into_iter().collect();

        roots.add_many(&deltas);
        assert!(roots.is_rooted(1));
        assert!(roots.is_rooted(2));
        assert_eq!(roots.len(), 2);

        let partial: HashMap<u64, u64> = [(1, 1)].into_iter().collect();
        roots.remove_many(&partial);
        assert!(roots.is_rooted(1), "one of two counts remains");

        roots.remove_many(&deltas);
        // id 1 underflows by the partial removal above but saturates.
        assert!(roots.is_empty());
    }
}
