//! Byte-budgeted cache of decoded stowed nodes.
//!
//! Loading a remote subtree costs a resource fetch plus a decode; the
//! cache keeps recently loaded subtrees alive so repeated descents stay
//! in memory. Eviction is FIFO within the byte budget.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use cairn_types::{Hash, Key};

use crate::node::Node;

/// A decoded stowed subtree.
pub(crate) struct StowedNode<V> {
    /// The subtree's own least key.
    pub least: Key,
    pub node: Node<V>,
    /// Serialized size, charged against the budget.
    pub bytes: usize,
}

/// Cache of decoded stowed nodes, keyed by content hash.
///
/// Content addressing makes entries immutable: there is no invalidation,
/// only eviction. Safe to share across trees over the same database.
pub struct NodeCache<V> {
    inner: Mutex<CacheInner<V>>,
    budget: usize,
}

struct CacheInner<V> {
    map: HashMap<Hash, Arc<StowedNode<V>>>,
    order: VecDeque<Hash>,
    bytes: usize,
}

impl<V> NodeCache<V> {
    /// Create a cache holding at most `budget` serialized bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                bytes: 0,
            }),
            budget,
        }
    }

    pub(crate) fn get(&self, hash: &Hash) -> Option<Arc<StowedNode<V>>> {
        self.inner.lock().map.get(hash).cloned()
    }

    pub(crate) fn insert(&self, hash: Hash, node: Arc<StowedNode<V>>) {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&hash) {
            return;
        }
        inner.bytes += node.bytes;
        inner.map.insert(hash, node);
        inner.order.push_back(hash);
        while inner.bytes > self.budget && inner.order.len() > 1 {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.map.remove(&oldest) {
                inner.bytes -= evicted.bytes;
                trace!(hash = %oldest, "evicted cached node");
            }
        }
    }

    /// Number of cached subtrees.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}
