//! The persistent ordered map.
//!
//! A [`Tree`] is a value: cloning it is cheap relative to its stowed
//! parts (remote subtrees are shared by hash), and every edit leaves
//! prior clones untouched. Insertions buffer into remote nodes without
//! loading them; removals are eager; [`Tree::compact`] flushes oversized
//! regions into stowed subtrees so the in-memory representation fits a
//! size budget.

use cairn_types::codec::{bytes_len, varnat_len};
use cairn_types::{DbError, Key, Result, validate_key};

use crate::cache::NodeCache;
use crate::node::{self, Node};
use crate::ser;
use crate::store::{Loader, NodeStore};
use crate::value::TrieValue;

/// A persistent ordered map from keys to values.
///
/// Keys follow the database limits (1 to 255 bytes). The tree itself
/// never talks to storage except through the `store` argument of the
/// operations that may load or stow subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<V = Vec<u8>> {
    root: Option<(Key, Node<V>)>,
}

impl<V: TrieValue> Default for Tree<V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<V: TrieValue> Tree<V> {
    /// The empty map.
    pub fn empty() -> Self {
        Self { root: None }
    }

    /// A map holding a single binding.
    pub fn singleton(key: Key, value: V) -> Result<Self> {
        validate_key(&key)?;
        Ok(Self {
            root: Some((key, Node::Leaf(value))),
        })
    }

    /// True when the map holds no binding.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Insert or replace a binding.
    ///
    /// Buffered: never loads a stowed subtree. Amortized O(1) in memory;
    /// the cost is paid later by [`Tree::compact`].
    pub fn add(&mut self, key: Key, value: V) -> Result<()> {
        validate_key(&key)?;
        match &mut self.root {
            None => self.root = Some((key, Node::Leaf(value))),
            Some((least, node)) => node::insert(node, least, key, value),
        }
        Ok(())
    }

    /// Look up a key. Loads a stowed subtree only when the crit-bit test
    /// says the key could plausibly be inside it.
    pub fn try_find<S: NodeStore>(
        &self,
        key: &[u8],
        store: &mut S,
        cache: &NodeCache<V>,
    ) -> Result<Option<V>> {
        validate_key(key)?;
        let Some((least, node)) = &self.root else {
            return Ok(None);
        };
        let mut loader = Loader { store, cache };
        node::find(node, least, key, &mut loader)
    }

    /// Whether a key is bound.
    pub fn contains_key<S: NodeStore>(
        &self,
        key: &[u8],
        store: &mut S,
        cache: &NodeCache<V>,
    ) -> Result<bool> {
        Ok(self.try_find(key, store, cache)?.is_some())
    }

    /// Look up a key that must be bound.
    pub fn find<S: NodeStore>(
        &self,
        key: &[u8],
        store: &mut S,
        cache: &NodeCache<V>,
    ) -> Result<V> {
        self.try_find(key, store, cache)?.ok_or(DbError::KeyNotFound)
    }

    /// Remove a binding, reporting whether it existed.
    ///
    /// Eager: remotes along the path are loaded, merged with their
    /// buffers, and rebuilt in memory.
    pub fn remove<S: NodeStore>(
        &mut self,
        key: &[u8],
        store: &mut S,
        cache: &NodeCache<V>,
    ) -> Result<bool> {
        validate_key(key)?;
        let Some((least, node)) = self.root.take() else {
            return Ok(false);
        };
        let mut loader = Loader { store, cache };
        let (rebuilt, removed) = node::remove(node, least, key, &mut loader)?;
        self.root = rebuilt;
        Ok(removed)
    }

    /// Flush oversized regions into stowed subtrees.
    ///
    /// Post-order: children are stowed before parents, so an oversized
    /// buffer merge sheds its own subtrees first. Idempotent up to the
    /// threshold: a second pass with the same threshold changes nothing.
    pub fn compact<S: NodeStore>(
        &mut self,
        store: &mut S,
        cache: &NodeCache<V>,
        threshold: usize,
    ) -> Result<()> {
        let Some((least, node)) = &mut self.root else {
            return Ok(());
        };
        let mut loader = Loader { store, cache };
        compact_node(node, least, &mut loader, threshold)?;
        Ok(())
    }

    /// Serialize the tree. Stowed subtrees are referenced by hash; the
    /// in-memory spine and buffers are inlined.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        ser::encode_tree(self.root.as_ref(), &mut out);
        out
    }

    /// Reconstruct a tree from [`Tree::serialize`] output.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            root: ser::decode_tree(bytes)?,
        })
    }
}

/// Compact one subtree; returns its serialized size estimate after
/// compaction.
fn compact_node<V: TrieValue, S: NodeStore>(
    node: &mut Node<V>,
    least: &Key,
    loader: &mut Loader<'_, S, V>,
    threshold: usize,
) -> Result<usize> {
    match node {
        Node::Leaf(_) => Ok(ser::node_size(node)),
        Node::Remote { cb, pending, target } => {
            let size = ser::remote_size(*cb, pending.as_ref());
            let buffered = pending.as_ref().is_some_and(|p| !p.updates.is_empty());
            if !buffered || size <= threshold {
                return Ok(size);
            }
            // Oversized buffer: merge into the loaded subtree and let the
            // branch below re-stow the result.
            let (merged_least, merged) = node::materialize(target, pending.take(), loader)?;
            debug_assert_eq!(&merged_least, least, "merge must preserve the contextual least");
            *node = merged;
            compact_node(node, least, loader, threshold)
        }
        Node::Inner { cb, left, key_right, right } => {
            let left_size = compact_node(left, least, loader, threshold)?;
            let right_size = compact_node(right, key_right, loader, threshold)?;
            let total = 1 + varnat_len(*cb) + left_size + bytes_len(key_right) + right_size;
            if total <= threshold {
                return Ok(total);
            }
            let cb = node.crit();
            let target = loader.stow(least, node)?;
            *node = Node::Remote { cb, pending: None, target };
            Ok(ser::remote_size::<V>(cb, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use cairn_types::Hash;

    use super::*;
    use crate::store::MemStore;

    /// Store wrapper that counts loads, to verify operations that must
    /// not touch stowed subtrees.
    struct CountingStore {
        inner: MemStore,
        loads: usize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self { inner: MemStore::new(), loads: 0 }
        }
    }

    impl NodeStore for CountingStore {
        fn stow_node(&mut self, bytes: &[u8]) -> Result<Hash> {
            self.inner.stow_node(bytes)
        }

        fn load_node(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
            self.loads += 1;
            self.inner.load_node(hash)
        }
    }

    fn key(i: u32) -> Key {
        format!("key-{i:05}").into_bytes()
    }

    fn val(i: u32) -> Vec<u8> {
        format!("value-{i}").into_bytes()
    }

    #[test]
    fn empty_and_singleton() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);

        let tree: Tree = Tree::empty();
        assert!(tree.is_empty());
        assert_eq!(tree.try_find(b"k", &mut store, &cache).unwrap(), None);

        let tree = Tree::singleton(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(!tree.is_empty());
        assert_eq!(
            tree.try_find(b"k", &mut store, &cache).unwrap(),
            Some(b"v".to_vec())
        );
        assert!(tree.find(b"absent", &mut store, &cache).is_err());
    }

    #[test]
    fn add_then_find_small() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..64 {
            tree.add(key(i), val(i)).unwrap();
        }
        for i in 0..64 {
            assert_eq!(
                tree.try_find(&key(i), &mut store, &cache).unwrap(),
                Some(val(i)),
                "key {i}"
            );
        }
        assert_eq!(tree.try_find(&key(64), &mut store, &cache).unwrap(), None);
    }

    #[test]
    fn add_replaces_existing_binding() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        tree.add(b"k".to_vec(), b"first".to_vec()).unwrap();
        tree.add(b"k".to_vec(), b"second".to_vec()).unwrap();
        assert_eq!(
            tree.try_find(b"k", &mut store, &cache).unwrap(),
            Some(b"second".to_vec())
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);

        let mut forward: Tree = Tree::empty();
        for i in 0..32 {
            forward.add(key(i), val(i)).unwrap();
        }
        let mut backward: Tree = Tree::empty();
        for i in (0..32).rev() {
            backward.add(key(i), val(i)).unwrap();
        }

        // The crit-bit trie is canonical for a key set.
        assert_eq!(forward.serialize(), backward.serialize());
        for i in 0..32 {
            assert_eq!(
                backward.try_find(&key(i), &mut store, &cache).unwrap(),
                Some(val(i))
            );
        }
    }

    #[test]
    fn prefix_keys_coexist() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        tree.add(b"a".to_vec(), b"1".to_vec()).unwrap();
        tree.add(b"ab".to_vec(), b"2".to_vec()).unwrap();
        tree.add(b"abc".to_vec(), b"3".to_vec()).unwrap();

        assert_eq!(tree.try_find(b"a", &mut store, &cache).unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.try_find(b"ab", &mut store, &cache).unwrap(), Some(b"2".to_vec()));
        assert_eq!(tree.try_find(b"abc", &mut store, &cache).unwrap(), Some(b"3".to_vec()));
        assert_eq!(tree.try_find(b"abcd", &mut store, &cache).unwrap(), None);
    }

    #[test]
    fn remove_restores_other_bindings() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..16 {
            tree.add(key(i), val(i)).unwrap();
        }
        assert!(tree.remove(&key(7), &mut store, &cache).unwrap());
        assert!(!tree.remove(&key(7), &mut store, &cache).unwrap());

        assert_eq!(tree.try_find(&key(7), &mut store, &cache).unwrap(), None);
        for i in (0..16).filter(|&i| i != 7) {
            assert_eq!(
                tree.try_find(&key(i), &mut store, &cache).unwrap(),
                Some(val(i)),
                "key {i} survives"
            );
        }
    }

    #[test]
    fn remove_down_to_empty() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..8 {
            tree.add(key(i), val(i)).unwrap();
        }
        for i in 0..8 {
            assert!(tree.remove(&key(i), &mut store, &cache).unwrap());
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn compact_stows_and_lookups_still_work() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..256 {
            tree.add(key(i), val(i)).unwrap();
        }
        tree.compact(&mut store, &cache, 512).unwrap();
        assert!(!store.is_empty(), "compaction stowed subtrees");

        for i in 0..256 {
            assert_eq!(
                tree.try_find(&key(i), &mut store, &cache).unwrap(),
                Some(val(i)),
                "key {i} after compaction"
            );
        }
    }

    #[test]
    fn compact_is_idempotent() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..256 {
            tree.add(key(i), val(i)).unwrap();
        }
        tree.compact(&mut store, &cache, 512).unwrap();
        let once = tree.serialize();
        tree.compact(&mut store, &cache, 512).unwrap();
        assert_eq!(tree.serialize(), once);
    }

    #[test]
    fn add_after_compact_does_not_load() {
        let mut store = CountingStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..256 {
            tree.add(key(i), val(i)).unwrap();
        }
        tree.compact(&mut store, &cache, 512).unwrap();
        store.loads = 0;

        for i in 256..320 {
            tree.add(key(i), val(i)).unwrap();
        }
        assert_eq!(store.loads, 0, "buffered insertion never loads");

        // Buffered keys are visible before any flush.
        let fresh_cache = NodeCache::new(1 << 20);
        for i in 256..320 {
            assert_eq!(
                tree.try_find(&key(i), &mut store, &fresh_cache).unwrap(),
                Some(val(i))
            );
        }
    }

    #[test]
    fn find_prunes_foreign_subtrees() {
        let mut store = CountingStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        // All keys share the "key-" prefix; compact stows the subtree.
        for i in 0..256 {
            tree.add(key(i), val(i)).unwrap();
        }
        tree.compact(&mut store, &cache, 512).unwrap();
        assert!(!store.inner.is_empty(), "compaction stowed subtrees");

        // A key diverging from the least key above every remote crit-bit
        // cannot be in any stowed subtree.
        store.loads = 0;
        let fresh_cache = NodeCache::new(1 << 20);
        assert_eq!(
            tree.try_find(b"zzz", &mut store, &fresh_cache).unwrap(),
            None
        );
        assert_eq!(store.loads, 0, "crit-bit test short-circuits the load");
    }

    #[test]
    fn serialize_round_trips_with_remotes() {
        let mut store = MemStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..128 {
            tree.add(key(i), val(i)).unwrap();
        }
        tree.compact(&mut store, &cache, 256).unwrap();
        // Leave some buffered updates in place too.
        for i in 128..140 {
            tree.add(key(i), val(i)).unwrap();
        }

        let bytes = tree.serialize();
        let restored: Tree = Tree::deserialize(&bytes).unwrap();
        assert_eq!(restored, tree);

        for i in 0..140 {
            assert_eq!(
                restored.try_find(&key(i), &mut store, &cache).unwrap(),
                Some(val(i)),
                "key {i} after round trip"
            );
        }
    }

    #[test]
    fn removed_key_requires_remote_loads() {
        let mut store = CountingStore::new();
        let cache = NodeCache::new(1 << 20);
        let mut tree: Tree = Tree::empty();

        for i in 0..256 {
            tree.add(key(i), val(i)).unwrap();
        }
        tree.compact(&mut store, &cache, 512).unwrap();

        let fresh_cache = NodeCache::new(1 << 20);
        store.loads = 0;
        assert!(tree.remove(&key(100), &mut store, &fresh_cache).unwrap());
        assert!(store.loads > 0, "eager removal loads the remote path");
        assert_eq!(
            tree.try_find(&key(100), &mut store, &fresh_cache).unwrap(),
            None
        );
        assert_eq!(
            tree.try_find(&key(101), &mut store, &fresh_cache).unwrap(),
            Some(val(101))
        );
    }

    #[test]
    fn rejects_invalid_keys() {
        let mut tree: Tree = Tree::empty();
        assert!(tree.add(Vec::new(), b"v".to_vec()).is_err());
        assert!(tree.add(vec![b'x'; 256], b"v".to_vec()).is_err());
    }
}
