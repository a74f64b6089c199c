//! Storage access for stowed subtrees.
//!
//! The tree is agnostic about where stowed nodes live: anything that can
//! stow bytes and load them back by hash works. The production
//! implementation is [`cairn_db::Transaction`], which charges ephemeral
//! roots for stowed nodes to the surrounding transaction; [`MemStore`]
//! is a hash map for tests and embedding.

use std::collections::HashMap;
use std::sync::Arc;

use cairn_types::{DbError, Hash, Result};

use crate::cache::{NodeCache, StowedNode};
use crate::ser;
use crate::value::TrieValue;

/// Backing storage for stowed subtrees.
pub trait NodeStore {
    /// Stow serialized node bytes, returning their content hash.
    fn stow_node(&mut self, bytes: &[u8]) -> Result<Hash>;

    /// Load stowed node bytes, or `None` when absent.
    fn load_node(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>>;
}

impl NodeStore for cairn_db::Transaction {
    fn stow_node(&mut self, bytes: &[u8]) -> Result<Hash> {
        self.stow(bytes)
    }

    fn load_node(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.try_load(hash)
    }
}

/// In-memory node store for tests and embedding.
#[derive(Default)]
pub struct MemStore {
    map: HashMap<Hash, Vec<u8>>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stowed nodes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is stowed.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl NodeStore for MemStore {
    fn stow_node(&mut self, bytes: &[u8]) -> Result<Hash> {
        let hash = Hash::digest(bytes);
        self.map.entry(hash).or_insert_with(|| bytes.to_vec());
        Ok(hash)
    }

    fn load_node(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(hash).cloned())
    }
}

/// Store plus cache, bundled for a descent.
pub(crate) struct Loader<'a, S, V> {
    pub store: &'a mut S,
    pub cache: &'a NodeCache<V>,
}

impl<S: NodeStore, V: TrieValue> Loader<'_, S, V> {
    /// Fetch and decode a stowed subtree, consulting the cache first.
    pub(crate) fn load(&mut self, hash: &Hash) -> Result<Arc<StowedNode<V>>> {
        if let Some(cached) = self.cache.get(hash) {
            return Ok(cached);
        }
        let bytes = self
            .store
            .load_node(hash)?
            .ok_or(DbError::MissingResource { hash: *hash })?;
        let (least, node) = ser::decode_stowed(&bytes)?;
        let stowed = Arc::new(StowedNode {
            least,
            node,
            bytes: bytes.len(),
        });
        self.cache.insert(*hash, Arc::clone(&stowed));
        Ok(stowed)
    }

    /// Stow a subtree and prime the cache with its decoded form.
    pub(crate) fn stow(
        &mut self,
        least: &[u8],
        node: &crate::node::Node<V>,
    ) -> Result<Hash> {
        let mut bytes = Vec::new();
        ser::encode_stowed(least, node, &mut bytes);
        let hash = self.store.stow_node(&bytes)?;
        self.cache.insert(
            hash,
            Arc::new(StowedNode {
                least: least.to_vec(),
                node: node.clone(),
                bytes: bytes.len(),
            }),
        );
        Ok(hash)
    }
}
