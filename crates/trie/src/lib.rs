//! cairn-trie: a persistent crit-bit LSM tree over the cairn database.
//!
//! An ordered map for larger-than-memory data: the in-memory spine of
//! the tree buffers insertions, while cold regions live as stowed
//! resources referenced by hash. Lookups load a stowed subtree only when
//! the crit-bit test says the key could be inside; compaction flushes
//! oversized buffers into fresh stowed nodes.
//!
//! Trees serialize with the self-delimiting cairn codec; stowed-subtree
//! references appear as `{hash}` literals, so a tree written into a
//! database value roots its whole structure against garbage collection.
//!
//! ```no_run
//! use cairn_db::{Database, DbConfig};
//! use cairn_trie::{NodeCache, Tree};
//!
//! let db = Database::open("/var/lib/cairn", DbConfig::default())?;
//! let cache = NodeCache::new(db.config().cache_bytes);
//!
//! let mut tx = db.begin();
//! let mut tree: Tree = Tree::empty();
//! tree.add(b"greeting".to_vec(), b"hello".to_vec())?;
//! tree.compact(&mut tx, &cache, 4096)?;
//! tx.write_key(b"index".to_vec(), tree.serialize())?;
//! assert!(tx.commit()?.wait()?);
//! # Ok::<(), cairn_types::DbError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod node;
mod ser;
mod store;
mod tree;
mod value;

pub use cache::NodeCache;
pub use store::{MemStore, NodeStore};
pub use tree::Tree;
pub use value::TrieValue;
