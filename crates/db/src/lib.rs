//! cairn-db: a content-addressed stowage database.
//!
//! A mutable key/value layer over redb, married to an immutable
//! content-addressed resource layer, a batched single-writer committer,
//! and a conservative background garbage collector:
//!
//! - Keys map to opaque values; an empty value means unbound.
//! - Values may embed resource hashes; embedded hashes root the
//!   referenced resources for GC purposes (recognized lexically).
//! - [`Transaction`] gives optimistic compare-and-swap over keys plus
//!   `stow` for moving large content behind a hash.
//! - One committer thread owns all writes, coalescing concurrent
//!   proposals into durable batches (amortized fsync).
//! - The GC traces on-disk and ephemeral roots and reclaims unreferenced
//!   resources through the committer's write path.
//!
//! ## Quick start
//!
//! ```no_run
//! use cairn_db::{Database, DbConfig};
//!
//! let db = Database::open("/var/lib/cairn", DbConfig::default())?;
//!
//! let mut tx = db.begin();
//! let hash = tx.stow(b"a large binary")?;
//! tx.write_key(b"entry".to_vec(), format!("see {hash}").into_bytes())?;
//! assert!(tx.commit()?.wait()?);
//!
//! assert_eq!(db.load(&hash)?, b"a large binary");
//! # Ok::<(), cairn_types::DbError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod committer;
mod config;
mod db;
mod eph;
mod gc;
mod lock;
mod tables;
mod transaction;

pub use committer::Commit;
pub use config::DbConfig;
pub use db::{Database, DbStats};
pub use eph::EphemeralRoots;
pub use gc::GcStats;
pub use lock::DirLock;
pub use transaction::Transaction;

pub use cairn_types::{DbError, Hash, Key, Result, Value};
