//! Core types for the cairn stowage database.
//!
//! This crate provides the foundations shared by every layer:
//! - [`Hash`]: the 320-bit content address and its base-32 alphabet
//! - Conservative hash-dependency scanning over opaque value bytes
//! - Self-delimiting serialization primitives (VarNat, ByteString, HashLit)
//! - Key/value validation limits
//! - The unified error taxonomy using snafu

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod hash;
pub mod limits;
pub mod scan;

pub use codec::CodecError;
pub use error::{DbError, Result};
pub use hash::{ALPHABET, HASH_LEN, Hash, RAW_HASH_LEN, is_hash_byte};
pub use limits::{Key, MAX_KEY_LEN, MAX_VALUE_LEN, Value, validate_key, validate_value};
pub use scan::{HashDeps, fold_hash_deps, iter_hash_deps};
