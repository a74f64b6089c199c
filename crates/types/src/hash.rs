//! Content hashes and the hash-byte alphabet.
//!
//! A resource hash is the first 320 bits of SHA-512 over the content,
//! rendered as 64 characters of a 32-consonant base-32 alphabet. The
//! alphabet deliberately avoids braces, whitespace, control characters,
//! and the usual base-64 punctuation, so that any maximal run of alphabet
//! bytes inside an opaque value is unambiguously delimited by its
//! neighbors. That property is what makes the conservative dependency
//! scan in [`crate::scan`] sound.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha512};

/// Length of an encoded hash in bytes (base-32 characters).
pub const HASH_LEN: usize = 64;

/// Length of the raw digest in bytes (320 bits).
pub const RAW_HASH_LEN: usize = 40;

/// The base-32 alphabet: consonants only, disjoint from `{`, `}`,
/// whitespace, control characters, and `- _ + / =`.
pub const ALPHABET: &[u8; 32] = b"bcdfghjklmnpqrstBCDFGHJKLMNPQRST";

/// Membership table for the hash alphabet.
static HASH_BYTE: [bool; 256] = build_table();

const fn build_table() -> [bool; 256] {
    let mut table = [false; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = true;
        i += 1;
    }
    table
}

/// Returns true if `b` is a byte of the hash alphabet.
#[inline]
pub fn is_hash_byte(b: u8) -> bool {
    HASH_BYTE[b as usize]
}

/// A content address: 320-bit digest in its encoded (alphabet) form.
///
/// The encoded form is the canonical representation. It is what appears
/// embedded in values, what keys the resource table, and what the
/// dependency scanner recognizes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Compute the hash of arbitrary content.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(data);
        let full = hasher.finalize();
        let mut raw = [0u8; RAW_HASH_LEN];
        raw.copy_from_slice(&full[..RAW_HASH_LEN]);
        Self(encode_base32(&raw))
    }

    /// Interpret a 64-byte slice as an encoded hash.
    ///
    /// Returns `None` unless the slice has exactly [`HASH_LEN`] bytes,
    /// all in the alphabet.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_LEN || !bytes.iter().all(|&b| is_hash_byte(b)) {
            return None;
        }
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    /// The encoded bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// The encoded form as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        // The alphabet is pure ASCII.
        std::str::from_utf8(&self.0).expect("hash alphabet is ASCII")
    }

    /// The ephemeron id: first eight encoded bytes, big-endian.
    ///
    /// Used as the key of the in-process root table. Distinct hashes may
    /// collide on their id; the root table over-approximates liveness, so
    /// collisions only delay reclamation.
    #[inline]
    pub fn ephemeron_id(&self) -> u64 {
        u64::from_be_bytes(self.0[..8].try_into().expect("hash has 64 bytes"))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.as_str())
    }
}

impl FromStr for Hash {
    type Err = crate::error::DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes()).ok_or(crate::error::DbError::MalformedHash)
    }
}

/// Encode 40 raw bytes as 64 alphabet characters, five bits per character,
/// most significant bits first.
fn encode_base32(raw: &[u8; RAW_HASH_LEN]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    for (i, chunk) in raw.chunks_exact(5).enumerate() {
        let mut acc: u64 = 0;
        for &b in chunk {
            acc = (acc << 8) | u64::from(b);
        }
        for j in 0..8 {
            let index = ((acc >> (35 - 5 * j)) & 0x1f) as usize;
            out[i * 8 + j] = ALPHABET[index];
        }
    }
    out
}
