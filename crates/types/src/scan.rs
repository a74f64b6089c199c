//! Conservative hash-dependency scanning.
//!
//! A value is opaque to the store, but any maximal run of hash-alphabet
//! bytes whose length is exactly [`HASH_LEN`] is treated as an outgoing
//! resource reference. The scan is purely lexical: it never decodes the
//! value, runs in one left-to-right pass, and may over-approximate (a
//! value that merely spells out 64 consonants pins a resource), which is
//! safe for garbage collection.

use crate::hash::{HASH_LEN, Hash, is_hash_byte};

/// Iterator over the hash dependencies of a value.
///
/// Yields one [`Hash`] per maximal alphabet run of exactly [`HASH_LEN`]
/// bytes. Runs of any other length are skipped whole.
pub struct HashDeps<'a> {
    value: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for HashDeps<'a> {
    type Item = Hash;

    fn next(&mut self) -> Option<Hash> {
        while self.pos < self.value.len() {
            if !is_hash_byte(self.value[self.pos]) {
                self.pos += 1;
                continue;
            }
            let start = self.pos;
            let mut end = start;
            while end < self.value.len() && is_hash_byte(self.value[end]) {
                end += 1;
            }
            self.pos = end;
            if end - start == HASH_LEN {
                return Hash::from_bytes(&self.value[start..end]);
            }
        }
        None
    }
}

/// Iterate the hash dependencies embedded in `value`.
pub fn iter_hash_deps(value: &[u8]) -> HashDeps<'_> {
    HashDeps { value, pos: 0 }
}

/// Fold over the hash dependencies embedded in `value`.
pub fn fold_hash_deps<A, F>(value: &[u8], seed: A, mut f: F) -> A
where
    F: FnMut(A, Hash) -> A,
{
    let mut acc = seed;
    for dep in iter_hash_deps(value) {
        acc = f(acc, dep);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_has_no_deps() {
        assert_eq!(iter_hash_deps(b"").count(), 0);
        assert_eq!(iter_hash_deps(b"no consonant runs here!").count(), 0);
    }

    #[test]
    fn finds_embedded_hash() {
        let h = Hash::digest(b"payload");
        let mut value = b"prefix ".to_vec();
        value.extend_from_slice(h.as_bytes());
        value.extend_from_slice(b" suffix");

        let deps: Vec<Hash> = iter_hash_deps(&value).collect();
        assert_eq!(deps, vec![h]);
    }

    #[test]
    fn hash_at_value_boundaries() {
        let h = Hash::digest(b"edge");
        let deps: Vec<Hash> = iter_hash_deps(h.as_bytes()).collect();
        assert_eq!(deps, vec![h]);

        let mut tail = b"lead ".to_vec();
        tail.extend_from_slice(h.as_bytes());
        assert_eq!(iter_hash_deps(&tail).count(), 1);
    }

    #[test]
    fn non_maximal_runs_are_skipped() {
        let h = Hash::digest(b"run");

        // One byte short.
        let mut short = h.as_bytes()[..HASH_LEN - 1].to_vec();
        short.push(b' ');
        assert_eq!(iter_hash_deps(&short).count(), 0);

        // One byte long: the run is 65 bytes and skipped whole.
        let mut long = h.as_bytes().to_vec();
        long.push(b'b');
        assert_eq!(iter_hash_deps(&long).count(), 0);
    }

    #[test]
    fn adjacent_hashes_need_a_separator() {
        let h1 = Hash::digest(b"one");
        let h2 = Hash::digest(b"two");

        let mut fused = h1.as_bytes().to_vec();
        fused.extend_from_slice(h2.as_bytes());
        // 128-byte run: no dependency found.
        assert_eq!(iter_hash_deps(&fused).count(), 0);

        let mut separated = h1.as_bytes().to_vec();
        separated.push(b' ');
        separated.extend_from_slice(h2.as_bytes());
        let deps: Vec<Hash> = iter_hash_deps(&separated).collect();
        assert_eq!(deps, vec![h1, h2]);
    }

    #[test]
    fn fold_accumulates_in_order() {
        let h1 = Hash::digest(b"a");
        let h2 = Hash::digest(b"b");
        let mut value = Vec::new();
        value.extend_from_slice(h1.as_bytes());
        value.push(b'\n');
        value.extend_from_slice(h2.as_bytes());

        let collected = fold_hash_deps(&value, Vec::new(), |mut acc, h| {
            acc.push(h);
            acc
        });
        assert_eq!(collected, vec![h1, h2]);
    }
}
