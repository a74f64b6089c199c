//! Crit-bit nodes and the core tree algorithms.
//!
//! # Bit addressing
//!
//! Keys are compared as bit strings with nine positions per byte: one
//! presence bit (always 1) followed by the eight data bits, most
//! significant first. Positions past the end of a key read as 0. The
//! presence bit makes a strict prefix differ from its extensions (at the
//! extension's next presence bit), and orders it first, so bit-string
//! order coincides with lexicographic byte order.
//!
//! # Structure
//!
//! Every subtree is interpreted relative to its *least key*, carried by
//! the enclosing context (the tree root or the parent's `key_right`).
//! All keys in a subtree agree on the bits below the subtree's
//! discriminating crit-bit; the left branch carries 0 at that bit, the
//! right branch 1. A [`Node::Remote`] stands for a stowed subtree plus a
//! buffer of pending insertions applied when the subtree is loaded.

use std::collections::BTreeMap;

use cairn_types::{Hash, Key, Result};

use crate::store::{Loader, NodeStore};
use crate::value::TrieValue;

/// Crit-bit sentinel for a stowed subtree holding a single key: there is
/// no bit at which its keys discriminate.
pub(crate) const CB_LEAF: u64 = u64::MAX;

/// A tree node, relative to a contextual least key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node<V> {
    /// The subtree holds exactly the least key, bound to this value.
    Leaf(V),
    /// A crit-bit branch: `left` carries 0 at `cb`, `right` carries 1,
    /// and `key_right` is the least key of `right`.
    Inner {
        cb: u64,
        left: Box<Node<V>>,
        key_right: Key,
        right: Box<Node<V>>,
    },
    /// A stowed subtree behind `target`, with pending insertions.
    ///
    /// `cb` is the crit-bit at which the stowed subtree's keys begin to
    /// discriminate ([`CB_LEAF`] when it holds a single key); it lets
    /// lookups rule the subtree out without loading it.
    Remote {
        cb: u64,
        pending: Option<Pending<V>>,
        target: Hash,
    },
}

/// Buffered insertions for a stowed subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pending<V> {
    /// Keys to merge into the subtree on load. Shadow stowed bindings.
    pub updates: BTreeMap<Key, V>,
    /// Least key of the stowed subtree itself, which the buffer may
    /// undercut; kept so a load knows the subtree's own context.
    pub stowed_least: Key,
}

impl<V> Node<V> {
    /// The discriminating crit-bit this node presents to its parent.
    pub(crate) fn crit(&self) -> u64 {
        match self {
            Node::Leaf(_) => CB_LEAF,
            Node::Inner { cb, .. } => *cb,
            Node::Remote { cb, .. } => *cb,
        }
    }
}

/// Bit of `key` at position `index` under nine-bits-per-byte addressing.
#[inline]
pub(crate) fn bit_at(key: &[u8], index: u64) -> bool {
    let byte = (index / 9) as usize;
    if byte >= key.len() {
        return false;
    }
    let within = (index % 9) as u32;
    if within == 0 {
        true
    } else {
        (key[byte] >> (8 - within)) & 1 == 1
    }
}

/// Position of the first bit at which two keys differ, or `None` when
/// they are equal.
pub(crate) fn critbit(a: &[u8], b: &[u8]) -> Option<u64> {
    let shared = a
        .iter()
        .zip(b.iter())
        .position(|(x, y)| x != y);
    match shared {
        Some(i) => {
            let diff = a[i] ^ b[i];
            Some(i as u64 * 9 + 1 + u64::from(diff.leading_zeros() as u8))
        }
        None if a.len() == b.len() => None,
        // One key is a strict prefix: they part at the next presence bit.
        None => Some(a.len().min(b.len()) as u64 * 9),
    }
}

// ----------------------------------------------------------------------
// Insertion (buffered: never loads a remote)
// ----------------------------------------------------------------------

/// Insert `key = value` into the subtree, updating the contextual least
/// key in place when the new key undercuts it.
pub(crate) fn insert<V: TrieValue>(node: &mut Node<V>, least: &mut Key, key: Key, value: V) {
    match critbit(&key, least) {
        None => put_least(node, least, key, value),
        Some(c) => insert_at(node, least, key, value, c),
    }
}

/// Replace the value bound to the contextual least key.
fn put_least<V: TrieValue>(node: &mut Node<V>, least: &Key, key: Key, value: V) {
    match node {
        Node::Leaf(slot) => *slot = value,
        Node::Inner { left, .. } => put_least(left, least, key, value),
        Node::Remote { pending, .. } => {
            buffer(pending, least, key, value);
        }
    }
}

/// Insert a key that first differs from the contextual least at bit `c`.
fn insert_at<V: TrieValue>(node: &mut Node<V>, least: &mut Key, key: Key, value: V, c: u64) {
    match node {
        Node::Leaf(_) => splice(node, least, key, value, c),
        Node::Inner { cb, left, key_right, right } => {
            if c < *cb {
                splice(node, least, key, value, c);
            } else if c == *cb {
                // The new key carries 1 at cb: it belongs on the right.
                insert(right, key_right, key, value);
            } else {
                insert_at(left, least, key, value, c);
            }
        }
        Node::Remote { cb, pending, .. } => {
            if c < *cb {
                splice(node, least, key, value, c);
            } else {
                let undercuts = !bit_at(&key, c);
                buffer(pending, least, key.clone(), value);
                if undercuts {
                    *least = key;
                }
            }
        }
    }
}

/// Wrap `node` in a new branch discriminating at `c` against the new key.
fn splice<V: TrieValue>(node: &mut Node<V>, least: &mut Key, key: Key, value: V, c: u64) {
    let old = std::mem::replace(node, Node::Leaf(value.clone()));
    if bit_at(&key, c) {
        // New key is greater: old subtree stays left.
        *node = Node::Inner {
            cb: c,
            left: Box::new(old),
            key_right: key,
            right: Box::new(Node::Leaf(value)),
        };
    } else {
        // New key becomes the subtree's least.
        let old_least = std::mem::replace(least, key);
        *node = Node::Inner {
            cb: c,
            left: Box::new(Node::Leaf(value)),
            key_right: old_least,
            right: Box::new(old),
        };
    }
}

fn buffer<V: TrieValue>(pending: &mut Option<Pending<V>>, least: &Key, key: Key, value: V) {
    pending
        .get_or_insert_with(|| Pending {
            updates: BTreeMap::new(),
            stowed_least: least.clone(),
        })
        .updates
        .insert(key, value);
}

// ----------------------------------------------------------------------
// Lookup
// ----------------------------------------------------------------------

/// Find `key` in the subtree whose contextual least key is `least`.
pub(crate) fn find<V: TrieValue, S: NodeStore>(
    node: &Node<V>,
    least: &[u8],
    key: &[u8],
    loader: &mut Loader<'_, S, V>,
) -> Result<Option<V>> {
    match critbit(key, least) {
        None => find_least(node, key, loader),
        Some(c) => find_at(node, least, key, c, loader),
    }
}

/// Find when the search key equals the contextual least key.
fn find_least<V: TrieValue, S: NodeStore>(
    node: &Node<V>,
    key: &[u8],
    loader: &mut Loader<'_, S, V>,
) -> Result<Option<V>> {
    match node {
        Node::Leaf(value) => Ok(Some(value.clone())),
        Node::Inner { left, .. } => find_least(left, key, loader),
        Node::Remote { pending, target, .. } => {
            if let Some(p) = pending
                && let Some(value) = p.updates.get(key)
            {
                return Ok(Some(value.clone()));
            }
            let stowed = loader.load(target)?;
            find(&stowed.node, &stowed.least, key, loader)
        }
    }
}

/// Find when the search key first differs from the least at bit `c`.
fn find_at<V: TrieValue, S: NodeStore>(
    node: &Node<V>,
    least: &[u8],
    key: &[u8],
    c: u64,
    loader: &mut Loader<'_, S, V>,
) -> Result<Option<V>> {
    match node {
        Node::Leaf(_) => Ok(None),
        Node::Inner { cb, left, key_right, right } => {
            if c < *cb {
                Ok(None)
            } else if c == *cb {
                find(right, key_right, key, loader)
            } else {
                find_at(left, least, key, c, loader)
            }
        }
        Node::Remote { cb, pending, target } => {
            if let Some(p) = pending
                && let Some(value) = p.updates.get(key)
            {
                return Ok(Some(value.clone()));
            }
            // Test against the stowed subtree's own least key; only load
            // when the key could plausibly be inside.
            let stowed_least: &[u8] = pending
                .as_ref()
                .map_or(least, |p| p.stowed_least.as_slice());
            match critbit(key, stowed_least) {
                Some(c2) if c2 < *cb => Ok(None),
                _ => {
                    let stowed = loader.load(target)?;
                    find(&stowed.node, &stowed.least, key, loader)
                }
            }
        }
    }
}

// ----------------------------------------------------------------------
// Removal (eager: loads and merges remotes on the way down)
// ----------------------------------------------------------------------

/// Remove `key` from an owned subtree. Returns the rebuilt subtree (or
/// `None` when it became empty) and whether a binding was removed.
pub(crate) fn remove<V: TrieValue, S: NodeStore>(
    node: Node<V>,
    least: Key,
    key: &[u8],
    loader: &mut Loader<'_, S, V>,
) -> Result<(Option<(Key, Node<V>)>, bool)> {
    match critbit(key, &least) {
        None => remove_least(node, least, key, loader),
        Some(c) => remove_at(node, least, key, c, loader),
    }
}

fn remove_least<V: TrieValue, S: NodeStore>(
    node: Node<V>,
    least: Key,
    key: &[u8],
    loader: &mut Loader<'_, S, V>,
) -> Result<(Option<(Key, Node<V>)>, bool)> {
    match node {
        Node::Leaf(_) => Ok((None, true)),
        Node::Inner { cb, left, key_right, right } => {
            let (rebuilt, removed) = remove_least(*left, least, key, loader)?;
            match rebuilt {
                None => Ok((Some((key_right, *right)), removed)),
                Some((new_least, new_left)) => Ok((
                    Some((
                        new_least,
                        Node::Inner { cb, left: Box::new(new_left), key_right, right },
                    )),
                    removed,
                )),
            }
        }
        Node::Remote { pending, target, .. } => {
            let (m_least, m_node) = materialize(&target, pending, loader)?;
            remove(m_node, m_least, key, loader)
        }
    }
}

fn remove_at<V: TrieValue, S: NodeStore>(
    node: Node<V>,
    least: Key,
    key: &[u8],
    c: u64,
    loader: &mut Loader<'_, S, V>,
) -> Result<(Option<(Key, Node<V>)>, bool)> {
    match node {
        Node::Leaf(_) => Ok((Some((least, node)), false)),
        Node::Inner { cb, left, key_right, right } => {
            if c < cb {
                let node = Node::Inner { cb, left, key_right, right };
                Ok((Some((least, node)), false))
            } else if c == cb {
                let (rebuilt, removed) = remove(*right, key_right, key, loader)?;
                match rebuilt {
                    None => Ok((Some((least, *left)), removed)),
                    Some((new_right_least, new_right)) => Ok((
                        Some((
                            least,
                            Node::Inner {
                                cb,
                                left,
                                key_right: new_right_least,
                                right: Box::new(new_right),
                            },
                        )),
                        removed,
                    )),
                }
            } else {
                let (rebuilt, removed) = remove_at(*left, least, key, c, loader)?;
                match rebuilt {
                    None => Ok((Some((key_right, *right)), removed)),
                    Some((new_least, new_left)) => Ok((
                        Some((
                            new_least,
                            Node::Inner { cb, left: Box::new(new_left), key_right, right },
                        )),
                        removed,
                    )),
                }
            }
        }
        Node::Remote { cb, pending, target } => {
            if c < cb {
                let node = Node::Remote { cb, pending, target };
                Ok((Some((least, node)), false))
            } else {
                let (m_least, m_node) = materialize(&target, pending, loader)?;
                debug_assert_eq!(m_least, least, "materialized least must match context");
                remove(m_node, m_least, key, loader)
            }
        }
    }
}

/// Load a stowed subtree and merge its pending updates, yielding the
/// in-memory equivalent of the remote.
pub(crate) fn materialize<V: TrieValue, S: NodeStore>(
    target: &Hash,
    pending: Option<Pending<V>>,
    loader: &mut Loader<'_, S, V>,
) -> Result<(Key, Node<V>)> {
    let stowed = loader.load(target)?;
    let mut least = stowed.least.clone();
    let mut node = stowed.node.clone();
    if let Some(p) = pending {
        debug_assert_eq!(p.stowed_least, stowed.least, "buffer recorded a different subtree");
        for (key, value) in p.updates {
            insert(&mut node, &mut least, key, value);
        }
    }
    Ok((least, node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_addressing() {
        // Presence bit of byte 0.
        assert!(bit_at(b"a", 0));
        // 'a' = 0b0110_0001: data bits at positions 1..=8.
        assert!(!bit_at(b"a", 1));
        assert!(bit_at(b"a", 2));
        assert!(bit_at(b"a", 3));
        assert!(bit_at(b"a", 8));
        // Past the end: zero.
        assert!(!bit_at(b"a", 9));
        assert!(!bit_at(b"a", 100));
    }

    #[test]
    fn critbit_of_equal_keys_is_none() {
        assert_eq!(critbit(b"same", b"same"), None);
        assert_eq!(critbit(b"", b""), None);
    }

    #[test]
    fn critbit_prefix_parts_at_presence_bit() {
        assert_eq!(critbit(b"ab", b"abc"), Some(18));
        assert_eq!(critbit(b"abc", b"ab"), Some(18));
        assert_eq!(critbit(b"", b"x"), Some(0));
    }

    #[test]
    fn critbit_orders_like_bytes() {
        // For any a < b, the bit at the crit position is 0 in a, 1 in b.
        let pairs: &[(&[u8], &[u8])] = &[
            (b"abc", b"abd"),
            (b"a", b"b"),
            (b"ab", b"abc"),
            (b"\x00", b"\x01"),
            (b"key-1", b"key-2"),
        ];
        for (a, b) in pairs {
            assert!(a < b, "test data must be ordered");
            let c = critbit(a, b).expect("distinct keys");
            assert!(!bit_at(a, c), "lesser key has 0 at {c}");
            assert!(bit_at(b, c), "greater key has 1 at {c}");
        }
    }

    #[test]
    fn critbit_is_symmetric() {
        assert_eq!(critbit(b"abc", b"abd"), critbit(b"abd", b"abc"));
        assert_eq!(critbit(b"x", b"xyz"), critbit(b"xyz", b"x"));
    }
}
