//! Tree serialization.
//!
//! Everything rides on the self-delimiting codec from `cairn-types`.
//! Remote references are encoded as bracketed hash literals, so the
//! conservative dependency scanner sees every stowed subtree a
//! serialized tree (or stowed node) depends on.
//!
//! Layouts:
//!
//! ```text
//! tree        = 0x00                                  (empty)
//!             | 0x01 ByteString(least) node
//! node        = 0x01 value                            (leaf)
//!             | 0x02 VarNat(cb) node ByteString(key_right) node
//!             | 0x03 VarNat(cb') updates HashLit      (remote)
//! cb'         = 0 for a single-key subtree, else cb + 1
//! updates     = VarNat(0)
//!             | VarNat(n) ByteString(stowed_least) (ByteString(key) value)^n
//! stowed node = ByteString(least) node
//! ```

use cairn_types::codec::{
    CodecError, bytes_len, read_bytes, read_hash, read_varnat, varnat_len, write_bytes,
    write_hash, write_varnat,
};
use cairn_types::{DbError, Key, Result};

use crate::node::{CB_LEAF, Node, Pending};
use crate::value::TrieValue;

const TAG_EMPTY: u8 = 0x00;
const TAG_ROOT: u8 = 0x01;
const TAG_LEAF: u8 = 0x01;
const TAG_INNER: u8 = 0x02;
const TAG_REMOTE: u8 = 0x03;

/// Hash literal size: braces plus the 64 hash bytes.
const HASH_LIT_LEN: usize = cairn_types::HASH_LEN + 2;

/// Encode a whole tree.
pub(crate) fn encode_tree<V: TrieValue>(root: Option<&(Key, Node<V>)>, out: &mut Vec<u8>) {
    match root {
        None => out.push(TAG_EMPTY),
        Some((least, node)) => {
            out.push(TAG_ROOT);
            write_bytes(out, least);
            encode_node(node, out);
        }
    }
}

/// Decode a whole tree.
pub(crate) fn decode_tree<V: TrieValue>(bytes: &[u8]) -> Result<Option<(Key, Node<V>)>> {
    let mut input = bytes;
    let root = match take_tag(&mut input)? {
        TAG_EMPTY => None,
        TAG_ROOT => {
            let least = read_bytes(&mut input).map_err(DbError::from)?;
            let node = decode_node(&mut input)?;
            Some((least, node))
        }
        tag => return Err(CodecError::Tag { tag }.into()),
    };
    if !input.is_empty() {
        return Err(CodecError::Tag { tag: input[0] }.into());
    }
    Ok(root)
}

/// Encode a stowed subtree: its least key, then the node.
pub(crate) fn encode_stowed<V: TrieValue>(least: &[u8], node: &Node<V>, out: &mut Vec<u8>) {
    write_bytes(out, least);
    encode_node(node, out);
}

/// Decode a stowed subtree.
pub(crate) fn decode_stowed<V: TrieValue>(bytes: &[u8]) -> Result<(Key, Node<V>)> {
    let mut input = bytes;
    let least = read_bytes(&mut input).map_err(DbError::from)?;
    let node = decode_node(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::Tag { tag: input[0] }.into());
    }
    Ok((least, node))
}

pub(crate) fn encode_node<V: TrieValue>(node: &Node<V>, out: &mut Vec<u8>) {
    match node {
        Node::Leaf(value) => {
            out.push(TAG_LEAF);
            value.write(out);
        }
        Node::Inner { cb, left, key_right, right } => {
            out.push(TAG_INNER);
            write_varnat(out, *cb);
            encode_node(left, out);
            write_bytes(out, key_right);
            encode_node(right, out);
        }
        Node::Remote { cb, pending, target } => {
            out.push(TAG_REMOTE);
            write_varnat(out, encode_cb(*cb));
            match pending {
                Some(p) if !p.updates.is_empty() => {
                    write_varnat(out, p.updates.len() as u64);
                    write_bytes(out, &p.stowed_least);
                    for (key, value) in &p.updates {
                        write_bytes(out, key);
                        value.write(out);
                    }
                }
                _ => write_varnat(out, 0),
            }
            write_hash(out, target);
        }
    }
}

pub(crate) fn decode_node<V: TrieValue>(input: &mut &[u8]) -> Result<Node<V>> {
    match take_tag(input)? {
        TAG_LEAF => Ok(Node::Leaf(V::read(input).map_err(DbError::from)?)),
        TAG_INNER => {
            let cb = read_varnat(input).map_err(DbError::from)?;
            let left = decode_node(input)?;
            let key_right = read_bytes(input).map_err(DbError::from)?;
            let right = decode_node(input)?;
            Ok(Node::Inner {
                cb,
                left: Box::new(left),
                key_right,
                right: Box::new(right),
            })
        }
        TAG_REMOTE => {
            let cb = decode_cb(read_varnat(input).map_err(DbError::from)?);
            let count = read_varnat(input).map_err(DbError::from)?;
            let pending = if count == 0 {
                None
            } else {
                let stowed_least = read_bytes(input).map_err(DbError::from)?;
                let mut updates = std::collections::BTreeMap::new();
                for _ in 0..count {
                    let key = read_bytes(input).map_err(DbError::from)?;
                    let value = V::read(input).map_err(DbError::from)?;
                    updates.insert(key, value);
                }
                Some(Pending { updates, stowed_least })
            };
            let target = read_hash(input).map_err(DbError::from)?;
            Ok(Node::Remote { cb, pending, target })
        }
        tag => Err(CodecError::Tag { tag }.into()),
    }
}

/// Serialized size of a node, used by the compaction estimator. Exact
/// for the current encoding.
pub(crate) fn node_size<V: TrieValue>(node: &Node<V>) -> usize {
    match node {
        Node::Leaf(value) => 1 + value.size_hint(),
        Node::Inner { cb, left, key_right, right } => {
            1 + varnat_len(*cb) + node_size(left) + bytes_len(key_right) + node_size(right)
        }
        Node::Remote { cb, pending, .. } => remote_size(*cb, pending.as_ref()),
    }
}

/// Serialized size of a remote node, computable without the node itself.
pub(crate) fn remote_size<V: TrieValue>(cb: u64, pending: Option<&Pending<V>>) -> usize {
    let updates = match pending {
        Some(p) if !p.updates.is_empty() => {
            varnat_len(p.updates.len() as u64)
                + bytes_len(&p.stowed_least)
                + p.updates
                    .iter()
                    .map(|(k, v)| bytes_len(k) + v.size_hint())
                    .sum::<usize>()
        }
        _ => varnat_len(0),
    };
    1 + varnat_len(encode_cb(cb)) + updates + HASH_LIT_LEN
}

fn take_tag(input: &mut &[u8]) -> Result<u8> {
    let (&tag, rest) = input.split_first().ok_or(CodecError::Truncated)?;
    *input = rest;
    Ok(tag)
}

fn encode_cb(cb: u64) -> u64 {
    if cb == CB_LEAF { 0 } else { cb + 1 }
}

fn decode_cb(encoded: u64) -> u64 {
    if encoded == 0 { CB_LEAF } else { encoded - 1 }
}
