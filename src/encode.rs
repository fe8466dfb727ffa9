//! Canonical on-disk / hash-preimage encoding for tree nodes, per the node serialization
//! contract: `height`, `size`, `version` as varints, then a length-prefixed key, then either
//! a leaf's value or an inner node's two child hashes.
//!
//! One varint codec is used everywhere in this crate (here, and again in the subspace query
//! encoding in `query.rs`): `prost`'s standalone length-delimiter primitives. This is not a
//! protobuf message, just the varint routine protobuf happens to define.

use crate::hash::{NodeHash, EMPTY_HASH};
use crate::node::IAVLNode;
use avlkv_errors::{Result, StoreError};

fn encode_leaf_canonical(n: &IAVLNode) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(
        1 + prost::length_delimiter_len(n.key.len())
            + n.key.len()
            + prost::length_delimiter_len(n.value.len())
            + n.value.len(),
    );
    buf.push(0x00);
    prost::encode_length_delimiter(n.key.len(), &mut buf).map_err(|e| StoreError::Integrity {
        hash: hex::encode(n.hash),
        reason: format!("encode key length: {e}"),
    })?;
    buf.extend_from_slice(&n.key);

    prost::encode_length_delimiter(n.value.len(), &mut buf).map_err(|e| {
        StoreError::Integrity {
            hash: hex::encode(n.hash),
            reason: format!("encode value length: {e}"),
        }
    })?;
    buf.extend_from_slice(&n.value);
    Ok(buf)
}

fn encode_inner_canonical(n: &IAVLNode) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 + 4 + 8 + 4 + n.key.len() + 32 + 32);
    buf.push(0x01);
    buf.extend_from_slice(&(n.version as u64).to_le_bytes());
    buf.extend_from_slice(&n.height.to_le_bytes());
    buf.extend_from_slice(&n.size.to_le_bytes());
    buf.extend_from_slice(&(n.key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&n.key);
    buf.extend_from_slice(n.left_hash.as_ref().unwrap_or(&EMPTY_HASH));
    buf.extend_from_slice(n.right_hash.as_ref().unwrap_or(&EMPTY_HASH));
    buf
}

/// Encodes a node into its canonical byte record. For inner nodes this doubles as the hash
/// preimage (see `IAVLNode::compute_hash`); leaves hash a distinct, smaller preimage and use
/// this encoding only for the persisted record.
pub fn encode_node_canonical(n: &IAVLNode) -> Result<Vec<u8>> {
    if n.is_leaf() {
        encode_leaf_canonical(n)
    } else {
        Ok(encode_inner_canonical(n))
    }
}

#[derive(Clone)]
pub struct DecodedNode {
    pub is_leaf: bool,
    pub version: i64,
    pub height: i32,
    pub size: u64,
    pub split_key: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub left_hash: NodeHash,
    pub right_hash: NodeHash,
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
    if cursor.len() < n {
        return None;
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Some(head)
}

/// Decodes a record produced by [`encode_node_canonical`]. Returns `None` on any malformation
/// (truncated record, trailing bytes, unknown tag); the caller turns that into an
/// [`avlkv_errors::StoreError::Integrity`] error, since a malformed record can only mean disk
/// corruption or a version skew in the encoding.
pub fn decode_node(bytes: &[u8]) -> Option<DecodedNode> {
    let mut cursor = bytes;
    let tag = *take(&mut cursor, 1)?.first()?;

    if tag == 0x00 {
        let key_len = prost::decode_length_delimiter(&mut cursor).ok()?;
        let key = take(&mut cursor, key_len)?.to_vec();
        let val_len = prost::decode_length_delimiter(&mut cursor).ok()?;
        let value = take(&mut cursor, val_len)?.to_vec();
        if !cursor.is_empty() {
            return None;
        }
        Some(DecodedNode {
            is_leaf: true,
            version: 0,
            height: 0,
            size: 1,
            split_key: Vec::new(),
            key,
            value,
            left_hash: EMPTY_HASH,
            right_hash: EMPTY_HASH,
        })
    } else if tag == 0x01 {
        let version = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().ok()?) as i64;
        let height = i32::from_le_bytes(take(&mut cursor, 4)?.try_into().ok()?);
        let size = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().ok()?);
        let klen = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().ok()?) as usize;
        let split_key = take(&mut cursor, klen)?.to_vec();
        let mut left_hash = [0u8; 32];
        left_hash.copy_from_slice(take(&mut cursor, 32)?);
        let mut right_hash = [0u8; 32];
        right_hash.copy_from_slice(take(&mut cursor, 32)?);
        if !cursor.is_empty() {
            return None;
        }
        Some(DecodedNode {
            is_leaf: false,
            version,
            height,
            size,
            split_key,
            key: Vec::new(),
            value: Vec::new(),
            left_hash,
            right_hash,
        })
    } else {
        None
    }
}
