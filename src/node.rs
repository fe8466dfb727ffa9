//! The persistent tree's node type and its canonical hash.

use crate::encode;
use crate::hash::{sha256, NodeHash, EMPTY_HASH};
use avlkv_errors::{Result, StoreError};

/// A node in the authenticated tree. Inner nodes hold a split key (the maximum key in their
/// left subtree) and no value; leaves hold the full key and its value. `is_leaf` is derived
/// from the absence of both child hashes rather than stored as a separate flag, since a node
/// with no children is, definitionally, a leaf.
#[derive(Debug, Clone)]
pub struct IAVLNode {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub version: i64,
    pub height: i32,
    pub size: u64,
    pub hash: NodeHash,
    pub left_hash: Option<NodeHash>,
    pub right_hash: Option<NodeHash>,
}

impl IAVLNode {
    pub fn new_leaf(key: Vec<u8>, value: Vec<u8>, version: i64) -> Result<Self> {
        let mut node = Self {
            key,
            value,
            version,
            height: 0,
            size: 1,
            hash: EMPTY_HASH,
            left_hash: None,
            right_hash: None,
        };
        node.hash = node.compute_hash()?;
        Ok(node)
    }

    /// Inner node hash = H(0x01 || version || height || size || len(split_key) || split_key
    /// || left_hash || right_hash).
    /// Leaf hash = H(0x00 || len(key) || key || len(value_hash) || value_hash), where
    /// value_hash = H(value). The value itself is hashed first so a verifier need only learn
    /// the value, never an intermediate of it, and so leaf proofs compact to a fixed shape.
    pub fn compute_hash(&self) -> Result<NodeHash> {
        if self.is_leaf() {
            let value_hash = sha256(&self.value);

            let mut preimage = vec![0x00u8];
            prost::encode_length_delimiter(self.key.len(), &mut preimage).map_err(|e| {
                StoreError::Integrity {
                    hash: "<pending>".into(),
                    reason: format!("encode leaf key length: {e}"),
                }
            })?;
            preimage.extend_from_slice(&self.key);

            prost::encode_length_delimiter(value_hash.len(), &mut preimage).map_err(|e| {
                StoreError::Integrity {
                    hash: "<pending>".into(),
                    reason: format!("encode leaf value-hash length: {e}"),
                }
            })?;
            preimage.extend_from_slice(&value_hash);

            Ok(sha256(&preimage))
        } else {
            let data = encode::encode_node_canonical(self)?;
            Ok(sha256(&data))
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left_hash.is_none() && self.right_hash.is_none()
    }

    pub fn from_decoded(decoded: encode::DecodedNode) -> Result<Self> {
        let mut node = IAVLNode {
            key: if decoded.is_leaf {
                decoded.key
            } else {
                decoded.split_key
            },
            value: decoded.value,
            version: decoded.version,
            height: decoded.height,
            size: decoded.size,
            hash: EMPTY_HASH,
            left_hash: (decoded.left_hash != EMPTY_HASH).then_some(decoded.left_hash),
            right_hash: (decoded.right_hash != EMPTY_HASH).then_some(decoded.right_hash),
        };
        node.hash = node.compute_hash()?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_hash_is_deterministic() {
        let a = IAVLNode::new_leaf(b"key".to_vec(), b"value".to_vec(), 1).unwrap();
        let b = IAVLNode::new_leaf(b"key".to_vec(), b"value".to_vec(), 1).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_leaf_hash_depends_on_value() {
        let a = IAVLNode::new_leaf(b"key".to_vec(), b"value1".to_vec(), 1).unwrap();
        let b = IAVLNode::new_leaf(b"key".to_vec(), b"value2".to_vec(), 1).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_leaf_hash_independent_of_version() {
        // The leaf preimage does not include `version`, matching the canonical scheme: only
        // key and value-hash participate. Nodes differing only in version hash identically.
        let a = IAVLNode::new_leaf(b"key".to_vec(), b"value".to_vec(), 1).unwrap();
        let b = IAVLNode::new_leaf(b"key".to_vec(), b"value".to_vec(), 2).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_is_leaf() {
        let leaf = IAVLNode::new_leaf(b"k".to_vec(), b"v".to_vec(), 1).unwrap();
        assert!(leaf.is_leaf());
    }
}
