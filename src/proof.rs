//! Membership and absence proofs, and their stateless verifier.
//!
//! The proof shapes and the verifier in this module know nothing about the tree that
//! produced them — they take a published root hash, a key, an expected value (or its
//! absence), and a proof, and answer whether the proof is consistent. `tree.rs` is the only
//! place that *builds* proofs by walking the tree; this module only computes and checks
//! hashes.

use crate::hash::NodeHash;
use avlkv_errors::{Result, StoreError};
use parity_scale_codec::{Decode, Encode};

fn hash(data: &[u8]) -> NodeHash {
    crate::hash::sha256(data)
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum HashOp {
    NoHash,
    Sha256,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum LengthOp {
    NoPrefix,
    VarProto,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct LeafOp {
    pub hash: HashOp,
    pub prehash_key: HashOp,
    pub prehash_value: HashOp,
    pub length: LengthOp,
    pub prefix: Vec<u8>,
}

/// The leaf op used throughout this crate: SHA-256 over the whole preimage, keys
/// unhashed, values pre-hashed (matching the node hash preimage in `node.rs`), VarProto
/// length prefixes, and the `0x00` leaf tag as the fixed prefix.
pub fn standard_leaf_op() -> LeafOp {
    LeafOp {
        hash: HashOp::Sha256,
        prehash_key: HashOp::NoHash,
        prehash_value: HashOp::Sha256,
        length: LengthOp::VarProto,
        prefix: vec![0x00],
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct InnerOp {
    pub version: i64,
    pub height: i32,
    pub size: u64,
    pub split_key: Vec<u8>,
    pub side: Side,
    pub sibling_hash: NodeHash,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct ExistenceProof {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub leaf: LeafOp,
    pub path: Vec<InnerOp>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct NonExistenceProof {
    pub missing_key: Vec<u8>,
    pub left: Option<ExistenceProof>,
    pub right: Option<ExistenceProof>,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub enum IavlProof {
    Existence(ExistenceProof),
    NonExistence(NonExistenceProof),
}

pub(super) fn hash_leaf(leaf_op: &LeafOp, key: &[u8], value: &[u8]) -> Result<NodeHash> {
    fn apply_hash(op: &HashOp, data: &[u8]) -> Vec<u8> {
        match op {
            HashOp::NoHash => data.to_vec(),
            HashOp::Sha256 => hash(data).to_vec(),
        }
    }

    fn apply_length(op: &LengthOp, data: &[u8]) -> Result<Vec<u8>> {
        match op {
            LengthOp::NoPrefix => Ok(data.to_vec()),
            LengthOp::VarProto => {
                let mut out =
                    Vec::with_capacity(prost::length_delimiter_len(data.len()) + data.len());
                prost::encode_length_delimiter(data.len(), &mut out).map_err(|e| {
                    StoreError::Integrity {
                        hash: "<proof>".into(),
                        reason: format!("encode length prefix: {e}"),
                    }
                })?;
                out.extend_from_slice(data);
                Ok(out)
            }
        }
    }

    let hashed_key = apply_hash(&leaf_op.prehash_key, key);
    let hashed_value = apply_hash(&leaf_op.prehash_value, value);

    let mut data = Vec::new();
    data.extend_from_slice(&leaf_op.prefix);
    data.extend_from_slice(&apply_length(&leaf_op.length, &hashed_key)?);
    data.extend_from_slice(&apply_length(&leaf_op.length, &hashed_value)?);

    Ok(hash(&data))
}

pub(super) fn hash_inner(op: &InnerOp, left_hash: &NodeHash, right_hash: &NodeHash) -> NodeHash {
    let mut data = Vec::with_capacity(1 + 8 + 4 + 8 + 4 + op.split_key.len() + 32 + 32);
    data.push(0x01);
    data.extend_from_slice(&(op.version as u64).to_le_bytes());
    data.extend_from_slice(&op.height.to_le_bytes());
    data.extend_from_slice(&op.size.to_le_bytes());
    data.extend_from_slice(&(op.split_key.len() as u32).to_le_bytes());
    data.extend_from_slice(&op.split_key);
    data.extend_from_slice(left_hash);
    data.extend_from_slice(right_hash);
    hash(&data)
}

pub fn compute_root_from_proof(proof: &IavlProof) -> Result<NodeHash> {
    match proof {
        IavlProof::Existence(p) => compute_root_from_existence(p),
        IavlProof::NonExistence(p) => compute_root_from_non_existence(p),
    }
}

pub fn compute_root_from_existence(p: &ExistenceProof) -> Result<NodeHash> {
    let mut current = hash_leaf(&p.leaf, &p.key, &p.value)?;
    for step in &p.path {
        let (left, right) = match step.side {
            Side::Left => (step.sibling_hash, current),
            Side::Right => (current, step.sibling_hash),
        };
        current = hash_inner(step, &left, &right);
    }
    Ok(current)
}

pub fn compute_root_from_non_existence(p: &NonExistenceProof) -> Result<NodeHash> {
    if p.left.is_none() && p.right.is_none() {
        return Ok(hash(&[]));
    }
    let left_root = p.left.as_ref().map(compute_root_from_existence).transpose()?;
    let right_root = p.right.as_ref().map(compute_root_from_existence).transpose()?;

    match (left_root, right_root) {
        (Some(l), None) => Ok(l),
        (None, Some(r)) => Ok(r),
        (Some(l), Some(r)) => {
            if l != r {
                return Err(StoreError::Integrity {
                    hash: "<proof>".into(),
                    reason: "non-existence proof neighbors imply different roots".into(),
                });
            }
            Ok(l)
        }
        (None, None) => unreachable!("checked above"),
    }
}

/// The single entry point external verifiers call: given a published root hash, a key, an
/// expected value (`None` for an absence claim), and a proof, confirms the proof is
/// internally consistent, matches the claimed key/value, and hashes to `root`.
pub fn verify_iavl_proof(
    root: &NodeHash,
    key: &[u8],
    expected_value: Option<&[u8]>,
    proof: &IavlProof,
) -> Result<bool> {
    match (expected_value, proof) {
        (Some(val), IavlProof::Existence(p)) => {
            if p.key != key || p.value != val {
                return Ok(false);
            }
        }
        (None, IavlProof::NonExistence(p)) => {
            if p.missing_key != key {
                return Ok(false);
            }
            if let Some(l) = &p.left {
                if l.key >= p.missing_key {
                    return Ok(false);
                }
            }
            if let Some(r) = &p.right {
                if r.key <= p.missing_key {
                    return Ok(false);
                }
            }
            if let (Some(l), Some(r)) = (&p.left, &p.right) {
                if l.key >= r.key {
                    return Ok(false);
                }
            }
        }
        _ => return Ok(false),
    }

    let calculated_root = compute_root_from_proof(proof)?;
    Ok(calculated_root == *root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existence_proof_round_trip_single_leaf() {
        let leaf = standard_leaf_op();
        let proof = ExistenceProof {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            leaf: leaf.clone(),
            path: vec![],
        };
        let root = compute_root_from_existence(&proof).unwrap();
        assert!(verify_iavl_proof(&root, b"k", Some(b"v"), &IavlProof::Existence(proof)).unwrap());
    }

    #[test]
    fn test_existence_proof_rejects_wrong_value() {
        let leaf = standard_leaf_op();
        let proof = ExistenceProof {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            leaf,
            path: vec![],
        };
        let root = compute_root_from_existence(&proof).unwrap();
        assert!(!verify_iavl_proof(&root, b"k", Some(b"wrong"), &IavlProof::Existence(proof)).unwrap());
    }

    #[test]
    fn test_non_existence_requires_ordered_neighbors() {
        let leaf = standard_leaf_op();
        let left = ExistenceProof {
            key: b"b".to_vec(),
            value: b"2".to_vec(),
            leaf: leaf.clone(),
            path: vec![],
        };
        let right = ExistenceProof {
            key: b"a".to_vec(),
            value: b"1".to_vec(),
            leaf,
            path: vec![],
        };
        // left.key > right.key: must be rejected regardless of hashes.
        let proof = NonExistenceProof {
            missing_key: b"aa".to_vec(),
            left: Some(left),
            right: Some(right),
        };
        let root = [0u8; 32];
        assert!(!verify_iavl_proof(&root, b"aa", None, &IavlProof::NonExistence(proof)).unwrap());
    }
}
