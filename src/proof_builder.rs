//! Walks a live tree to build the proof shapes defined in `proof.rs`. This is the only module
//! that knows how to construct a proof; verification lives entirely in `proof.rs` and never
//! touches a tree.

use crate::hash::{NodeHash, EMPTY_HASH};
use crate::proof::{standard_leaf_op, ExistenceProof, IavlProof, InnerOp, NonExistenceProof, Side};
use crate::tree::PersistentTree;
use avlkv_errors::{Result, StoreError};

fn integrity_missing(hash: NodeHash) -> StoreError {
    StoreError::Integrity {
        hash: hex::encode(hash),
        reason: "referenced node missing from cache and store".into(),
    }
}

/// Builds a membership or absence proof for `key` against `tree`'s current root, alongside
/// the value `Get` would return for the same key. The two are always consistent: a `Some`
/// value pairs with a membership proof, `None` with an absence proof.
pub fn build_proof(tree: &PersistentTree, key: &[u8]) -> Result<(Option<Vec<u8>>, IavlProof)> {
    let Some(root) = tree.root_hash() else {
        let proof = NonExistenceProof {
            missing_key: key.to_vec(),
            left: None,
            right: None,
        };
        return Ok((None, IavlProof::NonExistence(proof)));
    };

    match tree.get_recursive(Some(root), key)? {
        Some(value) => {
            let proof = build_existence_proof_from_root(tree, root, key)?;
            Ok((Some(value), IavlProof::Existence(proof)))
        }
        None => {
            let proof = build_non_existence_proof_from_root(tree, root, key)?;
            Ok((None, IavlProof::NonExistence(proof)))
        }
    }
}

fn build_existence_proof_from_root(
    tree: &PersistentTree,
    root_hash: NodeHash,
    key: &[u8],
) -> Result<ExistenceProof> {
    let mut path = Vec::new();
    let mut current_hash = root_hash;
    loop {
        let node = tree
            .get_node(current_hash)?
            .ok_or_else(|| integrity_missing(current_hash))?;

        if node.is_leaf() {
            if node.key.as_slice() != key {
                return Err(StoreError::Integrity {
                    hash: hex::encode(current_hash),
                    reason: "existence proof traversal landed on the wrong leaf".into(),
                });
            }
            path.reverse();
            return Ok(ExistenceProof {
                key: node.key.clone(),
                value: node.value.clone(),
                leaf: standard_leaf_op(),
                path,
            });
        }

        let (side, sibling_hash, next_hash) = if key <= node.key.as_slice() {
            (Side::Right, node.right_hash.unwrap_or(EMPTY_HASH), node.left_hash)
        } else {
            (Side::Left, node.left_hash.unwrap_or(EMPTY_HASH), node.right_hash)
        };
        path.push(InnerOp {
            version: node.version,
            height: node.height,
            size: node.size,
            split_key: node.key.clone(),
            side,
            sibling_hash,
        });
        current_hash = next_hash.ok_or_else(|| integrity_missing(current_hash))?;
    }
}

fn build_non_existence_proof_from_root(
    tree: &PersistentTree,
    root_hash: NodeHash,
    key: &[u8],
) -> Result<NonExistenceProof> {
    let predecessor = find_predecessor(tree, Some(root_hash), key)?;
    let successor = find_successor(tree, Some(root_hash), key)?;

    let left = predecessor
        .map(|k| build_existence_proof_from_root(tree, root_hash, &k))
        .transpose()?;
    let right = successor
        .map(|k| build_existence_proof_from_root(tree, root_hash, &k))
        .transpose()?;

    Ok(NonExistenceProof {
        missing_key: key.to_vec(),
        left,
        right,
    })
}

/// The largest key strictly less than `key` reachable from `root_hash`, or `None` if no such
/// key exists. Descends toward the target, recording the split key each time the whole left
/// subtree is known to be smaller than `key` (it's already the max of that subtree, so no
/// further lookup is needed).
fn find_predecessor(
    tree: &PersistentTree,
    root_hash: Option<NodeHash>,
    key: &[u8],
) -> Result<Option<Vec<u8>>> {
    let mut candidate = None;
    let mut current = root_hash;
    while let Some(hash) = current {
        let node = tree.get_node(hash)?.ok_or_else(|| integrity_missing(hash))?;
        if node.is_leaf() {
            if node.key.as_slice() < key {
                candidate = Some(node.key.clone());
            }
            break;
        }
        if key > node.key.as_slice() {
            candidate = Some(node.key.clone());
            current = node.right_hash;
        } else {
            current = node.left_hash;
        }
    }
    Ok(candidate)
}

/// The smallest key strictly greater than `key` reachable from `root_hash`, or `None`.
/// Mirrors `find_predecessor`, but since an inner node's split key is the max of its left
/// subtree rather than the min of its right, a tighter candidate requires descending into the
/// right subtree's minimum explicitly.
fn find_successor(
    tree: &PersistentTree,
    root_hash: Option<NodeHash>,
    key: &[u8],
) -> Result<Option<Vec<u8>>> {
    let mut candidate = None;
    let mut current = root_hash;
    while let Some(hash) = current {
        let node = tree.get_node(hash)?.ok_or_else(|| integrity_missing(hash))?;
        if node.is_leaf() {
            if node.key.as_slice() > key {
                candidate = Some(node.key.clone());
            }
            break;
        }
        if key < node.key.as_slice() {
            if let Some(right_hash) = node.right_hash {
                let min_right = tree.find_min(right_hash)?;
                candidate = Some(min_right.key.clone());
            }
            current = node.left_hash;
        } else {
            current = node.right_hash;
        }
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::MemNodeStore;
    use crate::proof::verify_iavl_proof;
    use std::sync::Arc;

    fn populated() -> PersistentTree {
        let mut tree = PersistentTree::with_store(Arc::new(MemNodeStore::new()));
        for (k, v) in [
            ("aloha", "shalom"),
            ("hello", "world"),
            ("golang", "rocks"),
            ("zeta", "last"),
        ] {
            tree.set(k.as_bytes(), Some(v.as_bytes())).unwrap();
        }
        tree
    }

    #[test]
    fn test_existence_proof_verifies_against_root() {
        let tree = populated();
        let root = tree.root_hash().unwrap();
        let (value, proof) = tree.get_with_proof(b"hello").unwrap();
        assert_eq!(value, Some(b"world".to_vec()));
        assert!(verify_iavl_proof(&root, b"hello", Some(b"world"), &proof).unwrap());
    }

    #[test]
    fn test_non_existence_proof_for_missing_middle_key() {
        let tree = populated();
        let root = tree.root_hash().unwrap();
        let (value, proof) = tree.get_with_proof(b"hxllo").unwrap();
        assert_eq!(value, None);
        assert!(verify_iavl_proof(&root, b"hxllo", None, &proof).unwrap());
    }

    #[test]
    fn test_non_existence_proof_below_minimum() {
        let tree = populated();
        let root = tree.root_hash().unwrap();
        let (value, proof) = tree.get_with_proof(b"a").unwrap();
        assert_eq!(value, None);
        assert!(verify_iavl_proof(&root, b"a", None, &proof).unwrap());
        if let IavlProof::NonExistence(p) = proof {
            assert!(p.left.is_none());
            assert!(p.right.is_some());
        } else {
            panic!("expected non-existence proof");
        }
    }

    #[test]
    fn test_non_existence_proof_above_maximum() {
        let tree = populated();
        let root = tree.root_hash().unwrap();
        let (value, proof) = tree.get_with_proof(b"zzzz").unwrap();
        assert_eq!(value, None);
        assert!(verify_iavl_proof(&root, b"zzzz", None, &proof).unwrap());
        if let IavlProof::NonExistence(p) = proof {
            assert!(p.left.is_some());
            assert!(p.right.is_none());
        } else {
            panic!("expected non-existence proof");
        }
    }

    #[test]
    fn test_empty_tree_produces_valid_non_existence() {
        let tree = PersistentTree::with_store(Arc::new(MemNodeStore::new()));
        let (value, proof) = tree.get_with_proof(b"anything").unwrap();
        assert_eq!(value, None);
        let root = crate::hash::sha256(&[]);
        assert!(verify_iavl_proof(&root, b"anything", None, &proof).unwrap());
    }
}
