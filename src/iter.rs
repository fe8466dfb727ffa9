//! Lazy, stack-based in-order traversal over a tree snapshot, in either direction, over a
//! half-open key range. "Lazy" here means bounded memory: at most one root-to-leaf spine is
//! held on the stack at a time, regardless of how large the underlying range is, and no
//! pruned-out subtree is ever fetched from the backing store.

use crate::backing_store::{node_key, NodeStore};
use crate::hash::NodeHash;
use crate::node::IAVLNode;
use avlkv_errors::{Result, StoreError};
use std::collections::HashMap;
use std::sync::Arc;

enum Frame {
    Leaf(Arc<IAVLNode>),
    Inner(Arc<IAVLNode>),
}

pub struct TreeIter {
    cache: HashMap<NodeHash, Arc<IAVLNode>>,
    store: Option<Arc<dyn NodeStore>>,
    stack: Vec<Frame>,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    ascending: bool,
    failed: bool,
}

impl TreeIter {
    pub(crate) fn new(
        cache: HashMap<NodeHash, Arc<IAVLNode>>,
        store: Option<Arc<dyn NodeStore>>,
        root_hash: Option<NodeHash>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        ascending: bool,
    ) -> Self {
        let mut iter = Self {
            cache,
            store,
            stack: Vec::new(),
            start,
            end,
            ascending,
            failed: false,
        };
        if let Err(e) = iter.descend(root_hash) {
            iter.failed = true;
            iter.stack.clear();
            iter.stack.push(Frame::Leaf(Arc::new(poison_node(e))));
        }
        iter
    }

    fn fetch(&self, hash: NodeHash) -> Result<Arc<IAVLNode>> {
        if let Some(node) = self.cache.get(&hash) {
            return Ok(node.clone());
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| integrity_missing(hash))?;
        let bytes = store
            .get(&node_key(&hash))?
            .ok_or_else(|| integrity_missing(hash))?;
        let decoded = crate::encode::decode_node(&bytes).ok_or_else(|| StoreError::Integrity {
            hash: hex::encode(hash),
            reason: "failed to decode persisted node record".into(),
        })?;
        Ok(Arc::new(IAVLNode::from_decoded(decoded)?))
    }

    /// Descends from `hash_opt` toward the first node this iterator should visit, pruning any
    /// subtree the range bounds rule out entirely, and pushing the rest of the spine onto the
    /// stack for later resumption.
    fn descend(&mut self, mut hash_opt: Option<NodeHash>) -> Result<()> {
        loop {
            let Some(hash) = hash_opt else { return Ok(()) };
            let node = self.fetch(hash)?;
            if node.is_leaf() {
                self.stack.push(Frame::Leaf(node));
                return Ok(());
            }
            if self.ascending {
                let may_contain_start = self
                    .start
                    .as_deref()
                    .map_or(true, |s| s <= node.key.as_slice());
                if may_contain_start {
                    let left = node.left_hash;
                    self.stack.push(Frame::Inner(node));
                    hash_opt = left;
                } else {
                    hash_opt = node.right_hash;
                }
            } else {
                let may_contain_end = self.end.as_deref().map_or(true, |e| node.key.as_slice() < e);
                if may_contain_end {
                    let right = node.right_hash;
                    self.stack.push(Frame::Inner(node));
                    hash_opt = right;
                } else {
                    hash_opt = node.left_hash;
                }
            }
        }
    }

    fn in_range(&self, key: &[u8]) -> bool {
        self.start.as_deref().map_or(true, |s| key >= s) && self.end.as_deref().map_or(true, |e| key < e)
    }
}

impl Iterator for TreeIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            self.stack.pop();
            self.failed = false;
            return Some(Err(integrity_missing([0u8; 32])));
        }
        loop {
            let frame = self.stack.pop()?;
            match frame {
                Frame::Leaf(node) => {
                    if self.in_range(&node.key) {
                        return Some(Ok((node.key.clone(), node.value.clone())));
                    }
                    continue;
                }
                Frame::Inner(node) => {
                    let other_side = if self.ascending {
                        let may_contain_end =
                            self.end.as_deref().map_or(true, |e| node.key.as_slice() < e);
                        if !may_contain_end {
                            continue;
                        }
                        node.right_hash
                    } else {
                        let may_contain_start = self
                            .start
                            .as_deref()
                            .map_or(true, |s| s <= node.key.as_slice());
                        if !may_contain_start {
                            continue;
                        }
                        node.left_hash
                    };
                    if let Err(e) = self.descend(other_side) {
                        return Some(Err(e));
                    }
                    continue;
                }
            }
        }
    }
}

fn integrity_missing(hash: NodeHash) -> StoreError {
    StoreError::Integrity {
        hash: hex::encode(hash),
        reason: "referenced node missing from cache and store".into(),
    }
}

fn poison_node(_e: StoreError) -> IAVLNode {
    IAVLNode {
        key: Vec::new(),
        value: Vec::new(),
        version: 0,
        height: 0,
        size: 0,
        hash: [0u8; 32],
        left_hash: None,
        right_hash: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PersistentTree;
    use crate::backing_store::MemNodeStore;

    fn populated() -> PersistentTree {
        let mut tree = PersistentTree::with_store(Arc::new(MemNodeStore::new()));
        for (k, v) in [("aloha", "shalom"), ("hello", "world"), ("golang", "rocks")] {
            tree.set(k.as_bytes(), Some(v.as_bytes())).unwrap();
        }
        tree
    }

    #[test]
    fn test_forward_full_range() {
        let tree = populated();
        let got: Vec<_> = tree
            .iterate(None, None, true)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect();
        assert_eq!(got, vec!["aloha", "golang", "hello"]);
    }

    #[test]
    fn test_reverse_full_range() {
        let tree = populated();
        let got: Vec<_> = tree
            .iterate(None, None, false)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect();
        assert_eq!(got, vec!["hello", "golang", "aloha"]);
    }

    #[test]
    fn test_forward_partial_lower_bound() {
        let tree = populated();
        let got: Vec<_> = tree
            .iterate(Some(b"golang"), None, true)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect();
        assert_eq!(got, vec!["golang", "hello"]);
    }

    #[test]
    fn test_forward_partial_upper_bound() {
        let tree = populated();
        let got: Vec<_> = tree
            .iterate(None, Some(b"golang"), true)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect();
        assert_eq!(got, vec!["aloha"]);
    }

    #[test]
    fn test_bounded_range_excludes_upper() {
        let tree = populated();
        let got: Vec<_> = tree
            .iterate(Some(b"aloha"), Some(b"hello"), true)
            .map(|r| String::from_utf8(r.unwrap().0).unwrap())
            .collect();
        assert_eq!(got, vec!["aloha", "golang"]);
    }

    #[test]
    #[should_panic(expected = "invalid iteration range")]
    fn test_inverted_range_panics() {
        let tree = populated();
        let _ = tree.iterate(Some(b"z"), Some(b"a"), true);
    }

    /// `{55, 255, 255, *}` and `{255, 255, *}` share a trailing `0xFF 0xFF` run but diverge on
    /// the byte before it. Bounding the iterator to `[{55,255,255}, {56})` (the half-open
    /// range `lexicographical_successor` produces for that prefix) must yield only the first
    /// family — a `starts_with`-style check on the raw bytes would conflate the two.
    #[test]
    fn test_bounded_range_excludes_unrelated_trailing_0xff_family() {
        let mut tree = PersistentTree::with_store(Arc::new(MemNodeStore::new()));
        for k in [
            vec![55u8, 255, 255, 0],
            vec![55u8, 255, 255, 1],
            vec![55u8, 255, 255, 255],
            vec![255u8, 255, 0],
            vec![255u8, 255, 1],
            vec![255u8, 255, 255],
        ] {
            tree.set(&k, Some(b"test4")).unwrap();
        }

        let got: Vec<_> = tree
            .iterate(Some(&[55, 255, 255]), Some(&[56]), true)
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(
            got,
            vec![
                vec![55u8, 255, 255, 0],
                vec![55u8, 255, 255, 1],
                vec![55u8, 255, 255, 255],
            ]
        );
    }
}
