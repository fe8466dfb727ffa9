//! The persistent tree (PT): an immutable, height-balanced, content-addressed binary search
//! tree over byte keys. A `PersistentTree` value is both the mutable working set (when
//! freshly created or opened against the latest version) and, once loaded via
//! [`PersistentTree::load_version`], a read-only view of a historical version — the
//! distinction is the `read_only` flag, enforced on every mutating method.
//!
//! Children are referenced by their 32-byte hash rather than by pointer, so persistent
//! sharing across versions never needs a cycle-aware ownership model: an inner node owns its
//! children exclusively in the Rust sense (they live in `node_cache` or the backing store),
//! and multiple versions simply hold the same hash.

use crate::backing_store::{self, NodeStore, WriteBatch};
use crate::hash::{NodeHash, EMPTY_HASH};
use crate::node::IAVLNode;
use crate::proof::IavlProof;
use crate::proof_builder;
use avlkv_errors::{fatal, Result, StoreError};
use avlkv_log::{debug, trace, warn};
use std::cmp::{max, Ordering};
use std::collections::HashMap;
use std::sync::Arc;

/// Computes the lexicographical successor of a byte string, i.e. the smallest string greater
/// than `bytes`. Returns `None` if `bytes` is all `0xFF` (no successor exists). Used to turn a
/// subspace prefix into a half-open range.
pub fn lexicographical_successor(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.is_empty() {
        return None;
    }
    let mut successor = bytes.to_vec();
    for i in (0..successor.len()).rev() {
        if successor[i] != 0xFF {
            successor[i] += 1;
            successor.truncate(i + 1);
            return Some(successor);
        }
    }
    None
}

pub struct PersistentTree {
    pub(crate) root_hash: Option<NodeHash>,
    pub(crate) node_cache: HashMap<NodeHash, Arc<IAVLNode>>,
    version: i64,
    dirty: bool,
    store: Option<Arc<dyn NodeStore>>,
    read_only: bool,
}

impl PersistentTree {
    /// A brand-new, empty, mutable tree with no backing store. Useful for tests and
    /// transient trees; `save_version` will fail without a store attached.
    pub fn new() -> Self {
        Self {
            root_hash: None,
            node_cache: HashMap::new(),
            version: 0,
            dirty: false,
            store: None,
            read_only: false,
        }
    }

    /// A new, empty, mutable tree bound to a store for persistence.
    pub fn with_store(store: Arc<dyn NodeStore>) -> Self {
        Self {
            root_hash: None,
            node_cache: HashMap::new(),
            version: 0,
            dirty: false,
            store: Some(store),
            read_only: false,
        }
    }

    /// Opens the latest committed version in `store` as a mutable working tree. If no version
    /// has ever been committed, returns a fresh empty tree at version 0.
    pub fn open_latest(store: Arc<dyn NodeStore>) -> Result<Self> {
        let latest = find_latest_version(store.as_ref())?;
        match latest {
            Some(v) => Self::load_version_inner(store, v, false),
            None => Ok(Self::with_store(store)),
        }
    }

    /// Loads version `v` as a read-only snapshot. Fails with
    /// [`StoreError::PrunedOrUnknownHeight`] if `v` was never committed or has been pruned.
    pub fn load_version(store: Arc<dyn NodeStore>, v: i64) -> Result<Self> {
        Self::load_version_inner(store, v, true)
    }

    fn load_version_inner(store: Arc<dyn NodeStore>, v: i64, read_only: bool) -> Result<Self> {
        if !version_is_retained(store.as_ref(), v)? {
            return Err(StoreError::PrunedOrUnknownHeight(v));
        }
        let root_bytes = store
            .get(&backing_store::root_key(v))?
            .ok_or(StoreError::PrunedOrUnknownHeight(v))?;
        let mut hash = EMPTY_HASH;
        if root_bytes.len() != 32 {
            return Err(StoreError::Integrity {
                hash: hex::encode(&root_bytes),
                reason: "root index entry is not 32 bytes".into(),
            });
        }
        hash.copy_from_slice(&root_bytes);
        Ok(Self {
            root_hash: (hash != EMPTY_HASH).then_some(hash),
            node_cache: HashMap::new(),
            version: v,
            dirty: false,
            store: Some(store),
            read_only,
        })
    }

    pub fn latest_version(&self) -> i64 {
        self.version
    }

    pub fn root_hash(&self) -> Option<NodeHash> {
        self.root_hash
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn version_exists(store: &dyn NodeStore, v: i64) -> Result<bool> {
        version_is_retained(store, v)
    }

    fn require_mutable(&self, operation: &str) {
        if self.read_only {
            fatal::mutation_on_readonly_snapshot(operation);
        }
    }

    pub(crate) fn get_node(&self, hash: NodeHash) -> Result<Option<Arc<IAVLNode>>> {
        if hash == EMPTY_HASH {
            return Ok(None);
        }
        if let Some(node) = self.node_cache.get(&hash) {
            return Ok(Some(node.clone()));
        }
        if let Some(store) = &self.store {
            debug!(hash = %hex::encode(hash), "node cache miss, fetching from backing store");
            if let Some(bytes) = store.get(&backing_store::node_key(&hash))? {
                let decoded = crate::encode::decode_node(&bytes).ok_or_else(|| {
                    StoreError::Integrity {
                        hash: hex::encode(hash),
                        reason: "failed to decode persisted node record".into(),
                    }
                })?;
                let node = IAVLNode::from_decoded(decoded)?;
                if node.hash != hash {
                    warn!(
                        expected = %hex::encode(hash),
                        actual = %hex::encode(node.hash),
                        "persisted node hash mismatch, version is fatally corrupt"
                    );
                    return Err(StoreError::Integrity {
                        hash: hex::encode(hash),
                        reason: "decoded node hash does not match its key".into(),
                    });
                }
                return Ok(Some(Arc::new(node)));
            }
        }
        Ok(None)
    }

    fn node_height(&self, hash_opt: Option<NodeHash>) -> Result<i32> {
        Ok(match hash_opt {
            None => -1,
            Some(h) => self.get_node(h)?.map_or(-1, |n| n.height),
        })
    }

    fn node_size(&self, hash_opt: Option<NodeHash>) -> Result<u64> {
        Ok(match hash_opt {
            None => 0,
            Some(h) => self.get_node(h)?.map_or(0, |n| n.size),
        })
    }

    pub(crate) fn find_max(&self, hash: NodeHash) -> Result<Arc<IAVLNode>> {
        let mut node = self
            .get_node(hash)?
            .ok_or_else(|| integrity_missing(hash))?;
        while let Some(right) = node.right_hash {
            node = self.get_node(right)?.ok_or_else(|| integrity_missing(right))?;
        }
        Ok(node)
    }

    pub(crate) fn find_min(&self, hash: NodeHash) -> Result<Arc<IAVLNode>> {
        let mut node = self
            .get_node(hash)?
            .ok_or_else(|| integrity_missing(hash))?;
        while let Some(left) = node.left_hash {
            node = self.get_node(left)?.ok_or_else(|| integrity_missing(left))?;
        }
        Ok(node)
    }

    fn create_inner_node(
        &mut self,
        left_hash: Option<NodeHash>,
        right_hash: Option<NodeHash>,
    ) -> Result<NodeHash> {
        let key = match left_hash {
            Some(lh) => self.find_max(lh)?.key.clone(),
            None => Vec::new(),
        };
        let height = 1 + max(self.node_height(left_hash)?, self.node_height(right_hash)?);
        let size = self.node_size(left_hash)? + self.node_size(right_hash)?;
        let mut node = IAVLNode {
            key,
            value: Vec::new(),
            version: self.version + 1,
            height,
            size,
            hash: EMPTY_HASH,
            left_hash,
            right_hash,
        };
        node.hash = node.compute_hash()?;
        let hash = node.hash;
        self.node_cache.insert(hash, Arc::new(node));
        Ok(hash)
    }

    pub(crate) fn get_recursive(
        &self,
        node_hash_opt: Option<NodeHash>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let Some(node_hash) = node_hash_opt else {
            return Ok(None);
        };
        let Some(node) = self.get_node(node_hash)? else {
            return Ok(None);
        };
        if node.is_leaf() {
            if key == node.key.as_slice() {
                Ok(Some(node.value.clone()))
            } else {
                Ok(None)
            }
        } else if key <= node.key.as_slice() {
            self.get_recursive(node.left_hash, key)
        } else {
            self.get_recursive(node.right_hash, key)
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_recursive(self.root_hash, key)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts or overwrites `key` with `value`. `value = None` represents the nil sentinel
    /// and is a programmer-error abort, per the no-nil invariant. Returns whether `key` was
    /// already present.
    pub fn set(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
        self.require_mutable("Set");
        let Some(value) = value else {
            fatal::nil_value_set();
        };
        if key.is_empty() {
            return Err(StoreError::InvalidValue("key must not be empty".into()));
        }
        let existed = self.has(key)?;
        self.root_hash = Some(self.insert_recursive(self.root_hash, key, value)?);
        self.dirty = true;
        Ok(existed)
    }

    fn insert_recursive(
        &mut self,
        node_hash_opt: Option<NodeHash>,
        key: &[u8],
        value: &[u8],
    ) -> Result<NodeHash> {
        let Some(node_hash) = node_hash_opt else {
            let leaf = IAVLNode::new_leaf(key.to_vec(), value.to_vec(), self.version + 1)?;
            let hash = leaf.hash;
            self.node_cache.insert(hash, Arc::new(leaf));
            return Ok(hash);
        };

        let node = self
            .get_node(node_hash)?
            .ok_or_else(|| integrity_missing(node_hash))?;

        if node.is_leaf() {
            match key.cmp(node.key.as_slice()) {
                Ordering::Equal => {
                    let leaf = IAVLNode::new_leaf(key.to_vec(), value.to_vec(), self.version + 1)?;
                    let hash = leaf.hash;
                    self.node_cache.insert(hash, Arc::new(leaf));
                    Ok(hash)
                }
                Ordering::Less => {
                    let leaf = IAVLNode::new_leaf(key.to_vec(), value.to_vec(), self.version + 1)?;
                    let leaf_hash = leaf.hash;
                    self.node_cache.insert(leaf_hash, Arc::new(leaf));
                    self.create_inner_node(Some(leaf_hash), Some(node.hash))
                }
                Ordering::Greater => {
                    let leaf = IAVLNode::new_leaf(key.to_vec(), value.to_vec(), self.version + 1)?;
                    let leaf_hash = leaf.hash;
                    self.node_cache.insert(leaf_hash, Arc::new(leaf));
                    self.create_inner_node(Some(node.hash), Some(leaf_hash))
                }
            }
        } else {
            let (new_left, new_right) = if key <= node.key.as_slice() {
                (
                    Some(self.insert_recursive(node.left_hash, key, value)?),
                    node.right_hash,
                )
            } else {
                (
                    node.left_hash,
                    Some(self.insert_recursive(node.right_hash, key, value)?),
                )
            };
            let new_hash = self.create_inner_node(new_left, new_right)?;
            self.balance(new_hash)
        }
    }

    /// Removes `key` if present, rebalancing along the way. A no-op (absent key) returns
    /// `false`; this is not a fatal condition.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.require_mutable("Delete");
        if !self.has(key)? {
            return Ok(false);
        }
        self.root_hash = self.remove_recursive(self.root_hash, key)?;
        self.dirty = true;
        Ok(true)
    }

    fn remove_recursive(
        &mut self,
        node_hash_opt: Option<NodeHash>,
        key: &[u8],
    ) -> Result<Option<NodeHash>> {
        let Some(node_hash) = node_hash_opt else {
            return Ok(None);
        };
        let node = self
            .get_node(node_hash)?
            .ok_or_else(|| integrity_missing(node_hash))?;

        match key.cmp(node.key.as_slice()) {
            Ordering::Less if !node.is_leaf() => {
                let new_left = self.remove_recursive(node.left_hash, key)?;
                if new_left == node.left_hash {
                    return Ok(Some(node_hash));
                }
                let new_hash = self.create_inner_node(new_left, node.right_hash)?;
                self.balance(new_hash).map(Some)
            }
            Ordering::Greater if !node.is_leaf() => {
                let new_right = self.remove_recursive(node.right_hash, key)?;
                if new_right == node.right_hash {
                    return Ok(Some(node_hash));
                }
                let new_hash = self.create_inner_node(node.left_hash, new_right)?;
                self.balance(new_hash).map(Some)
            }
            Ordering::Equal => {
                if node.is_leaf() {
                    Ok(None)
                } else {
                    match (node.left_hash, node.right_hash) {
                        (Some(left), None) => Ok(Some(left)),
                        (None, Some(right)) => Ok(Some(right)),
                        (Some(left), Some(right)) => {
                            let successor = self.find_min(right)?;
                            let new_right =
                                self.remove_recursive(Some(right), &successor.key)?;
                            let new_hash = self.create_inner_node(Some(left), new_right)?;
                            // `create_inner_node` derives the split key from the left
                            // subtree's max, which is unaffected by removing the in-order
                            // successor from the right subtree, so the split key is correct
                            // without further adjustment.
                            self.balance(new_hash).map(Some)
                        }
                        (None, None) => unreachable!("inner node must have at least one child"),
                    }
                }
            }
            _ => Ok(Some(node_hash)),
        }
    }

    fn balance(&mut self, node_hash: NodeHash) -> Result<NodeHash> {
        let node = self
            .get_node(node_hash)?
            .ok_or_else(|| integrity_missing(node_hash))?;
        let bf = self.node_height(node.right_hash)? - self.node_height(node.left_hash)?;

        if bf > 1 {
            let right_node = self
                .get_node(node.right_hash.ok_or_else(|| integrity_missing(node_hash))?)?
                .ok_or_else(|| integrity_missing(node_hash))?;
            if self.node_height(right_node.right_hash)? - self.node_height(right_node.left_hash)?
                < 0
            {
                trace!(balance_factor = bf, "right-left rotation");
                let new_right_hash = self.rotate_right(right_node.hash)?;
                let new_root = self.create_inner_node(node.left_hash, Some(new_right_hash))?;
                return self.rotate_left(new_root);
            }
            trace!(balance_factor = bf, "left rotation");
            return self.rotate_left(node.hash);
        }
        if bf < -1 {
            let left_node = self
                .get_node(node.left_hash.ok_or_else(|| integrity_missing(node_hash))?)?
                .ok_or_else(|| integrity_missing(node_hash))?;
            if self.node_height(left_node.right_hash)? - self.node_height(left_node.left_hash)? > 0
            {
                trace!(balance_factor = bf, "left-right rotation");
                let new_left_hash = self.rotate_left(left_node.hash)?;
                let new_root = self.create_inner_node(Some(new_left_hash), node.right_hash)?;
                return self.rotate_right(new_root);
            }
            trace!(balance_factor = bf, "right rotation");
            return self.rotate_right(node.hash);
        }
        Ok(node_hash)
    }

    fn rotate_left(&mut self, node_hash: NodeHash) -> Result<NodeHash> {
        let node = self
            .get_node(node_hash)?
            .ok_or_else(|| integrity_missing(node_hash))?;
        let r_hash = node.right_hash.ok_or_else(|| integrity_missing(node_hash))?;
        let r_node = self.get_node(r_hash)?.ok_or_else(|| integrity_missing(r_hash))?;
        let new_left = self.create_inner_node(node.left_hash, r_node.left_hash)?;
        self.create_inner_node(Some(new_left), r_node.right_hash)
    }

    fn rotate_right(&mut self, node_hash: NodeHash) -> Result<NodeHash> {
        let node = self
            .get_node(node_hash)?
            .ok_or_else(|| integrity_missing(node_hash))?;
        let l_hash = node.left_hash.ok_or_else(|| integrity_missing(node_hash))?;
        let l_node = self.get_node(l_hash)?.ok_or_else(|| integrity_missing(l_hash))?;
        let new_right = self.create_inner_node(l_node.right_hash, node.right_hash)?;
        self.create_inner_node(l_node.left_hash, Some(new_right))
    }

    /// Persists every new node reachable from the current root, assigns the next version,
    /// and returns its CommitID. A no-op commit (nothing mutated since the last call) returns
    /// the unchanged, existing CommitID, per the idempotence requirement.
    pub fn save_version(&mut self) -> Result<(i64, NodeHash)> {
        self.require_mutable("SaveVersion");
        if !self.dirty {
            return Ok((self.version, self.root_hash.unwrap_or(EMPTY_HASH)));
        }
        let store = self
            .store
            .clone()
            .ok_or_else(|| StoreError::InvalidValue("no backing store attached".into()))?;

        let next_version = self.version + 1;
        let root_hash = self.root_hash.unwrap_or(EMPTY_HASH);

        let mut batch = WriteBatch::new();
        for (hash, node) in &self.node_cache {
            let bytes = crate::encode::encode_node_canonical(node)?;
            batch.put(backing_store::node_key(hash), bytes);
        }
        batch.put(backing_store::root_key(next_version), root_hash.to_vec());
        batch.put(backing_store::retain_key(next_version), Vec::new());
        store.write_batch(&batch)?;

        self.version = next_version;
        self.dirty = false;
        self.node_cache.clear();

        Ok((next_version, root_hash))
    }

    /// Half-open range iteration `[start, end)`. `start`/`end` of `None` are unbounded.
    /// Panics (a programmer error, per the ordered-bound invariant) if `start > end`.
    pub fn iterate(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
    ) -> crate::iter::TreeIter {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                fatal::invalid_range(s, e);
            }
        }
        crate::iter::TreeIter::new(
            self.node_cache.clone(),
            self.store.clone(),
            self.root_hash,
            start.map(|s| s.to_vec()),
            end.map(|e| e.to_vec()),
            ascending,
        )
    }

    /// Returns the value at `key` (if any) together with a membership or absence proof
    /// rooted at this tree's current root hash.
    pub fn get_with_proof(&self, key: &[u8]) -> Result<(Option<Vec<u8>>, IavlProof)> {
        proof_builder::build_proof(self, key)
    }
}

impl Default for PersistentTree {
    fn default() -> Self {
        Self::new()
    }
}

fn integrity_missing(hash: NodeHash) -> StoreError {
    StoreError::Integrity {
        hash: hex::encode(hash),
        reason: "referenced node missing from cache and store".into(),
    }
}

fn version_is_retained(store: &dyn NodeStore, v: i64) -> Result<bool> {
    if v <= 0 {
        return Ok(false);
    }
    store.has(&backing_store::retain_key(v))
}

fn find_latest_version(store: &dyn NodeStore) -> Result<Option<i64>> {
    let upper = prefix_upper_bound(backing_store::ROOT_PREFIX);
    let mut iter = store.iter_range(Some(backing_store::ROOT_PREFIX), upper.as_deref(), true)?;
    match iter.next() {
        None => Ok(None),
        Some((key, _)) => {
            let suffix = &key[backing_store::ROOT_PREFIX.len()..];
            let bytes: [u8; 8] = suffix
                .try_into()
                .map_err(|_| StoreError::Integrity {
                    hash: hex::encode(suffix),
                    reason: "malformed root index key".into(),
                })?;
            Ok(Some(u64::from_be_bytes(bytes) as i64))
        }
    }
}

fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    lexicographical_successor(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::MemNodeStore;

    fn tree_with_store() -> PersistentTree {
        PersistentTree::with_store(Arc::new(MemNodeStore::new()))
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut tree = tree_with_store();
        tree.set(b"hello", Some(b"goodbye")).unwrap();
        assert_eq!(tree.get(b"hello").unwrap(), Some(b"goodbye".to_vec()));
    }

    #[test]
    fn test_set_returns_pre_existing() {
        let mut tree = tree_with_store();
        assert!(!tree.set(b"k", Some(b"1")).unwrap());
        assert!(tree.set(b"k", Some(b"2")).unwrap());
        assert_eq!(tree.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    #[should_panic(expected = "nil value")]
    fn test_set_nil_value_panics() {
        let mut tree = tree_with_store();
        let _ = tree.set(b"k", None);
    }

    #[test]
    fn test_delete_absent_key_is_noop() {
        let mut tree = tree_with_store();
        assert!(!tree.delete(b"missing").unwrap());
    }

    #[test]
    fn test_delete_removes_key() {
        let mut tree = tree_with_store();
        tree.set(b"k", Some(b"v")).unwrap();
        assert!(tree.delete(b"k").unwrap());
        assert_eq!(tree.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_save_version_is_idempotent_without_mutation() {
        let mut tree = tree_with_store();
        tree.set(b"k", Some(b"v")).unwrap();
        let first = tree.save_version().unwrap();
        let second = tree.save_version().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_version_advances_and_is_loadable() {
        let store = Arc::new(MemNodeStore::new());
        let mut tree = PersistentTree::with_store(store.clone());
        tree.set(b"hello", Some(b"goodbye")).unwrap();
        tree.set(b"aloha", Some(b"shalom")).unwrap();
        let (version, _root) = tree.save_version().unwrap();
        assert_eq!(version, 1);

        let loaded = PersistentTree::load_version(store, 1).unwrap();
        assert_eq!(loaded.get(b"hello").unwrap(), Some(b"goodbye".to_vec()));
        assert_eq!(loaded.get(b"aloha").unwrap(), Some(b"shalom".to_vec()));
    }

    #[test]
    fn test_overwrite_then_lazy_load_old_version() {
        let store = Arc::new(MemNodeStore::new());
        let mut tree = PersistentTree::with_store(store.clone());
        tree.set(b"hello", Some(b"goodbye")).unwrap();
        tree.save_version().unwrap();

        tree.set(b"hello", Some(b"adios")).unwrap();
        tree.save_version().unwrap();

        let v1 = PersistentTree::load_version(store.clone(), 1).unwrap();
        let v2 = PersistentTree::load_version(store, 2).unwrap();
        assert_eq!(v1.get(b"hello").unwrap(), Some(b"goodbye".to_vec()));
        assert_eq!(v2.get(b"hello").unwrap(), Some(b"adios".to_vec()));
    }

    #[test]
    fn test_load_unknown_version_is_pruned_or_unknown() {
        let store = Arc::new(MemNodeStore::new());
        let err = PersistentTree::load_version(store, 5).unwrap_err();
        assert!(matches!(err, StoreError::PrunedOrUnknownHeight(5)));
    }

    #[test]
    fn test_read_only_snapshot_panics_on_mutation() {
        let store = Arc::new(MemNodeStore::new());
        let mut tree = PersistentTree::with_store(store.clone());
        tree.set(b"k", Some(b"v")).unwrap();
        tree.save_version().unwrap();

        let mut snapshot = PersistentTree::load_version(store, 1).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = snapshot.set(b"k2", Some(b"v2"));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_root_hash_independent_of_insertion_order() {
        let mut a = tree_with_store();
        a.set(b"b", Some(b"2")).unwrap();
        a.set(b"a", Some(b"1")).unwrap();
        a.set(b"c", Some(b"3")).unwrap();
        let (_, root_a) = a.save_version().unwrap();

        let mut b = tree_with_store();
        b.set(b"c", Some(b"3")).unwrap();
        b.set(b"a", Some(b"1")).unwrap();
        b.set(b"b", Some(b"2")).unwrap();
        let (_, root_b) = b.save_version().unwrap();

        assert_eq!(root_a, root_b);
    }

    #[test]
    fn test_lexicographical_successor_all_0xff_has_no_successor() {
        assert_eq!(lexicographical_successor(&[0xFF, 0xFF, 0xFF]), None);
    }

    #[test]
    fn test_lexicographical_successor_carries_past_trailing_0xff() {
        assert_eq!(
            lexicographical_successor(&[55, 255, 255]),
            Some(vec![56])
        );
    }

    #[test]
    fn test_lexicographical_successor_empty_has_no_successor() {
        assert_eq!(lexicographical_successor(&[]), None);
    }

    #[test]
    fn test_balance_invariant_holds_after_many_inserts() {
        let mut tree = tree_with_store();
        for i in 0..200u32 {
            let key = format!("key-{i:05}");
            tree.set(key.as_bytes(), Some(b"v")).unwrap();
        }
        assert!(check_balanced(&tree, tree.root_hash));
    }

    fn check_balanced(tree: &PersistentTree, hash_opt: Option<NodeHash>) -> bool {
        let Some(hash) = hash_opt else { return true };
        let node = tree.get_node(hash).unwrap().unwrap();
        if node.is_leaf() {
            return true;
        }
        let lh = tree.node_height(node.left_hash).unwrap();
        let rh = tree.node_height(node.right_hash).unwrap();
        (lh - rh).abs() <= 1
            && check_balanced(tree, node.left_hash)
            && check_balanced(tree, node.right_hash)
    }
}
