//! The versioned store (VS): the mutable, application-facing surface over a persistent tree.
//!
//! `PersistentTree` already owns the root index and retention markers — see the module
//! comment in `tree.rs` — so this layer is intentionally thin: it opens the latest tree,
//! forwards reads and writes to it, and adds exactly two things the tree itself doesn't know
//! about: a `CommitID` value type for callers to compare against, and retention-policy
//! enforcement at commit time.

use crate::backing_store::{self, NodeStore, WriteBatch};
use crate::config::{RetentionPolicy, StoreConfig};
use crate::hash::{NodeHash, EMPTY_HASH};
use crate::iter::TreeIter;
use crate::tree::{lexicographical_successor, PersistentTree};
use avlkv_errors::{Result, StoreError};
use avlkv_log::info;
use std::sync::Arc;

/// A committed version paired with the root hash it committed to. Two stores at the same
/// `CommitId` are guaranteed to agree on every key they hold, by the tree's hash-consistency
/// invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitId {
    pub version: i64,
    pub root_hash: NodeHash,
}

pub struct VersionedStore {
    tree: PersistentTree,
    store: Arc<dyn NodeStore>,
    retention: RetentionPolicy,
}

impl VersionedStore {
    /// Opens the store at its latest committed version (or a fresh empty tree if nothing has
    /// ever been committed), ready to accept further mutations.
    pub fn open(store: Arc<dyn NodeStore>, config: &StoreConfig) -> Result<Self> {
        let tree = PersistentTree::open_latest(store.clone())?;
        Ok(Self {
            tree,
            store,
            retention: config.retention,
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree.get(key)
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        self.tree.has(key)
    }

    /// `value = None` means the nil sentinel, per the no-nil invariant; this panics rather
    /// than returning an error, matching `PersistentTree::set`.
    pub fn set(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
        self.tree.set(key, value)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.tree.delete(key)
    }

    /// Commits the current working set as a new version, then applies the retention policy
    /// to any versions that have fallen out of the retained set.
    pub fn commit(&mut self) -> Result<CommitId> {
        let (version, root_hash) = self.tree.save_version()?;
        info!(version, root_hash = %hex::encode(root_hash), "committed new version");
        self.prune(version)?;
        Ok(CommitId { version, root_hash })
    }

    pub fn last_commit_id(&self) -> CommitId {
        CommitId {
            version: self.tree.latest_version(),
            root_hash: self.tree.root_hash().unwrap_or(EMPTY_HASH),
        }
    }

    pub fn version_exists(&self, version: i64) -> Result<bool> {
        PersistentTree::version_exists(self.store.as_ref(), version)
    }

    /// Opens a read-only snapshot of a historical version. Mutating it is a programmer error
    /// and panics, matching the read-only contract on any tree loaded this way.
    pub fn lazy_load_store(&self, version: i64) -> Result<PersistentTree> {
        PersistentTree::load_version(self.store.clone(), version)
    }

    pub fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> TreeIter {
        self.tree.iterate(start, end, true)
    }

    pub fn reverse_iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> TreeIter {
        self.tree.iterate(start, end, false)
    }

    fn prune(&self, latest: i64) -> Result<()> {
        if matches!(self.retention, RetentionPolicy::RetainAll) {
            return Ok(());
        }
        let upper = lexicographical_successor(backing_store::RETAIN_PREFIX);
        let markers: Vec<Vec<u8>> = self
            .store
            .iter_range(Some(backing_store::RETAIN_PREFIX), upper.as_deref(), false)?
            .map(|(k, _)| k)
            .collect();

        let mut batch = WriteBatch::new();
        for key in markers {
            let suffix = &key[backing_store::RETAIN_PREFIX.len()..];
            let bytes: [u8; 8] = suffix.try_into().map_err(|_| StoreError::Integrity {
                hash: hex::encode(suffix),
                reason: "malformed retention marker key".into(),
            })?;
            let version = u64::from_be_bytes(bytes) as i64;
            if !self.retention.retains(version, latest) {
                batch.delete(key);
                batch.delete(backing_store::root_key(version));
                // Node records are content-addressed and may still be shared with a
                // retained version, so they are left in place; this prunes reachability
                // into `version`, not the nodes it once referenced.
            }
        }
        if !batch.is_empty() {
            self.store.write_batch(&batch)?;
        }
        Ok(())
    }
}
