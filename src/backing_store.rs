//! The opaque byte-oriented backing store the tree persists into, plus two implementations:
//! an in-memory `BTreeMap` adapter for tests and small embedded uses, and a RocksDB-backed
//! adapter for everything else.
//!
//! Namespacing (per the persisted-state layout): node records live under `n/<hash>`, the
//! version-to-root-hash index lives under `r/<be_u64_version>`, and retention markers live
//! under `v/<be_u64_version>`. All three share one backing store instance and are
//! distinguished purely by key prefix, since the contract only promises an ordered flat
//! keyspace.

use avlkv_errors::{Result, StoreError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

pub const NODE_PREFIX: &[u8] = b"n/";
pub const ROOT_PREFIX: &[u8] = b"r/";
pub const RETAIN_PREFIX: &[u8] = b"v/";

pub fn node_key(hash: &[u8; 32]) -> Vec<u8> {
    let mut k = Vec::with_capacity(NODE_PREFIX.len() + 32);
    k.extend_from_slice(NODE_PREFIX);
    k.extend_from_slice(hash);
    k
}

pub fn root_key(version: i64) -> Vec<u8> {
    let mut k = Vec::with_capacity(ROOT_PREFIX.len() + 8);
    k.extend_from_slice(ROOT_PREFIX);
    k.extend_from_slice(&(version as u64).to_be_bytes());
    k
}

pub fn retain_key(version: i64) -> Vec<u8> {
    let mut k = Vec::with_capacity(RETAIN_PREFIX.len() + 8);
    k.extend_from_slice(RETAIN_PREFIX);
    k.extend_from_slice(&(version as u64).to_be_bytes());
    k
}

/// An atomic group of writes. The backing store guarantees all-or-nothing application; the
/// tree relies on this to keep a commit's node records, root index entry, and retention
/// marker from ever becoming partially visible.
#[derive(Default, Debug, Clone)]
pub struct WriteBatch {
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.puts.push((key, value));
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.deletes.push(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }
}

/// An opaque, ordered byte-to-byte key/value collection. No transactions beyond the batch
/// are assumed; implementations only need to guarantee that a single `write_batch` call is
/// atomic.
pub trait NodeStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write_batch(&batch)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.write_batch(&batch)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()>;

    /// Forward or reverse range iteration over `[start, end)`. Either bound may be absent,
    /// meaning unbounded on that side.
    fn iter_range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;
}

/// An in-memory backing store. Used by every test in this crate and by embedded callers who
/// don't need durability.
#[derive(Default)]
pub struct MemNodeStore {
    inner: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemNodeStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut guard = self.inner.lock();
        for (k, v) in &batch.puts {
            guard.insert(k.clone(), v.clone());
        }
        for k in &batch.deletes {
            guard.remove(k);
        }
        Ok(())
    }

    fn iter_range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let lower = match start {
            Some(s) => Bound::Included(s.to_vec()),
            None => Bound::Unbounded,
        };
        let upper = match end {
            Some(e) => Bound::Excluded(e.to_vec()),
            None => Bound::Unbounded,
        };
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = self
            .inner
            .lock()
            .range((lower, upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let iter: Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)>> = if reverse {
            Box::new(snapshot.into_iter().rev())
        } else {
            Box::new(snapshot.into_iter())
        };
        Ok(iter)
    }
}

/// A RocksDB-backed store. Nodes, root index entries, and retention markers share a single
/// column family, distinguished by the `n/`, `r/`, `v/` key prefixes.
pub struct RocksNodeStore {
    db: Arc<rocksdb::DB>,
}

impl RocksNodeStore {
    pub fn open(path: &std::path::Path, config: &crate::config::RocksDbConfig) -> Result<Self> {
        let opts = configure_db_options(config)?;
        let db = rocksdb::DB::open(&opts, path)
            .map_err(|e| StoreError::backend("open", None, e))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn db(&self) -> &Arc<rocksdb::DB> {
        &self.db
    }
}

impl NodeStore for RocksNodeStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StoreError::backend("get", Some(key), e))
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut wb = rocksdb::WriteBatch::default();
        for (k, v) in &batch.puts {
            wb.put(k, v);
        }
        for k in &batch.deletes {
            wb.delete(k);
        }
        self.db
            .write(wb)
            .map_err(|e| StoreError::backend("write_batch", None, e))
    }

    fn iter_range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        reverse: bool,
    ) -> Result<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let end = end.map(|e| e.to_vec());
        let mode = match start {
            Some(s) => rocksdb::IteratorMode::From(
                s,
                if reverse {
                    rocksdb::Direction::Reverse
                } else {
                    rocksdb::Direction::Forward
                },
            ),
            None if reverse => rocksdb::IteratorMode::End,
            None => rocksdb::IteratorMode::Start,
        };
        let iter = self.db.iterator(mode).filter_map(move |item| {
            let (k, v) = item.ok()?;
            if let Some(end) = &end {
                if reverse {
                    if k.as_ref() >= end.as_slice() {
                        return None;
                    }
                } else if k.as_ref() >= end.as_slice() {
                    return None;
                }
            }
            Some((k.to_vec(), v.to_vec()))
        });
        Ok(Box::new(iter))
    }
}

fn configure_db_options(config: &crate::config::RocksDbConfig) -> Result<rocksdb::Options> {
    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    if let Some(compression) = &config.compression {
        let compression_type = match compression.as_str() {
            "lz4" => rocksdb::DBCompressionType::Lz4,
            "snappy" => rocksdb::DBCompressionType::Snappy,
            "zstd" => rocksdb::DBCompressionType::Zstd,
            "none" => rocksdb::DBCompressionType::None,
            other => {
                return Err(StoreError::InvalidValue(format!(
                    "unknown compression type: {other}"
                )))
            }
        };
        opts.set_compression_type(compression_type);
    }

    let mut block_opts = rocksdb::BlockBasedOptions::default();
    if let Some(cache_size) = config.cache_size {
        let cache = rocksdb::Cache::new_lru_cache(cache_size);
        block_opts.set_block_cache(&cache);
    }
    if let Some(write_buffer_size) = config.write_buffer_size {
        opts.set_write_buffer_size(write_buffer_size);
    }
    if let Some(max_open_files) = config.max_open_files {
        opts.set_max_open_files(max_open_files);
    }
    if let Some(block_size) = config.block_size {
        block_opts.set_block_size(block_size);
    }
    opts.set_block_based_table_factory(&block_opts);

    if let Some(compaction_style) = &config.compaction_style {
        match compaction_style.as_str() {
            "level" => opts.set_level_compaction_dynamic_level_bytes(true),
            "universal" => opts.set_universal_compaction_options(&Default::default()),
            "fifo" => opts.set_fifo_compaction_options(&Default::default()),
            other => {
                return Err(StoreError::InvalidValue(format!(
                    "unknown compaction style: {other}"
                )))
            }
        }
    }

    opts.set_bytes_per_sync(1024 * 1024);
    opts.set_max_background_jobs(4);

    Ok(opts)
}
