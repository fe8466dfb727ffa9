//! Store-construction configuration: RocksDB tuning for the backing store, and the
//! retention policy governing which committed versions remain loadable.
//!
//! This is deliberately narrow. It configures the pieces of this crate that are genuinely
//! parameterizable; it is not an application bootstrap/config layer, which stays a
//! collaborator's concern.

use serde::{Deserialize, Serialize};

/// RocksDB tuning knobs for the backing store, mirroring the options a production store
/// needs to adjust for its workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Size of the LRU block cache in bytes.
    pub cache_size: Option<usize>,
    /// Size of the write buffer (memtable) in bytes.
    pub write_buffer_size: Option<usize>,
    /// Maximum number of open file descriptors.
    pub max_open_files: Option<i32>,
    /// Size of on-disk blocks in bytes.
    pub block_size: Option<usize>,
    /// Compression codec: "lz4", "snappy", "zstd", "none".
    pub compression: Option<String>,
    /// Compaction style: "level", "universal", "fifo".
    pub compaction_style: Option<String>,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            cache_size: Some(512 * 1024 * 1024),
            write_buffer_size: Some(64 * 1024 * 1024),
            max_open_files: Some(5000),
            block_size: Some(4 * 1024),
            compression: Some("lz4".to_string()),
            compaction_style: Some("level".to_string()),
        }
    }
}

/// Which committed versions remain loadable after a commit. Only `RetainAll` is mandated by
/// the data model's retained-version-set contract; the others are optional extensions a
/// caller may opt into explicitly. `RetainAll` is the default — nothing is ever pruned unless
/// a caller configures one of the other variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RetentionPolicy {
    RetainAll,
    RetainLastN { n: u64 },
    RetainEveryKPlusLastN { k: u64, n: u64 },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::RetainAll
    }
}

impl RetentionPolicy {
    /// Whether `version` should still be retained once `latest` is the newest committed
    /// version. `RetainAll` never prunes, matching the spec's mandatory default.
    pub fn retains(&self, version: i64, latest: i64) -> bool {
        match *self {
            RetentionPolicy::RetainAll => true,
            RetentionPolicy::RetainLastN { n } => (latest - version) < n as i64,
            RetentionPolicy::RetainEveryKPlusLastN { k, n } => {
                (latest - version) < n as i64 || (k > 0 && version % (k as i64) == 0)
            }
        }
    }
}

/// Construction-time configuration for a store instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub rocksdb: RocksDbConfig,
    pub retention: RetentionPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_all_never_prunes() {
        let p = RetentionPolicy::RetainAll;
        assert!(p.retains(1, 1000));
    }

    #[test]
    fn test_retain_last_n() {
        let p = RetentionPolicy::RetainLastN { n: 3 };
        assert!(p.retains(8, 10));
        assert!(!p.retains(6, 10));
    }

    #[test]
    fn test_default_is_retain_all() {
        assert_eq!(RetentionPolicy::default(), RetentionPolicy::RetainAll);
    }
}
