//! The height cache (HC): an optional read-through cache keyed by `(version, key)`, used to
//! amortize repeated lookups against deep historical trees.
//!
//! Two implementations are provided. [`NullCache`] is the always-available default — it never
//! stores anything, which keeps test behavior deterministic and gives callers who don't want
//! a cache a zero-cost opt-out. [`LruHeightCache`] is the real implementation, an `lru` map
//! guarded by a `parking_lot::Mutex`, with atomic hit/miss counters in the spirit of the
//! teacher's cache-statistics helper.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// `(version, key)` identifies a point lookup against an immutable, committed version — never
/// the working set, which is never cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub version: i64,
    pub key: Vec<u8>,
}

/// A `(version, key)` → value-or-absent read-through cache. The outer `Option` returned by
/// `lookup` distinguishes "not cached" from "cached"; the inner `Option` encodes
/// present/absent at that version, so a cached miss is itself a useful answer.
pub trait HeightCache: Send + Sync {
    fn lookup(&self, version: i64, key: &[u8]) -> Option<Option<Vec<u8>>>;

    fn store(&self, version: i64, key: &[u8], result: Option<Vec<u8>>);

    /// Drops all entries for `version`. Called when `version` is pruned — a pruned version's
    /// cached answers must never be served again, since they can no longer be checked against
    /// a loadable root.
    fn invalidate(&self, version: i64);
}

/// The null cache: always a miss, every store discarded. A first-class citizen, not a
/// placeholder — this is what a caller reaches for when deterministic test behavior matters
/// more than amortizing historical lookups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl HeightCache for NullCache {
    fn lookup(&self, _version: i64, _key: &[u8]) -> Option<Option<Vec<u8>>> {
        None
    }

    fn store(&self, _version: i64, _key: &[u8], _result: Option<Vec<u8>>) {}

    fn invalidate(&self, _version: i64) {}
}

/// An LRU-bounded height cache. Committed history is immutable, so a cached `(version, key)`
/// entry is valid forever until an explicit `invalidate` (on pruning) — there is no TTL and no
/// write-path invalidation to worry about, only eviction under memory pressure.
pub struct LruHeightCache {
    inner: Mutex<LruCache<CacheKey, Option<Vec<u8>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruHeightCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let (hits, misses) = self.cache_stats();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeightCache for LruHeightCache {
    fn lookup(&self, version: i64, key: &[u8]) -> Option<Option<Vec<u8>>> {
        let cache_key = CacheKey {
            version,
            key: key.to_vec(),
        };
        let mut guard = self.inner.lock();
        match guard.get(&cache_key) {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(result.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn store(&self, version: i64, key: &[u8], result: Option<Vec<u8>>) {
        let cache_key = CacheKey {
            version,
            key: key.to_vec(),
        };
        self.inner.lock().put(cache_key, result);
    }

    fn invalidate(&self, version: i64) {
        self.inner.lock().retain(|k, _| k.version != version);
    }
}

/// `lru::LruCache` has no built-in `retain`; this extension implements the one operation the
/// height cache needs (drop every entry for a pruned version) by draining and reinserting the
/// survivors, which preserves recency order for everything that stays.
trait RetainExt<K, V> {
    fn retain(&mut self, f: impl FnMut(&K, &mut V) -> bool);
}

impl<K: std::hash::Hash + Eq + Clone, V> RetainExt<K, V> for LruCache<K, V> {
    fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        let capacity = self.cap();
        let entries: Vec<(K, V)> =
            std::mem::replace(self, LruCache::unbounded()).into_iter().collect();
        *self = LruCache::new(capacity);
        for (k, mut v) in entries {
            if f(&k, &mut v) {
                self.put(k, v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_cache_never_hits() {
        let cache = NullCache;
        cache.store(1, b"k", Some(b"v".to_vec()));
        assert_eq!(cache.lookup(1, b"k"), None);
    }

    #[test]
    fn test_lru_cache_hit_after_store() {
        let cache = LruHeightCache::new(NonZeroUsize::new(16).unwrap());
        cache.store(1, b"k", Some(b"v".to_vec()));
        assert_eq!(cache.lookup(1, b"k"), Some(Some(b"v".to_vec())));
    }

    #[test]
    fn test_lru_cache_distinguishes_absent_from_uncached() {
        let cache = LruHeightCache::new(NonZeroUsize::new(16).unwrap());
        assert_eq!(cache.lookup(1, b"missing"), None);
        cache.store(1, b"missing", None);
        assert_eq!(cache.lookup(1, b"missing"), Some(None));
    }

    #[test]
    fn test_lru_cache_keys_are_version_scoped() {
        let cache = LruHeightCache::new(NonZeroUsize::new(16).unwrap());
        cache.store(1, b"k", Some(b"v1".to_vec()));
        cache.store(2, b"k", Some(b"v2".to_vec()));
        assert_eq!(cache.lookup(1, b"k"), Some(Some(b"v1".to_vec())));
        assert_eq!(cache.lookup(2, b"k"), Some(Some(b"v2".to_vec())));
    }

    #[test]
    fn test_invalidate_drops_only_that_version() {
        let cache = LruHeightCache::new(NonZeroUsize::new(16).unwrap());
        cache.store(1, b"k", Some(b"v1".to_vec()));
        cache.store(2, b"k", Some(b"v2".to_vec()));
        cache.invalidate(1);
        assert_eq!(cache.lookup(1, b"k"), None);
        assert_eq!(cache.lookup(2, b"k"), Some(Some(b"v2".to_vec())));
    }

    #[test]
    fn test_cache_stats_track_hits_and_misses() {
        let cache = LruHeightCache::new(NonZeroUsize::new(16).unwrap());
        cache.store(1, b"k", Some(b"v".to_vec()));
        let _ = cache.lookup(1, b"k");
        let _ = cache.lookup(1, b"missing");
        let (hits, misses) = cache.cache_stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!((cache.cache_hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
