//! Error types for the avlkv versioned Merkleized key-value store.
//!
//! Recoverable conditions are modeled as [`StoreError`] variants. Programmer errors (a nil
//! value passed to `Set`, a mutation attempted on a read-only snapshot, an inverted iteration
//! range) are never wrapped in `Result` — they panic via the helpers in [`fatal`], by design:
//! these are bugs in the caller, not conditions a caller can usefully recover from.

use thiserror::Error;

/// Core error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store failed to complete an I/O operation. Retryable; the in-memory tree
    /// state is unaffected.
    #[error("backing store error during {operation} (key prefix {key_prefix:?}): {source}")]
    Backend {
        operation: &'static str,
        key_prefix: Option<Vec<u8>>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A persisted node's hash did not match its decoded contents, or the record could not be
    /// decoded at all. Fatal to the version being loaded; the rest of the store is unaffected.
    #[error("integrity error loading node {hash}: {reason}")]
    Integrity { hash: String, reason: String },

    /// The requested version was never committed, or has been pruned.
    #[error("version {0} is pruned or was never committed")]
    PrunedOrUnknownHeight(i64),

    /// The requested key does not exist in the resolved version.
    #[error("key not found")]
    NotFound,

    /// A query request was malformed (unknown path, non-ascii path, negative height that
    /// isn't the reserved 0 sentinel, etc).
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A value supplied by the caller violated a documented constraint (key too long, value
    /// exceeding the configured maximum) but is not itself a programmer-error abort condition.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn backend(
        operation: &'static str,
        key_prefix: Option<&[u8]>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Backend {
            operation,
            key_prefix: key_prefix.map(|k| k.to_vec()),
            source: Box::new(source),
        }
    }
}

/// Fatal/programmer-error aborts, per the error taxonomy: these surface as panics rather than
/// `Result`s, because the calling code itself is wrong and must be fixed, not handled.
pub mod fatal {
    /// `Set` was called with a nil value. I5 in the data model forbids this unconditionally.
    pub fn nil_value_set() -> ! {
        panic!("avlkv: Set called with a nil value; this is a programmer error and is never recoverable")
    }

    /// A mutating call landed on a store loaded read-only via `LazyLoadStore`.
    pub fn mutation_on_readonly_snapshot(operation: &str) -> ! {
        panic!("avlkv: attempted to {operation} on a read-only historical snapshot")
    }

    /// An iteration range had `start > end`.
    pub fn invalid_range(start: &[u8], end: &[u8]) -> ! {
        panic!("avlkv: invalid iteration range: start {start:?} > end {end:?}")
    }
}
