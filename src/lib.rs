//! avlkv: a versioned, Merkleized key-value store.
//!
//! State is organized as an immutable, height-balanced, content-addressed binary tree per
//! committed version. The crate is layered bottom-up:
//!
//! - [`tree`] — the persistent tree (PT): the balanced, hash-addressed core.
//! - [`versioned`] — the versioned store (VS): a mutable working set over PT, with commit and
//!   historical lazy-load.
//! - [`cache`] — the height cache (HC): an optional read-through cache over `(version, key)`.
//! - [`query`] — the query engine (QE): the structured point/subspace query protocol external
//!   verifying clients use.
//!
//! `node`, `encode`, `hash`, `proof`, and `proof_builder` are the supporting primitives PT and
//! QE are built on; `backing_store` is the opaque byte-oriented persistence contract, with an
//! in-memory and a RocksDB-backed implementation; `config` holds the construction-time
//! configuration surface.
//!
//! This crate has no HTTP/RPC façade, no command routing, no governance wire format, and no
//! peer whitelist — those are external collaborators per its specification. It exposes plain
//! construction functions and holds no process-wide state.

pub mod backing_store;
pub mod cache;
pub mod config;
pub mod encode;
pub mod hash;
pub mod iter;
pub mod node;
pub mod proof;
pub mod proof_builder;
pub mod query;
pub mod tree;
pub mod versioned;

pub use backing_store::{MemNodeStore, NodeStore, RocksNodeStore};
pub use cache::{HeightCache, LruHeightCache, NullCache};
pub use config::{RetentionPolicy, RocksDbConfig, StoreConfig};
pub use hash::NodeHash;
pub use iter::TreeIter;
pub use proof::{verify_iavl_proof, ExistenceProof, IavlProof, NonExistenceProof};
pub use query::{run_query, Code, QueryPath, QueryRequest, QueryResponse};
pub use tree::PersistentTree;
pub use versioned::{CommitId, VersionedStore};
