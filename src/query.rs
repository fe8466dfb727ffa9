//! The query engine (QE): the structured request/response protocol external verifying clients
//! use to read authenticated state, independent of any particular wire transport.
//!
//! This mirrors the shape of the teacher's ABCI query handler (`path`, `data`, `height`,
//! `prove` in, a `{code, value, proof, height}` response out) without the ABCI/gRPC
//! transport itself — that façade is an explicit collaborator outside this crate's scope. The
//! two request kinds this engine understands, `/key` and `/subspace`, are resolved against a
//! [`VersionedStore`] through an optional [`HeightCache`].

use crate::cache::HeightCache;
use crate::hash::NodeHash;
use crate::proof::IavlProof;
use crate::versioned::VersionedStore;
use avlkv_errors::{Result, StoreError};
use avlkv_log::debug;

/// Response status, per the error-handling design: 0 is success, everything else names a
/// specific failure kind so a caller never has to string-match a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Code {
    Ok = 0,
    NotFound = 1,
    PrunedOrUnknownHeight = 2,
    MalformedRequest = 3,
    InternalError = 4,
}

impl From<Code> for u32 {
    fn from(code: Code) -> u32 {
        code as u32
    }
}

/// Which structured query this request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPath {
    Key,
    Subspace,
}

impl QueryPath {
    /// Parses the slash-prefixed ASCII path (`/key`, `/subspace`) per the external interface
    /// contract. Anything else is a malformed request, not a panic — an unrecognized path is
    /// caller input, not a programmer error on this side.
    pub fn parse(path: &str) -> Option<Self> {
        match path {
            "/key" => Some(QueryPath::Key),
            "/subspace" => Some(QueryPath::Subspace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub path: String,
    pub data: Vec<u8>,
    pub height: i64,
    pub prove: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub code: Code,
    pub value: Vec<u8>,
    pub proof: Option<IavlProof>,
    pub height: i64,
    pub log: String,
}

impl QueryResponse {
    fn ok(value: Vec<u8>, height: i64, proof: Option<IavlProof>) -> Self {
        Self {
            code: Code::Ok,
            value,
            proof,
            height,
            log: String::new(),
        }
    }

    fn error(code: Code, height: i64, log: impl Into<String>) -> Self {
        Self {
            code,
            value: Vec::new(),
            proof: None,
            height,
            log: log.into(),
        }
    }
}

/// Resolves the `Height` field of a request into a concrete, retained version. `0` means
/// "latest minus one" (favoring already-finalized state); any positive height must name an
/// exact retained version.
///
/// If `latest - 1` has been pruned under a non-default retention policy, resolution falls
/// forward to the earliest retained version `>= latest - 1`, per §4.4 — unreachable under the
/// mandatory retain-all default, but implemented for the optional pruning policies.
pub fn resolve_height(store: &VersionedStore, requested: i64) -> Result<i64> {
    let latest = store.last_commit_id().version;
    if requested > 0 {
        if store.version_exists(requested)? {
            return Ok(requested);
        }
        return Err(StoreError::PrunedOrUnknownHeight(requested));
    }
    if requested < 0 {
        return Err(StoreError::MalformedRequest(format!(
            "height must be non-negative, got {requested}"
        )));
    }

    let target = latest - 1;
    if target >= 1 && store.version_exists(target)? {
        return Ok(target);
    }
    let mut candidate = target.max(1);
    while candidate <= latest {
        if store.version_exists(candidate)? {
            return Ok(candidate);
        }
        candidate += 1;
    }
    Err(StoreError::PrunedOrUnknownHeight(target))
}

/// Runs a query against `store`, using `cache` to skip re-traversing already-answered
/// `(version, key)` pairs. Queries only ever see committed versions — there is no path from
/// here back into the working set, which is exactly the point: uncommitted writes are never
/// observable to a verifying client.
pub fn run_query(
    store: &VersionedStore,
    cache: &dyn HeightCache,
    request: &QueryRequest,
) -> QueryResponse {
    debug!(
        path = %request.path,
        height = request.height,
        prove = request.prove,
        "running query"
    );
    let path = match QueryPath::parse(&request.path) {
        Some(p) => p,
        None => {
            return QueryResponse::error(
                Code::MalformedRequest,
                0,
                format!("unknown query path: {}", request.path),
            )
        }
    };

    let height = match resolve_height(store, request.height) {
        Ok(h) => h,
        Err(StoreError::PrunedOrUnknownHeight(h)) => {
            return QueryResponse::error(
                Code::PrunedOrUnknownHeight,
                h,
                format!("version {h} is pruned or was never committed"),
            )
        }
        Err(e) => return QueryResponse::error(Code::MalformedRequest, 0, e.to_string()),
    };

    match path {
        QueryPath::Key => run_key_query(store, cache, height, &request.data, request.prove),
        QueryPath::Subspace => run_subspace_query(store, height, &request.data),
    }
}

fn run_key_query(
    store: &VersionedStore,
    cache: &dyn HeightCache,
    height: i64,
    key: &[u8],
    prove: bool,
) -> QueryResponse {
    let snapshot = match store.lazy_load_store(height) {
        Ok(s) => s,
        Err(e) => return translate_error(e, height),
    };

    if prove {
        let (value, proof) = match snapshot.get_with_proof(key) {
            Ok(r) => r,
            Err(e) => return translate_error(e, height),
        };
        cache.store(height, key, value.clone());
        return QueryResponse::ok(value.unwrap_or_default(), height, Some(proof));
    }

    if let Some(cached) = cache.lookup(height, key) {
        return QueryResponse::ok(cached.unwrap_or_default(), height, None);
    }
    let value = match snapshot.get(key) {
        Ok(v) => v,
        Err(e) => return translate_error(e, height),
    };
    cache.store(height, key, value.clone());
    QueryResponse::ok(value.unwrap_or_default(), height, None)
}

fn run_subspace_query(store: &VersionedStore, height: i64, prefix: &[u8]) -> QueryResponse {
    let snapshot = match store.lazy_load_store(height) {
        Ok(s) => s,
        Err(e) => return translate_error(e, height),
    };

    let end = crate::tree::lexicographical_successor(prefix);
    let start = (!prefix.is_empty()).then(|| prefix.to_vec());
    let mut pairs = Vec::new();
    for item in snapshot.iterate(start.as_deref(), end.as_deref(), true) {
        match item {
            Ok(pair) => pairs.push(pair),
            Err(e) => return translate_error(e, height),
        }
    }

    match encode_subspace(&pairs) {
        Ok(encoded) => QueryResponse::ok(encoded, height, None),
        Err(e) => translate_error(e, height),
    }
}

/// Encodes `(key, value)` pairs per the subspace response encoding: each element as
/// `len(key) || key || len(value) || value` (varints), the whole sequence length-prefixed by
/// its element count — one varint codec for the whole crate, reused from the node encoding.
pub fn encode_subspace(pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    prost::encode_length_delimiter(pairs.len(), &mut out).map_err(|e| {
        StoreError::Integrity {
            hash: "<subspace>".into(),
            reason: format!("encode element count: {e}"),
        }
    })?;
    for (k, v) in pairs {
        prost::encode_length_delimiter(k.len(), &mut out).map_err(|e| StoreError::Integrity {
            hash: "<subspace>".into(),
            reason: format!("encode key length: {e}"),
        })?;
        out.extend_from_slice(k);
        prost::encode_length_delimiter(v.len(), &mut out).map_err(|e| StoreError::Integrity {
            hash: "<subspace>".into(),
            reason: format!("encode value length: {e}"),
        })?;
        out.extend_from_slice(v);
    }
    Ok(out)
}

/// Decodes the subspace response encoding back into its ordered pair sequence. Primarily for
/// tests and in-process verifying clients; an external client implements this independently
/// against the same wire contract.
pub fn decode_subspace(bytes: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut cursor = bytes;
    let count = prost::decode_length_delimiter(&mut cursor).map_err(|e| StoreError::Integrity {
        hash: "<subspace>".into(),
        reason: format!("decode element count: {e}"),
    })?;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let klen = prost::decode_length_delimiter(&mut cursor).map_err(|e| StoreError::Integrity {
            hash: "<subspace>".into(),
            reason: format!("decode key length: {e}"),
        })?;
        let (k, rest) = take(cursor, klen)?;
        cursor = rest;
        let vlen = prost::decode_length_delimiter(&mut cursor).map_err(|e| StoreError::Integrity {
            hash: "<subspace>".into(),
            reason: format!("decode value length: {e}"),
        })?;
        let (v, rest) = take(cursor, vlen)?;
        cursor = rest;
        pairs.push((k.to_vec(), v.to_vec()));
    }
    Ok(pairs)
}

fn take(cursor: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
    if cursor.len() < n {
        return Err(StoreError::Integrity {
            hash: "<subspace>".into(),
            reason: "truncated subspace record".into(),
        });
    }
    Ok(cursor.split_at(n))
}

fn translate_error(err: StoreError, height: i64) -> QueryResponse {
    match err {
        StoreError::PrunedOrUnknownHeight(h) => QueryResponse::error(
            Code::PrunedOrUnknownHeight,
            h,
            format!("version {h} is pruned or was never committed"),
        ),
        StoreError::Integrity { .. } => {
            QueryResponse::error(Code::InternalError, height, "internal integrity error")
        }
        other => QueryResponse::error(Code::InternalError, height, other.to_string()),
    }
}

/// Reconstructs the root hash a proof implies and compares it against a published root — the
/// verifier-side counterpart to `run_query`'s `Prove` path, usable without a store at all.
pub fn verify_response(root: &NodeHash, key: &[u8], response: &QueryResponse) -> Result<bool> {
    let Some(proof) = &response.proof else {
        return Err(StoreError::MalformedRequest(
            "response carries no proof to verify".into(),
        ));
    };
    let expected_value = matches!(proof, IavlProof::Existence(_)).then_some(response.value.as_slice());
    crate::proof::verify_iavl_proof(root, key, expected_value, proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::MemNodeStore;
    use crate::cache::NullCache;
    use crate::config::StoreConfig;
    use std::sync::Arc;

    fn store_with(pairs: &[(&str, &str)]) -> VersionedStore {
        let mut store = VersionedStore::open(Arc::new(MemNodeStore::new()), &StoreConfig::default())
            .unwrap();
        for (k, v) in pairs {
            store.set(k.as_bytes(), Some(v.as_bytes())).unwrap();
        }
        store.commit().unwrap();
        store
    }

    #[test]
    fn test_unknown_path_is_malformed() {
        let store = store_with(&[("a", "1")]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/bogus".into(),
                data: b"a".to_vec(),
                height: 0,
                prove: false,
            },
        );
        assert_eq!(response.code, Code::MalformedRequest);
    }

    #[test]
    fn test_key_query_returns_value() {
        let store = store_with(&[("hello", "goodbye")]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/key".into(),
                data: b"hello".to_vec(),
                height: 1,
                prove: false,
            },
        );
        assert_eq!(response.code, Code::Ok);
        assert_eq!(response.value, b"goodbye");
        assert_eq!(response.height, 1);
    }

    #[test]
    fn test_key_query_absent_key_returns_ok_empty_value() {
        let store = store_with(&[("hello", "goodbye")]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/key".into(),
                data: b"missing".to_vec(),
                height: 1,
                prove: false,
            },
        );
        assert_eq!(response.code, Code::Ok);
        assert!(response.value.is_empty());
    }

    #[test]
    fn test_key_query_with_proof_verifies() {
        let store = store_with(&[("hello", "goodbye"), ("aloha", "shalom")]);
        let snapshot = store.lazy_load_store(1).unwrap();
        let root = snapshot.root_hash().unwrap();
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/key".into(),
                data: b"hello".to_vec(),
                height: 1,
                prove: true,
            },
        );
        assert!(response.proof.is_some());
        assert!(verify_response(&root, b"hello", &response).unwrap());
    }

    #[test]
    fn test_subspace_query_matches_prefix_only() {
        let store = store_with(&[
            ("test1", "test1"),
            ("test2", "test2"),
            ("test3", "test3"),
            ("other", "value"),
        ]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/subspace".into(),
                data: b"test".to_vec(),
                height: 1,
                prove: false,
            },
        );
        assert_eq!(response.code, Code::Ok);
        let pairs = decode_subspace(&response.value).unwrap();
        assert_eq!(
            pairs,
            vec![
                (b"test1".to_vec(), b"test1".to_vec()),
                (b"test2".to_vec(), b"test2".to_vec()),
                (b"test3".to_vec(), b"test3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_subspace_query_empty_prefix_is_full_enumeration() {
        let store = store_with(&[("a", "1"), ("b", "2")]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/subspace".into(),
                data: Vec::new(),
                height: 1,
                prove: false,
            },
        );
        let pairs = decode_subspace(&response.value).unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_subspace_query_no_matches_is_ok_empty_list() {
        let store = store_with(&[("a", "1")]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/subspace".into(),
                data: b"zzz".to_vec(),
                height: 1,
                prove: false,
            },
        );
        assert_eq!(response.code, Code::Ok);
        assert!(decode_subspace(&response.value).unwrap().is_empty());
    }

    #[test]
    fn test_height_zero_resolves_to_latest_minus_one() {
        let mut store = store_with(&[("k1", "v1")]);
        store.set(b"k1", Some(b"v1-updated")).unwrap();
        store.commit().unwrap();
        assert_eq!(store.last_commit_id().version, 2);

        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/key".into(),
                data: b"k1".to_vec(),
                height: 0,
                prove: false,
            },
        );
        assert_eq!(response.height, 1);
        assert_eq!(response.value, b"v1");
    }

    #[test]
    fn test_unknown_height_is_pruned_or_unknown() {
        let store = store_with(&[("a", "1")]);
        let response = run_query(
            &store,
            &NullCache,
            &QueryRequest {
                path: "/key".into(),
                data: b"a".to_vec(),
                height: 99,
                prove: false,
            },
        );
        assert_eq!(response.code, Code::PrunedOrUnknownHeight);
    }

    #[test]
    fn test_subspace_response_round_trips_through_wire_encoding() {
        let pairs = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"bb".to_vec(), b"22".to_vec()),
        ];
        let encoded = encode_subspace(&pairs).unwrap();
        assert_eq!(decode_subspace(&encoded).unwrap(), pairs);
    }
}
