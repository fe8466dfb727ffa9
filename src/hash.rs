//! The single hash function used throughout the store: nodes, proofs, and the subspace
//! query encoding all hash through here so there is exactly one algorithm to audit.

use sha2::{Digest, Sha256};

/// A 32-byte content hash. Node addresses, commit IDs, and proof sibling hashes are all this
/// type; nothing in this crate hashes to a different width.
pub type NodeHash = [u8; 32];

/// Canonical hash of an empty/absent child, distinct from any real node's hash with
/// overwhelming probability.
pub const EMPTY_HASH: NodeHash = [0u8; 32];

pub fn sha256(data: &[u8]) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_deterministic() {
        assert_eq!(sha256(b"hello"), sha256(b"hello"));
        assert_ne!(sha256(b"hello"), sha256(b"world"));
    }

    #[test]
    fn test_empty_hash_is_zero() {
        assert_eq!(EMPTY_HASH, [0u8; 32]);
    }
}
