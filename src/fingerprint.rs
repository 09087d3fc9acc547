//! Content-addressed document fingerprints.
//!
//! A fingerprint is the lowercase hex SHA-256 digest of the document's raw
//! bytes and is the sole cache key: identical uploads map to the same
//! persisted index, distinct uploads collide with cryptographically
//! negligible probability.

use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a document's bytes, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentFingerprint(String);

impl DocumentFingerprint {
    /// Hex digest as a string slice. Safe to use as a directory name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a byte sequence.
///
/// Pure and deterministic. Empty input yields the digest of the empty byte
/// sequence, not an error.
pub fn fingerprint(bytes: &[u8]) -> DocumentFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    DocumentFingerprint(format!("{:x}", hasher.finalize()))
}
