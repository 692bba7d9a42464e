//! Hashing Utilities

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content and return as hex string
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash the JSON rendering of a value.
///
/// Callers make the value canonical first (sorted maps, normalized strings)
/// so equal requests hash equally.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(content_hash(&serde_json::to_string(value)?))
}
