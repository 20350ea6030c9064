//! Structural hashing for model values.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute the SHA256 hash of a model value's canonical JSON form.
///
/// Two values with the same serialized structure hash identically, which
/// is what the optimizer uses to detect duplicate filters and sketches.
/// Returns a 64-character lowercase hexadecimal string.
///
/// # Errors
/// Returns an error if the value cannot be serialized to JSON.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(hash_str(&json))
}

/// SHA256 of an already-canonical string.
pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}
