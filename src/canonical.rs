//! Canonical serialization for snapshot fingerprints.
//!
//! Fingerprints must be stable for the same content:
//!
//! - Struct fields and tuples serialize in declaration order
//! - Slices serialize in index order, so callers hash feed-ordered data
//! - Maps in hashed data must be `BTreeMap`

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
///
/// Values that fail to serialize (non-string map keys) hash as empty input.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Compute the xxh64 hash of a value's canonical bytes.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Compute the canonical hash as a 16-digit hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}
