//! BLAKE3 content hashing

use serde::Serialize;
use xshard_core::{Hash, XShardResult};

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash::from_bytes(*hash.as_bytes())
}

/// Default hash function (BLAKE3)
pub fn hash(data: &[u8]) -> Hash {
    blake3_hash(data)
}

/// Hash multiple pieces of data
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    Hash::from_bytes(*hash.as_bytes())
}

/// Hash the canonical JSON encoding of a value
///
/// Map-typed fields must be ordered (`BTreeMap`/`BTreeSet`) for the encoding,
/// and therefore the hash, to be deterministic.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> XShardResult<Hash> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hash(&bytes))
}
