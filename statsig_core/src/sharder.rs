//! Sharder implementation.
use base64::Engine;
use sha2::{Digest, Sha256};

pub trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
pub struct Sha256Sharder;

impl Sharder for Sha256Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        hash_unit(input) % total_shards
    }
}

/// First 8 bytes of SHA-256 over `input`, read as a big-endian unsigned integer.
pub fn hash_unit(input: impl AsRef<[u8]>) -> u64 {
    let digest = Sha256::digest(input);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// ID lists store hashed IDs: the first 8 characters of base64(SHA-256(id)).
pub fn hash_id_for_list(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let mut encoded = base64::engine::general_purpose::STANDARD.encode(digest);
    encoded.truncate(8);
    encoded
}
