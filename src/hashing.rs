// IPFS Kit Core - Sketch Hashing
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// SHA-256 based hash derivation shared by the Bloom filter, HyperLogLog
// and Count-Min Sketch. Stable across runs so persisted sketches stay valid.

use sha2::{Digest, Sha256};

fn word(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Two independent 64-bit base hashes for double hashing.
/// The second is forced odd so `h1 + i*h2` never collapses to one index.
pub(crate) fn hash_pair(item: &[u8]) -> (u64, u64) {
    let digest = Sha256::digest(item);
    (word(&digest[0..8]), word(&digest[8..16]) | 1)
}

/// 64-bit hash of `item` under `seed`
pub(crate) fn seeded_hash(item: &[u8], seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(item);
    word(&hasher.finalize()[0..8])
}

/// Hex SHA-256 of arbitrary bytes (used for content fingerprints in logs)
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
