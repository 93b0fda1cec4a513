//! A deterministic, domain-separated 32-byte digest.
//!
//! Cryptographic hashing is treated as an opaque verified operation by this
//! system; callers never depend on a specific algorithm, only on the
//! properties that `hash32` is deterministic and `Identifier`-shaped.
//! Swapping the mixing function below for an externally-audited hash
//! (e.g. SHA-3) does not change any caller.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Hashes `domain || data` into a 32-byte digest by running four
/// differently-seeded 64-bit lanes and concatenating them.
pub fn hash32(domain: &[u8], data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (lane, chunk) in out.chunks_mut(8).enumerate() {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(lane as u64);
        hasher.write(domain);
        hasher.write_u8(0xff);
        hasher.write(data);
        chunk.copy_from_slice(&hasher.finish().to_be_bytes());
    }
    out
}
