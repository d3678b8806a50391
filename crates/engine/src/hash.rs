// Content hashing for frontier tags and edit preconditions.
//
// SHA-256, lowercase hex. Used wherever a hash crosses the wire or acts as
// an optimistic-concurrency precondition; in-memory caches use the cheaper
// std hasher instead.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 hash.
pub type ContentHash = String;

/// Compute the SHA-256 hash of the given bytes, returned as a lowercase hex string.
pub fn sha256_hex(content: &[u8]) -> ContentHash {
    let digest = Sha256::digest(content);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
