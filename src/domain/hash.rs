/**
 * Content hasher (component B): a strong ETag is a quoted hex
 * sha-256 digest of the stored bytes (spec §3, §8 invariant 1).
 */
use sha2::{Digest, Sha256};

pub fn etag_for(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("\"{}\"", hex::encode(digest))
}
