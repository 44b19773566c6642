//! Schedule key derivation.

use sha2::{Digest, Sha256};

/// Separator between key parts. Not expected inside ids, addresses or tokens.
const PART_SEPARATOR: &[u8] = &[0x1f];

/// Derive a stable schedule key from the identifying parts of a job.
///
/// The key is the hex encoded SHA-256 digest of the parts, so equal parts
/// always map to the same key and the key length does not depend on input.
pub fn schedule_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(PART_SEPARATOR);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
