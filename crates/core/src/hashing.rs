//! SHA-256 hex digests for steering-file checksums.

use sha2::{Digest, Sha256};

/// Compute a lowercase SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}
