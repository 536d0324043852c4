// src/hash.rs

//! SHA-1 content addressing for media assets
//!
//! Asset names are derived from the hash of their bytes, so bitwise-identical
//! content collapses to a single stored copy in every format that keys assets
//! by name. SHA-1 is used for addressing only, never for integrity.

use sha1::{Digest, Sha1};

/// Compute the lowercase hex SHA-1 digest of a byte slice
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_vector() {
        assert_eq!(
            sha1_hex(b"Hello world"),
            "7b502c3a1f48c8609ae212cdfb639dee39673f5e"
        );
    }

    #[test]
    fn test_sha1_empty() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
