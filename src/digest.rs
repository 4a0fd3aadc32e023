// Copyright (c) 2025 The signed-image-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

pub const DIGEST_SHA256_PREFIX: &str = "sha256:";

/// Digest a blob the way registries address it.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}{}", DIGEST_SHA256_PREFIX, hex::encode(Sha256::digest(data)))
}

/// The bare hex part of a `sha256:`-prefixed digest. Digests without the
/// prefix are returned unchanged.
pub fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix(DIGEST_SHA256_PREFIX).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_digest() {
        let digest = sha256_digest(b"");
        assert_eq!(
            digest,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_hex() {
        assert_eq!(digest_hex("sha256:abc123"), "abc123");
        assert_eq!(digest_hex("abc123"), "abc123");
    }
}
