//! Content hashing for function images, call nodes, and store keys.
//!
//! Hashes are fixed-width SHA-256 digests. The engine only ever compares
//! hashes for equality or combines them with XOR; the digest itself is treated
//! as opaque bytes everywhere else. Hashing of structured values goes through
//! [`Hasher`], which length-prefixes every field so that adjacent fields can
//! never collide by concatenation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Width of a [`ContentHash`] in bytes.
pub const HASH_LEN: usize = 32;

/// A fixed-width content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Combines two hashes bytewise. XOR and equality are the only operations
    /// the engine performs on digests.
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        let mut out = [0u8; HASH_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(HASH_LEN * 2);
        for byte in &self.0 {
            use fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

/// Incremental digest writer with domain separation and length prefixing.
pub(crate) struct Hasher {
    inner: Sha256,
}

impl Hasher {
    /// Creates a hasher seeded with a domain tag, so digests from different
    /// subsystems (images, call nodes, store keys) can never be confused.
    pub(crate) fn new(domain: &str) -> Self {
        let mut inner = Sha256::new();
        inner.update((domain.len() as u64).to_le_bytes());
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    pub(crate) fn update_str(&mut self, text: &str) {
        self.update(text.as_bytes());
    }

    pub(crate) fn update_u64(&mut self, value: u64) {
        self.inner.update(value.to_le_bytes());
    }

    /// Writes a single tag byte, used to separate enum variants.
    pub(crate) fn tag(&mut self, tag: u8) {
        self.inner.update([tag]);
    }

    pub(crate) fn finish(self) -> ContentHash {
        ContentHash(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_self_inverse() {
        let mut h = Hasher::new("test");
        h.update_str("a");
        let a = h.finish();
        let mut h = Hasher::new("test");
        h.update_str("b");
        let b = h.finish();

        assert_ne!(a, b);
        assert_eq!(a.xor(&b).xor(&b), a);
    }

    #[test]
    fn length_prefix_prevents_concatenation_collisions() {
        let mut h = Hasher::new("test");
        h.update_str("ab");
        h.update_str("c");
        let left = h.finish();

        let mut h = Hasher::new("test");
        h.update_str("a");
        h.update_str("bc");
        let right = h.finish();

        assert_ne!(left, right);
    }
}
