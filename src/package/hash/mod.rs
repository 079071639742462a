//! Content digests for the package store.
//!
//! Every blob written through the local-file scheme is named by the BLAKE3
//! digest of its serialized bytes. The caching loader uses the same digest,
//! taken over the URL string, as its cache key so that case-insensitive
//! filesystems never collide on two URLs that differ only in case.

/// A 256-bit BLAKE3 content hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn digest(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Lowercase hex, the form used in file names and `file://` URLs.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Parse 64 hex characters (either case). Anything else is `None`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex)
            .ok()
            .map(|hash| Self(*hash.as_bytes()))
    }
}
