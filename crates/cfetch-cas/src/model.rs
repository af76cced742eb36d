//! Identity types shared by the registry, the store and the engine.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Metadata for one encrypted sub-chunk inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Ciphertext length in bytes (equal to the plaintext length, CFB is a stream mode)
    pub length: usize,
    /// Type-tagged key material: one tag byte followed by the raw key
    pub encryption_key: Option<Vec<u8>>,
    /// Type-tagged truncated double-SHA-256 of the plaintext
    pub checksum: Option<Vec<u8>>,
}

/// Identity of one network-fetchable bundle of encrypted chunks.
///
/// Compared and hashed by value: two containers with the same request and the
/// same chunk list are the same container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    pub host: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<ChunkMeta>,
}

impl ContainerId {
    /// Total payload size the container is expected to have, or `None` if the
    /// declared chunk lengths do not fit in a `usize`.
    pub fn payload_len(&self) -> Option<usize> {
        self.chunks
            .iter()
            .try_fold(0usize, |total, c| total.checked_add(c.length))
    }

    /// Short human-readable form for logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.host, self.path.trim_start_matches('/'))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.label())
    }
}

/// Shared handle to a container identity.
pub type ContainerRef = Arc<ContainerId>;

/// Pointer to one decrypted sub-chunk inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    pub container: ContainerRef,
    pub index: usize,
}

impl ChunkRef {
    pub fn new(container: ContainerRef, index: usize) -> Self {
        Self { container, index }
    }
}

/// Content hash identifying a deduplicated file payload.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a lowercase or uppercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(path: &str) -> ContainerId {
        ContainerId {
            host: "blobs.example".to_string(),
            path: path.to_string(),
            method: "GET".to_string(),
            headers: vec![],
            chunks: vec![
                ChunkMeta {
                    length: 10,
                    encryption_key: None,
                    checksum: None,
                },
                ChunkMeta {
                    length: 6,
                    encryption_key: None,
                    checksum: None,
                },
            ],
        }
    }

    #[test]
    fn test_container_equality_is_by_value() {
        assert_eq!(container("/a"), container("/a"));
        assert_ne!(container("/a"), container("/b"));
        assert_eq!(container("/a").payload_len(), Some(16));
    }

    #[test]
    fn test_payload_len_overflow_is_none() {
        let mut c = container("/a");
        c.chunks[0].length = usize::MAX;
        assert_eq!(c.payload_len(), None);
    }

    #[test]
    fn test_signature_hex() {
        let sig = Signature::from_hex("00ff10").unwrap();
        assert_eq!(sig.as_bytes(), &[0x00, 0xff, 0x10]);
        assert_eq!(sig.to_string(), "00ff10");
        assert!(Signature::from_hex("zz").is_err());
    }
}
