//! Fixture builders for encrypted containers.
//!
//! Produces `(ContainerId, payload)` pairs whose payload decrypts cleanly with
//! [`crate::decrypt_container`].

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::decrypt::{chunk_digest, KEY_TYPE_AES128};
use crate::model::{ChunkMeta, ContainerId};

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;

/// Encrypt `plaintext` the way the blob service does (AES-128-CFB, zero IV).
pub fn encrypt_chunk(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    // A 16-byte key and IV always satisfy the cipher's length requirements
    if let Ok(cipher) = Aes128CfbEnc::new_from_slices(key, &[0u8; 16]) {
        cipher.encrypt(&mut buf);
    }
    buf
}

pub fn tagged_key(key: &[u8; 16]) -> Vec<u8> {
    let mut v = Vec::with_capacity(17);
    v.push(KEY_TYPE_AES128);
    v.extend_from_slice(key);
    v
}

pub fn tagged_checksum(plaintext: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(21);
    v.push(0x01);
    v.extend_from_slice(&chunk_digest(plaintext));
    v
}

/// Builds one container with deterministic per-chunk keys.
pub struct ContainerBuilder {
    host: String,
    path: String,
    chunks: Vec<ChunkMeta>,
    payload: Vec<u8>,
}

impl ContainerBuilder {
    pub fn new(path: &str) -> Self {
        Self {
            host: "blobs.test".to_string(),
            path: path.to_string(),
            chunks: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Append a checksummed chunk.
    pub fn chunk(self, plaintext: &[u8]) -> Self {
        self.push(plaintext, true)
    }

    /// Append a chunk that carries no checksum.
    pub fn chunk_unverified(self, plaintext: &[u8]) -> Self {
        self.push(plaintext, false)
    }

    fn push(mut self, plaintext: &[u8], with_checksum: bool) -> Self {
        let key = self.key_for(self.chunks.len());
        self.payload.extend(encrypt_chunk(&key, plaintext));
        self.chunks.push(ChunkMeta {
            length: plaintext.len(),
            encryption_key: Some(tagged_key(&key)),
            checksum: with_checksum.then(|| tagged_checksum(plaintext)),
        });
        self
    }

    fn key_for(&self, index: usize) -> [u8; 16] {
        let digest = Sha256::digest(format!("{}{}#{}", self.host, self.path, index));
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        key
    }

    pub fn build(self) -> (ContainerId, Vec<u8>) {
        let id = ContainerId {
            host: self.host,
            path: self.path,
            method: "GET".to_string(),
            headers: vec![("x-test".to_string(), "1".to_string())],
            chunks: self.chunks,
        };
        (id, self.payload)
    }
}
