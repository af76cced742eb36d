//! Container decryption and per-chunk integrity checks.
//!
//! A container payload is the concatenation of its encrypted chunks in the
//! order declared by [`ContainerId::chunks`]. Every chunk carries its own key:
//!
//! ```text
//! key      = [0x01][16-byte AES-128 key]
//! checksum = [type][first 20 bytes of SHA256(SHA256(plaintext))]
//! ```
//!
//! Chunks are AES-128-CFB with an all-zero IV. Any failure here is reported as
//! a [`DecodeError`]; the caller re-fetches rather than repairing locally.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

use crate::model::ContainerId;

/// Key type tag for raw AES-128 keys.
pub const KEY_TYPE_AES128: u8 = 0x01;

/// Length of the truncated double-SHA-256 carried after the checksum tag.
pub const CHECKSUM_LEN: usize = 20;

const AES128_KEY_LEN: usize = 16;
const ZERO_IV: [u8; 16] = [0u8; 16];

type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

/// Errors produced while decrypting a container payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLength { expected: usize, actual: usize },

    #[error("declared chunk lengths overflow the addressable payload size")]
    LengthOverflow,

    #[error("chunk {index}: missing encryption key")]
    MissingKey { index: usize },

    #[error("chunk {index}: unsupported key type 0x{tag:02x}")]
    UnsupportedKeyType { index: usize, tag: u8 },

    #[error("chunk {index}: invalid key length {len}")]
    InvalidKeyLength { index: usize, len: usize },

    #[error("chunk {index}: checksum mismatch")]
    ChecksumMismatch { index: usize },
}

/// Decrypt every chunk of `container` out of `payload`.
///
/// Returns the plaintext chunks in declaration order.
#[instrument(skip(container, payload), fields(container = %container.label()), level = "debug")]
pub fn decrypt_container(
    container: &ContainerId,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, DecodeError> {
    let expected = container.payload_len().ok_or(DecodeError::LengthOverflow)?;
    if payload.len() != expected {
        return Err(DecodeError::PayloadLength {
            expected,
            actual: payload.len(),
        });
    }

    let mut chunks = Vec::with_capacity(container.chunks.len());
    let mut remaining = payload;
    for (index, meta) in container.chunks.iter().enumerate() {
        let key = aes_key(index, meta.encryption_key.as_deref())?;
        // The total was checked above, so every chunk fits in what is left
        let (ciphertext, rest) = remaining.split_at(meta.length);
        let plaintext = decrypt_chunk(index, key, ciphertext)?;

        match meta.checksum.as_deref() {
            Some(checksum) => {
                if !checksum_matches(checksum, &plaintext) {
                    return Err(DecodeError::ChecksumMismatch { index });
                }
            }
            None => tracing::debug!(index, "chunk has no checksum, skipping verification"),
        }

        chunks.push(plaintext);
        remaining = rest;
    }
    Ok(chunks)
}

/// Decrypt one chunk with its raw AES-128 key.
pub fn decrypt_chunk(index: usize, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let cipher = Aes128CfbDec::new_from_slices(key, &ZERO_IV)
        .map_err(|_| DecodeError::InvalidKeyLength { index, len: key.len() })?;
    let mut buf = ciphertext.to_vec();
    cipher.decrypt(&mut buf);
    Ok(buf)
}

/// Strip the type tag from a chunk key and validate it.
fn aes_key(index: usize, tagged: Option<&[u8]>) -> Result<&[u8], DecodeError> {
    let tagged = tagged.ok_or(DecodeError::MissingKey { index })?;
    let (&tag, key) = tagged
        .split_first()
        .ok_or(DecodeError::MissingKey { index })?;
    if tag != KEY_TYPE_AES128 {
        return Err(DecodeError::UnsupportedKeyType { index, tag });
    }
    if key.len() != AES128_KEY_LEN {
        return Err(DecodeError::InvalidKeyLength {
            index,
            len: key.len(),
        });
    }
    Ok(key)
}

/// First 20 bytes of SHA256(SHA256(data)).
pub fn chunk_digest(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let outer = Sha256::digest(Sha256::digest(data));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&outer[..CHECKSUM_LEN]);
    out
}

/// Compare a tagged stored checksum against the plaintext.
pub fn checksum_matches(tagged: &[u8], plaintext: &[u8]) -> bool {
    match tagged.split_first() {
        Some((_, stored)) if stored.len() == CHECKSUM_LEN => stored == &chunk_digest(plaintext)[..],
        _ => false,
    }
}
