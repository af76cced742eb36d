//! Streams one reassembled payload to a caller-supplied sink.

use std::fmt;
use std::io::{self, Write};

use crate::chunk_store::ChunkBytes;
use crate::model::Signature;

/// The chunks of one completed signature, in reconstruction order.
///
/// Consumed by [`write_to`](Self::write_to) or [`release`](Self::release), so a
/// payload can be delivered at most once.
pub struct SignatureWriter {
    signature: Signature,
    chunks: Vec<ChunkBytes>,
}

impl SignatureWriter {
    pub(crate) fn new(signature: Signature, chunks: Vec<ChunkBytes>) -> Self {
        Self { signature, chunks }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Total payload length in bytes.
    pub fn len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every chunk to `sink` and return the number of bytes written.
    pub fn write_to<W: Write + ?Sized>(self, sink: &mut W) -> io::Result<u64> {
        let mut written = 0u64;
        for chunk in &self.chunks {
            sink.write_all(chunk)?;
            written += chunk.len() as u64;
        }
        sink.flush()?;
        Ok(written)
    }

    /// Drop the payload without writing it.
    pub fn release(self) {}
}

impl fmt::Debug for SignatureWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureWriter")
            .field("signature", &self.signature)
            .field("chunks", &self.chunks.len())
            .field("len", &self.len())
            .finish()
    }
}
