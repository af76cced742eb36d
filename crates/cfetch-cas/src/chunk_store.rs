//! In-memory store of decrypted container payloads.
//!
//! Each container keeps one slot per declared chunk. Slots are emptied one by
//! one as their last interested signature resolves; the container entry goes
//! away with its last occupied slot.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{ChunkRef, ContainerRef};

/// Decrypted chunk buffer, shared with writers so purging the store never
/// invalidates a payload that was already handed out.
pub type ChunkBytes = Arc<[u8]>;

type Slots = Vec<Option<ChunkBytes>>;

fn occupied_bytes(slots: &Slots) -> u64 {
    slots.iter().flatten().map(|c| c.len() as u64).sum()
}

#[derive(Debug, Default)]
pub struct ChunkStore {
    containers: HashMap<ContainerRef, Slots>,
    bytes_held: u64,
    peak_bytes_held: u64,
    purges: u64,
}

impl ChunkStore {
    /// Insert decrypted chunks. Returns `true` if an entry was replaced.
    pub(crate) fn insert(&mut self, container: ContainerRef, chunks: Vec<Vec<u8>>) -> bool {
        let slots: Slots = chunks
            .into_iter()
            .map(|c| Some(ChunkBytes::from(c)))
            .collect();
        let size = occupied_bytes(&slots);
        let replaced = match self.containers.insert(container, slots) {
            Some(old) => {
                self.bytes_held -= occupied_bytes(&old);
                true
            }
            None => false,
        };
        self.bytes_held += size;
        self.peak_bytes_held = self.peak_bytes_held.max(self.bytes_held);
        replaced
    }

    pub fn contains(&self, container: &ContainerRef) -> bool {
        self.containers.contains_key(container)
    }

    /// True if the referenced chunk is present.
    pub fn resolves(&self, chunk: &ChunkRef) -> bool {
        self.chunk(chunk).is_some()
    }

    pub(crate) fn chunk(&self, chunk: &ChunkRef) -> Option<ChunkBytes> {
        self.containers
            .get(&chunk.container)
            .and_then(|slots| slots.get(chunk.index))
            .cloned()
            .flatten()
    }

    /// Drop one chunk buffer, and its container once no slot is occupied.
    pub(crate) fn purge_chunk(&mut self, chunk: &ChunkRef) -> bool {
        self.retain(&chunk.container, |index| index != chunk.index) > 0
    }

    /// Drop every chunk of `container` for which `keep` is false.
    ///
    /// Returns the number of buffers released.
    pub(crate) fn retain<F>(&mut self, container: &ContainerRef, keep: F) -> usize
    where
        F: Fn(usize) -> bool,
    {
        let Some(slots) = self.containers.get_mut(container) else {
            return 0;
        };
        let mut released = 0usize;
        let mut bytes = 0u64;
        for (index, slot) in slots.iter_mut().enumerate() {
            if keep(index) {
                continue;
            }
            if let Some(chunk) = slot.take() {
                released += 1;
                bytes += chunk.len() as u64;
            }
        }
        let empty = slots.iter().all(Option::is_none);
        self.bytes_held -= bytes;
        self.purges += released as u64;
        if empty {
            self.containers.remove(container);
            tracing::trace!(container = %container.label(), "purged container");
        }
        released
    }

    /// Drop the whole container regardless of interest.
    pub(crate) fn purge(&mut self, container: &ContainerRef) -> bool {
        self.retain(container, |_| false) > 0
    }

    pub(crate) fn clear(&mut self) {
        self.purges += self
            .containers
            .values()
            .map(|slots| slots.iter().flatten().count() as u64)
            .sum::<u64>();
        self.containers.clear();
        self.bytes_held = 0;
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn bytes_held(&self) -> u64 {
        self.bytes_held
    }

    pub fn peak_bytes_held(&self) -> u64 {
        self.peak_bytes_held
    }

    /// Chunk buffers released so far.
    pub fn purges(&self) -> u64 {
        self.purges
    }
}
