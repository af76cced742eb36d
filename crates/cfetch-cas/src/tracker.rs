//! Bidirectional signature <-> chunk interest index.

use std::collections::{HashMap, HashSet};

use crate::model::{ChunkRef, ContainerRef, Signature};
use crate::registry::ChunkRegistry;

/// Which unresolved signatures still need which chunks.
///
/// Interest is kept per chunk so a container's buffers can be released one at
/// a time. Only reachable through [`crate::DedupStore`], which serialises
/// every mutation behind its lock.
#[derive(Debug, Default)]
pub struct ReferenceTracker {
    needs: HashMap<Signature, HashSet<ChunkRef>>,
    needed_by: HashMap<ContainerRef, HashMap<usize, HashSet<Signature>>>,
}

impl ReferenceTracker {
    pub(crate) fn from_registry(registry: &ChunkRegistry) -> Self {
        let mut tracker = Self::default();
        for (signature, refs) in registry.iter() {
            for r in refs {
                tracker
                    .needs
                    .entry(signature.clone())
                    .or_default()
                    .insert(r.clone());
                tracker
                    .needed_by
                    .entry(r.container.clone())
                    .or_default()
                    .entry(r.index)
                    .or_default()
                    .insert(signature.clone());
            }
        }
        tracker
    }

    /// Signatures still waiting on any chunk of `container`.
    pub fn signatures_for(&self, container: &ContainerRef) -> Vec<Signature> {
        let Some(by_index) = self.needed_by.get(container) else {
            return Vec::new();
        };
        let unique: HashSet<&Signature> = by_index.values().flatten().collect();
        unique.into_iter().cloned().collect()
    }

    pub fn is_referenced(&self, container: &ContainerRef) -> bool {
        self.needed_by.contains_key(container)
    }

    pub fn is_chunk_referenced(&self, container: &ContainerRef, index: usize) -> bool {
        self.needed_by
            .get(container)
            .is_some_and(|by_index| by_index.contains_key(&index))
    }

    pub fn container_count(&self) -> usize {
        self.needed_by.len()
    }

    /// Drop every interest `signature` holds and return the chunks that no
    /// signature needs any more.
    pub(crate) fn release(&mut self, signature: &Signature) -> Vec<ChunkRef> {
        let Some(chunks) = self.needs.remove(signature) else {
            return Vec::new();
        };
        let mut orphaned = Vec::new();
        for chunk in chunks {
            let Some(by_index) = self.needed_by.get_mut(&chunk.container) else {
                continue;
            };
            let emptied = match by_index.get_mut(&chunk.index) {
                Some(sigs) => {
                    sigs.remove(signature);
                    sigs.is_empty()
                }
                None => false,
            };
            if emptied {
                by_index.remove(&chunk.index);
            }
            if by_index.is_empty() {
                self.needed_by.remove(&chunk.container);
            }
            if emptied {
                orphaned.push(chunk);
            }
        }
        orphaned
    }

    pub(crate) fn clear(&mut self) {
        self.needs.clear();
        self.needed_by.clear();
    }
}
