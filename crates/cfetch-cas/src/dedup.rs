//! Content-addressed dedup store with reference-counted purging.
//!
//! Interest is counted per chunk: a decrypted buffer is released as soon as
//! the last pending signature that needs it resolves, even while sibling
//! chunks of the same container are still waiting.
//!
//! The registry, the reference tracker and the chunk store share one lock and
//! are only mutated through the compound operations below. Completing or
//! failing a signature is a single step under that lock: the signature is
//! removed from the registry first, and only the caller that removed it emits
//! it and releases its containers. Purging therefore never races a completion
//! check, and a completed signature is never reported twice.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::instrument;

use crate::chunk_store::ChunkStore;
use crate::model::{ContainerRef, Signature};
use crate::registry::ChunkRegistry;
use crate::tracker::ReferenceTracker;
use crate::writer::SignatureWriter;

/// Point-in-time view of store occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Signatures not yet completed or failed
    pub pending_signatures: usize,
    /// Containers currently holding decrypted bytes
    pub containers_held: usize,
    /// Containers still needed by at least one pending signature
    pub containers_referenced: usize,
    pub bytes_held: u64,
    pub peak_bytes_held: u64,
    pub puts: u64,
    pub overwrites: u64,
    /// Chunk buffers released
    pub purges: u64,
}

struct Inner {
    registry: ChunkRegistry,
    tracker: ReferenceTracker,
    chunks: ChunkStore,
    puts: u64,
    overwrites: u64,
}

pub struct DedupStore {
    inner: Mutex<Inner>,
}

impl DedupStore {
    pub fn new(registry: ChunkRegistry) -> Self {
        let tracker = ReferenceTracker::from_registry(&registry);
        Self {
            inner: Mutex::new(Inner {
                registry,
                tracker,
                chunks: ChunkStore::default(),
                puts: 0,
                overwrites: 0,
            }),
        }
    }

    /// Distinct containers the registry still needs, in deterministic order.
    pub fn containers(&self) -> Vec<ContainerRef> {
        self.inner.lock().registry.containers()
    }

    /// Register a container's decrypted chunks.
    ///
    /// Returns `true` if this replaced an entry already present. That should
    /// not happen in a run where each container is decoded once, so it is
    /// logged, but the replacement is kept.
    pub fn put(&self, container: ContainerRef, chunks: Vec<Vec<u8>>) -> bool {
        let mut inner = self.inner.lock();
        inner.puts += 1;
        let label = container.label();
        let replaced = inner.chunks.insert(container, chunks);
        if replaced {
            inner.overwrites += 1;
            tracing::warn!(container = %label, "container stored twice, previous entry replaced");
        }
        replaced
    }

    /// Emit every signature that `container` just made complete.
    ///
    /// Each returned writer is produced exactly once for the whole run. Every
    /// chunk that no pending signature needs afterwards is purged, including
    /// chunks of `container` that nothing referenced in the first place.
    #[instrument(skip(self, container), fields(container = %container.label()), level = "debug")]
    pub fn process(&self, container: &ContainerRef) -> HashMap<Signature, SignatureWriter> {
        let mut guard = self.inner.lock();
        let Inner {
            registry,
            tracker,
            chunks,
            ..
        } = &mut *guard;

        let mut completed = HashMap::new();
        for signature in tracker.signatures_for(container) {
            let ready = registry
                .get(&signature)
                .is_some_and(|refs| refs.iter().all(|r| chunks.resolves(r)));
            if !ready {
                continue;
            }
            let Some(refs) = registry.remove(&signature) else {
                continue;
            };
            let payload = refs.iter().filter_map(|r| chunks.chunk(r)).collect();
            for orphan in tracker.release(&signature) {
                chunks.purge_chunk(&orphan);
            }
            tracing::debug!(signature = %signature, chunks = refs.len(), "signature complete");
            completed.insert(signature.clone(), SignatureWriter::new(signature, payload));
        }

        chunks.retain(container, |index| tracker.is_chunk_referenced(container, index));
        completed
    }

    /// Declare that `container` will never arrive.
    ///
    /// Returns every pending signature that depended on it. Their other
    /// containers are released through the same path as a completion.
    #[instrument(skip(self, container), fields(container = %container.label()), level = "debug")]
    pub fn fail(&self, container: &ContainerRef) -> HashSet<Signature> {
        let mut guard = self.inner.lock();
        let Inner {
            registry,
            tracker,
            chunks,
            ..
        } = &mut *guard;

        let mut failed = HashSet::new();
        for signature in tracker.signatures_for(container) {
            if registry.remove(&signature).is_some() {
                failed.insert(signature.clone());
            }
            for orphan in tracker.release(&signature) {
                chunks.purge_chunk(&orphan);
            }
        }
        chunks.purge(container);
        if !failed.is_empty() {
            tracing::debug!(count = failed.len(), "signatures failed with container");
        }
        failed
    }

    /// Remove and return signatures that list no chunks at all.
    pub fn take_empty(&self) -> HashMap<Signature, SignatureWriter> {
        let mut guard = self.inner.lock();
        let empty: Vec<Signature> = guard
            .registry
            .iter()
            .filter(|(_, refs)| refs.is_empty())
            .map(|(sig, _)| sig.clone())
            .collect();
        empty
            .into_iter()
            .filter_map(|sig| guard.registry.remove(&sig).map(|_| sig))
            .map(|sig| (sig.clone(), SignatureWriter::new(sig, Vec::new())))
            .collect()
    }

    /// Fail everything still pending and drop all stored bytes.
    pub fn abandon_all(&self) -> HashSet<Signature> {
        let mut guard = self.inner.lock();
        let pending: Vec<Signature> = guard.registry.signatures().cloned().collect();
        let abandoned: HashSet<Signature> = pending
            .into_iter()
            .filter(|sig| guard.registry.remove(sig).is_some())
            .collect();
        guard.tracker.clear();
        guard.chunks.clear();
        abandoned
    }

    /// Signatures neither completed nor failed yet, sorted.
    pub fn unresolved(&self) -> Vec<Signature> {
        let mut out: Vec<Signature> = self.inner.lock().registry.signatures().cloned().collect();
        out.sort();
        out
    }

    /// Whether decrypted bytes for `container` are currently held.
    pub fn contains(&self, container: &ContainerRef) -> bool {
        self.inner.lock().chunks.contains(container)
    }

    /// Whether no decrypted bytes are held at all.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            pending_signatures: inner.registry.len(),
            containers_held: inner.chunks.len(),
            containers_referenced: inner.tracker.container_count(),
            bytes_held: inner.chunks.bytes_held(),
            peak_bytes_held: inner.chunks.peak_bytes_held(),
            puts: inner.puts,
            overwrites: inner.overwrites,
            purges: inner.chunks.purges(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkMeta, ChunkRef, ContainerId};
    use std::sync::Arc;

    fn container(path: &str, n: usize) -> ContainerRef {
        Arc::new(ContainerId {
            host: "h".into(),
            path: path.into(),
            method: "GET".into(),
            headers: vec![],
            chunks: vec![
                ChunkMeta {
                    length: 2,
                    encryption_key: None,
                    checksum: None,
                };
                n
            ],
        })
    }

    fn sig(b: u8) -> Signature {
        Signature::new(vec![b])
    }

    fn drain(w: SignatureWriter) -> Vec<u8> {
        let mut out = Vec::new();
        w.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_cascade_purge_scenario() {
        // A = {a0, a1}, B = {b0}; S1 = [a0, b0], S2 = [a1]
        let a = container("/a", 2);
        let b = container("/b", 1);
        let reg = ChunkRegistry::from_entries([
            (
                sig(1),
                vec![ChunkRef::new(a.clone(), 0), ChunkRef::new(b.clone(), 0)],
            ),
            (sig(2), vec![ChunkRef::new(a.clone(), 1)]),
        ])
        .unwrap();
        let store = DedupStore::new(reg);

        assert!(!store.put(a.clone(), vec![b"a0".to_vec(), b"a1".to_vec()]));
        let mut done = store.process(&a);
        assert_eq!(done.len(), 1);
        assert_eq!(drain(done.remove(&sig(2)).unwrap()), b"a1");
        assert!(store.contains(&a), "a0 is still needed by S1");
        // a1 lost its only referent with S2; only a0 stays resident
        let stats = store.stats();
        assert_eq!(stats.bytes_held, 2);
        assert_eq!(stats.purges, 1);

        store.put(b.clone(), vec![b"b0".to_vec()]);
        let mut done = store.process(&b);
        assert_eq!(done.len(), 1);
        assert_eq!(drain(done.remove(&sig(1)).unwrap()), b"a0b0");

        assert!(store.is_empty());
        assert!(store.unresolved().is_empty());
        assert!(store.process(&a).is_empty());
        assert!(store.process(&b).is_empty());
    }

    #[test]
    fn test_process_before_all_parts_present_emits_nothing() {
        let a = container("/a", 1);
        let b = container("/b", 1);
        let reg = ChunkRegistry::from_entries([(
            sig(1),
            vec![ChunkRef::new(b.clone(), 0), ChunkRef::new(a.clone(), 0)],
        )])
        .unwrap();
        let store = DedupStore::new(reg);
        store.put(a.clone(), vec![b"A".to_vec()]);
        assert!(store.process(&a).is_empty());
        assert!(store.contains(&a));

        store.put(b.clone(), vec![b"B".to_vec()]);
        let mut done = store.process(&b);
        assert_eq!(drain(done.remove(&sig(1)).unwrap()), b"BA");
    }

    #[test]
    fn test_fail_releases_siblings() {
        // S3 = [a0, c0], S4 = [b0, c0]; a and b arrive, c fails
        let a = container("/a", 1);
        let b = container("/b", 1);
        let c = container("/c", 1);
        let reg = ChunkRegistry::from_entries([
            (
                sig(3),
                vec![ChunkRef::new(a.clone(), 0), ChunkRef::new(c.clone(), 0)],
            ),
            (
                sig(4),
                vec![ChunkRef::new(b.clone(), 0), ChunkRef::new(c.clone(), 0)],
            ),
        ])
        .unwrap();
        let store = DedupStore::new(reg);
        store.put(a.clone(), vec![b"a".to_vec()]);
        assert!(store.process(&a).is_empty());
        store.put(b.clone(), vec![b"b".to_vec()]);
        assert!(store.process(&b).is_empty());

        let failed = store.fail(&c);
        assert_eq!(failed, HashSet::from([sig(3), sig(4)]));
        assert!(store.is_empty());
        assert!(store.fail(&c).is_empty());
    }

    #[test]
    fn test_unreferenced_container_is_purged_on_process() {
        let a = container("/a", 1);
        let reg = ChunkRegistry::from_entries([(sig(1), vec![ChunkRef::new(a.clone(), 0)])])
            .unwrap();
        let store = DedupStore::new(reg);
        assert_eq!(store.fail(&a).len(), 1);

        // A late arrival for a container nobody wants any more must not leak
        store.put(a.clone(), vec![b"x".to_vec()]);
        assert!(store.process(&a).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite_is_reported() {
        let a = container("/a", 1);
        let reg = ChunkRegistry::from_entries([(sig(1), vec![ChunkRef::new(a.clone(), 0)])])
            .unwrap();
        let store = DedupStore::new(reg);
        assert!(!store.put(a.clone(), vec![b"x".to_vec()]));
        assert!(store.put(a.clone(), vec![b"x".to_vec()]));
        let stats = store.stats();
        assert_eq!(stats.puts, 2);
        assert_eq!(stats.overwrites, 1);
        assert_eq!(stats.bytes_held, 1);
    }

    #[test]
    fn test_take_empty_and_abandon_all() {
        let a = container("/a", 1);
        let reg = ChunkRegistry::from_entries([
            (sig(1), vec![]),
            (sig(2), vec![ChunkRef::new(a.clone(), 0)]),
        ])
        .unwrap();
        let store = DedupStore::new(reg);

        let empty = store.take_empty();
        assert_eq!(empty.len(), 1);
        assert!(empty[&sig(1)].is_empty());
        assert!(store.take_empty().is_empty());

        store.put(a.clone(), vec![]);
        assert_eq!(store.abandon_all(), HashSet::from([sig(2)]));
        assert!(store.is_empty());
        assert_eq!(store.stats().pending_signatures, 0);
    }

    #[test]
    fn test_peak_bytes_tracks_working_set() {
        let a = container("/a", 1);
        let b = container("/b", 1);
        let reg = ChunkRegistry::from_entries([
            (sig(1), vec![ChunkRef::new(a.clone(), 0)]),
            (sig(2), vec![ChunkRef::new(b.clone(), 0)]),
        ])
        .unwrap();
        let store = DedupStore::new(reg);
        store.put(a.clone(), vec![vec![0u8; 100]]);
        store.process(&a);
        store.put(b.clone(), vec![vec![0u8; 100]]);
        store.process(&b);
        let stats = store.stats();
        assert_eq!(stats.peak_bytes_held, 100);
        assert_eq!(stats.bytes_held, 0);
        assert_eq!(stats.purges, 2);
    }
}
