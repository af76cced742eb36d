use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use cfetch_cas::{
    ChunkMeta, ChunkRef, ChunkRegistry, ContainerId, ContainerRef, DedupStore, Signature,
};

const CONTAINERS: usize = 40;
const CHUNKS_PER_CONTAINER: usize = 4;
const SIGNATURES: usize = 300;
const THREADS: usize = 8;

fn container(i: usize) -> ContainerRef {
    Arc::new(ContainerId {
        host: "p01.blobs".into(),
        path: format!("/c/{i}"),
        method: "GET".into(),
        headers: vec![],
        chunks: vec![
            ChunkMeta {
                length: 8,
                encryption_key: None,
                checksum: None,
            };
            CHUNKS_PER_CONTAINER
        ],
    })
}

fn chunk_bytes(container: usize, index: usize) -> Vec<u8> {
    format!("{container:04}:{index:03}").into_bytes()
}

/// Small deterministic generator so the layout is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[test]
fn concurrent_process_emits_each_signature_exactly_once() {
    let containers: Vec<ContainerRef> = (0..CONTAINERS).map(container).collect();
    let mut rng = Lcg(42);
    let mut expected: HashMap<Signature, Vec<u8>> = HashMap::new();
    let mut entries = Vec::new();
    for s in 0..SIGNATURES {
        let sig = Signature::new((s as u32).to_be_bytes().to_vec());
        let parts = 1 + rng.next(4);
        let mut refs = Vec::new();
        let mut payload = Vec::new();
        for _ in 0..parts {
            let c = rng.next(CONTAINERS);
            let i = rng.next(CHUNKS_PER_CONTAINER);
            refs.push(ChunkRef::new(containers[c].clone(), i));
            payload.extend(chunk_bytes(c, i));
        }
        expected.insert(sig.clone(), payload);
        entries.push((sig, refs));
    }

    let store = Arc::new(DedupStore::new(ChunkRegistry::from_entries(entries).unwrap()));
    let emitted: Arc<Mutex<Vec<(Signature, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let emitted = emitted.clone();
            let containers = containers.clone();
            thread::spawn(move || {
                // Every thread delivers every container, starting at a different offset
                for k in 0..CONTAINERS {
                    let c = (k + t * 5) % CONTAINERS;
                    let chunks = (0..CHUNKS_PER_CONTAINER).map(|i| chunk_bytes(c, i)).collect();
                    store.put(containers[c].clone(), chunks);
                    for (sig, writer) in store.process(&containers[c]) {
                        let mut out = Vec::new();
                        writer.write_to(&mut out).unwrap();
                        emitted.lock().unwrap().push((sig, out));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), SIGNATURES, "every signature emitted exactly once");
    let mut seen = HashMap::new();
    for (sig, payload) in emitted.iter() {
        assert!(seen.insert(sig.clone(), ()).is_none(), "duplicate emission of {sig}");
        assert_eq!(payload, &expected[sig], "payload of {sig} reassembled out of order");
    }

    assert!(store.is_empty(), "no container outlives its last referent");
    assert_eq!(store.stats().bytes_held, 0);
    assert!(store.unresolved().is_empty());
}

#[test]
fn concurrent_fail_and_process_partition_signatures() {
    let containers: Vec<ContainerRef> = (0..CONTAINERS).map(container).collect();
    let mut rng = Lcg(7);
    let mut entries = Vec::new();
    for s in 0..SIGNATURES {
        let sig = Signature::new((s as u32).to_be_bytes().to_vec());
        let refs = (0..2)
            .map(|_| {
                let c = rng.next(CONTAINERS);
                ChunkRef::new(containers[c].clone(), rng.next(CHUNKS_PER_CONTAINER))
            })
            .collect();
        entries.push((sig, refs));
    }
    let store = Arc::new(DedupStore::new(ChunkRegistry::from_entries(entries).unwrap()));
    let completed = Arc::new(Mutex::new(Vec::new()));
    let failed = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let containers = containers.clone();
            let completed = completed.clone();
            let failed = failed.clone();
            thread::spawn(move || {
                for k in 0..CONTAINERS {
                    let c = (k + t * 3) % CONTAINERS;
                    // Every fourth container never arrives
                    if c % 4 == 0 {
                        failed.lock().unwrap().extend(store.fail(&containers[c]));
                    } else {
                        let chunks = (0..CHUNKS_PER_CONTAINER).map(|i| chunk_bytes(c, i)).collect();
                        store.put(containers[c].clone(), chunks);
                        completed
                            .lock()
                            .unwrap()
                            .extend(store.process(&containers[c]).into_keys());
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let completed = completed.lock().unwrap();
    let failed = failed.lock().unwrap();
    assert_eq!(completed.len() + failed.len(), SIGNATURES);
    let mut all: Vec<_> = completed.iter().chain(failed.iter()).cloned().collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), SIGNATURES, "no signature both completed and failed");
    assert!(store.is_empty());
}
