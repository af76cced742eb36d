use std::sync::Arc;
use std::thread;

use cfetch_pool::{Disposition, Track, WorkPools};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_single_thread_drain(c: &mut Criterion) {
    c.bench_function("pool_drain_10k_single", |b| {
        b.iter(|| {
            let pools = WorkPools::seed((0..10_000u32).map(|i| (Track::Fetch, i)));
            while !pools
                .process(Track::Fetch, |item| {
                    black_box(item);
                    Disposition::Dispose
                })
                .unwrap()
            {}
        })
    });
}

fn bench_two_stage_threads(c: &mut Criterion) {
    c.bench_function("pool_two_stage_10k_4x4", |b| {
        b.iter(|| {
            let pools = Arc::new(WorkPools::seed((0..10_000u32).map(|i| (Track::Fetch, i))));
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let pools = pools.clone();
                    let track = if t < 4 { Track::Fetch } else { Track::DecodeWrite };
                    thread::spawn(move || {
                        while !pools
                            .process(track, |item| match track {
                                Track::Fetch => Disposition::Move(Track::DecodeWrite, item),
                                Track::DecodeWrite => Disposition::Dispose,
                            })
                            .unwrap()
                        {}
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_single_thread_drain, bench_two_stage_threads);
criterion_main!(benches);
