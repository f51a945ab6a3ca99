use chain_hashmap::{LoadBound, StripedChainMap};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand_core::{RngCore, SeedableRng};
use rand_pcg::Lcg128Xsl64 as Pcg;
use std::thread;

const THREADS: u64 = 4;
const PER_THREAD: u64 = 25_000;
const BATCH: usize = 1000;

fn batch_pairs(rng: &mut Pcg, n: usize) -> (Vec<u8>, Vec<u8>) {
    let mut keys = Vec::with_capacity(n * 8);
    let mut elts = Vec::with_capacity(n * 8);
    for i in 0..n as u64 {
        keys.extend_from_slice(&rng.next_u64().to_le_bytes());
        elts.extend_from_slice(&i.to_le_bytes());
    }
    (keys, elts)
}

fn bench_batched_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("striped::insert");
    group.sample_size(10);
    group.throughput(Throughput::Elements(THREADS * PER_THREAD));
    group.bench_function("4_threads_batch_1000", |b| {
        b.iter_batched(
            || StripedChainMap::new(8, 8, 0, LoadBound::new(1, 0), 6),
            |m| {
                thread::scope(|s| {
                    for t in 0..THREADS {
                        let m = &m;
                        s.spawn(move || {
                            let mut rng = Pcg::seed_from_u64(t + 1);
                            for _ in 0..PER_THREAD / BATCH as u64 {
                                let (keys, elts) = batch_pairs(&mut rng, BATCH);
                                m.insert_batch(&keys, &elts);
                            }
                        });
                    }
                });
                black_box(m)
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

fn bench_parallel_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("striped::search");
    group.sample_size(10);
    group.throughput(Throughput::Elements(THREADS * PER_THREAD));
    group.bench_function("4_threads_hit", |b| {
        let m = StripedChainMap::new(8, 8, 0, LoadBound::new(1, 0), 6);
        let mut per_thread_keys: Vec<Vec<u64>> = Vec::new();
        for t in 0..THREADS {
            let mut rng = Pcg::seed_from_u64(100 + t);
            let keys: Vec<u64> = (0..PER_THREAD).map(|_| rng.next_u64()).collect();
            let mut key_bytes = Vec::with_capacity(keys.len() * 8);
            let mut elts = Vec::with_capacity(keys.len() * 8);
            for (i, k) in keys.iter().enumerate() {
                key_bytes.extend_from_slice(&k.to_le_bytes());
                elts.extend_from_slice(&(i as u64).to_le_bytes());
            }
            m.insert_batch(&key_bytes, &elts);
            per_thread_keys.push(keys);
        }
        b.iter(|| {
            thread::scope(|s| {
                for keys in &per_thread_keys {
                    let m = &m;
                    s.spawn(move || {
                        for k in keys {
                            black_box(m.search(&k.to_le_bytes()));
                        }
                    });
                }
            });
        })
    });
    group.finish();
}

criterion_group! {
    name = benches_striped;
    config = Criterion::default();
    targets = bench_batched_insert, bench_parallel_search
}
criterion_main!(benches_striped);
