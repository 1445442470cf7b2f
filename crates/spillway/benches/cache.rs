use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use spillway::bloom::{FileSeekBloomFilter, GrowthMode, MemoryBloomFilter, ScalableBloomFilter};
use spillway::{CachedDiskDict, CachedQueue, Database};
use std::sync::Arc;

fn db() -> Arc<Database> {
    Arc::new(Database::temporary().unwrap())
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb_hot", |b| {
        let mut cache = CachedDiskDict::new(100, db()).unwrap();
        let data = vec![b'x'; 1024];

        // Pre-populate: 100 keys in memory, 100 on disk
        for i in 0..200u64 {
            cache.set(i, data.clone()).unwrap();
        }

        let mut counter = 0u64;
        b.iter(|| {
            black_box(cache.get(&(counter % 100)).unwrap());
            counter += 1;
        });
    });

    group.bench_function("get_1kb_cold", |b| {
        let mut cache = CachedDiskDict::new(10, db()).unwrap();
        let data = vec![b'x'; 1024];

        for i in 0..1000u64 {
            cache.set(i, data.clone()).unwrap();
        }

        let mut counter = 0u64;
        b.iter(|| {
            black_box(cache.get(&(100 + counter % 900)).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_get_in_memory", |b| {
        let queue = CachedQueue::new(1000, db()).unwrap();
        b.iter(|| {
            queue.put(black_box(42u64)).unwrap();
            black_box(queue.get().unwrap());
        });
    });

    group.bench_function("put_get_spilled", |b| {
        let queue = CachedQueue::new(10, db()).unwrap();
        for i in 0..10u64 {
            queue.put(i).unwrap();
        }
        b.iter(|| {
            queue.put(black_box(42u64)).unwrap();
            black_box(queue.get().unwrap());
        });
    });

    group.finish();
}

fn bench_bloom(c: &mut Criterion) {
    let mut group = c.benchmark_group("bloom");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("file_seek_contains", |b| {
        let mut filter = FileSeekBloomFilter::with_seed(100_000, 0.001, 1).unwrap();
        for i in 0..10_000u64 {
            filter.add(i.to_le_bytes()).unwrap();
        }
        let mut counter = 0u64;
        b.iter(|| {
            black_box(filter.contains(counter.to_le_bytes()));
            counter += 1;
        });
    });

    group.bench_function("memory_contains", |b| {
        let mut filter = MemoryBloomFilter::with_seed(100_000, 0.001, 1).unwrap();
        for i in 0..10_000u64 {
            filter.add(i.to_le_bytes()).unwrap();
        }
        let mut counter = 0u64;
        b.iter(|| {
            black_box(filter.contains(counter.to_le_bytes()));
            counter += 1;
        });
    });

    group.bench_function("scalable_add", |b| {
        let mut filter: ScalableBloomFilter =
            ScalableBloomFilter::with_seed(10_000, 0.001, GrowthMode::LargeSet, 1).unwrap();
        let mut counter = 0u64;
        b.iter(|| {
            black_box(filter.add(counter.to_le_bytes()).unwrap());
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_cached_get, bench_queue, bench_bloom);
criterion_main!(benches);
