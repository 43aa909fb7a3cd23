//! Storage backend benchmarks for page-sized I/O.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagevault_bench::random_data;
use pagevault_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tempfile::TempDir;

const PAGE_SIZES: [usize; 3] = [1024, 4096, 16384];

/// Benchmark in-place page writes.
fn bench_write_at(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_at");

    for size in PAGE_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("memory", size), &size, |b, &size| {
            let mut backend = InMemoryBackend::new();
            let data = random_data(size);
            backend.write_at(0, &data).unwrap();
            b.iter(|| backend.write_at(black_box(0), black_box(&data)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("file", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut backend = FileBackend::open(&dir.path().join("bench.db")).unwrap();
            let data = random_data(size);
            backend.write_at(0, &data).unwrap();
            b.iter(|| backend.write_at(black_box(0), black_box(&data)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark page reads.
fn bench_read_at(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_at");

    for size in PAGE_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("memory", size), &size, |b, &size| {
            let mut backend = InMemoryBackend::new();
            backend.write_at(0, &random_data(size * 8)).unwrap();
            b.iter(|| {
                let page = backend.read_at(black_box(size as u64 * 3), size).unwrap();
                black_box(page);
            });
        });

        group.bench_with_input(BenchmarkId::new("file", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut backend = FileBackend::open(&dir.path().join("bench.db")).unwrap();
            backend.write_at(0, &random_data(size * 8)).unwrap();
            b.iter(|| {
                let page = backend.read_at(black_box(size as u64 * 3), size).unwrap();
                black_box(page);
            });
        });
    }

    group.finish();
}

/// Benchmark sync after a page write.
fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_and_sync");
    group.sample_size(20);

    let dir = TempDir::new().unwrap();
    let mut backend = FileBackend::open(&dir.path().join("bench.db")).unwrap();
    let data = random_data(4096);
    group.bench_function("file_4096", |b| {
        b.iter(|| {
            backend.write_at(0, black_box(&data)).unwrap();
            backend.sync().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_write_at, bench_read_at, bench_sync);

criterion_main!(benches);
