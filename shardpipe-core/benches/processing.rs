//! Benchmarks for hashing and chunk processors
//!
//! Run with: cargo bench --package shardpipe-core --bench processing

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardpipe_core::crypto::{new_hasher, HashType};
use shardpipe_core::processing::{
    processor_constructor, CompressionMode, CompressionType, EncryptionType,
};

/// Compressible test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i / 7) % 64) as u8).collect()
}

fn format_size(size: usize) -> String {
    if size >= 1024 * 1024 {
        format!("{}MB", size / (1024 * 1024))
    } else {
        format!("{}KB", size / 1024)
    }
}

/// Benchmark every hash algorithm, keyed and unkeyed
fn bench_hashers(c: &mut Criterion) {
    let data = generate_data(1024 * 1024);
    let mut group = c.benchmark_group("hash_1MB");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for hash_type in HashType::ALL {
        for (label, key) in [("plain", &b""[..]), ("keyed", &b"0123456789abcdef"[..])] {
            let mut hasher = new_hasher(hash_type.name(), key).unwrap();
            group.bench_function(format!("{}/{}", hash_type, label), |b| {
                b.iter(|| hasher.hash(black_box(&data)))
            });
        }
    }

    group.finish();
}

/// Benchmark write-then-read through each processor configuration
fn bench_processors(c: &mut Criterion) {
    let key = b"01234567890123456789012345678901".to_vec();
    let configs = [
        ("snappy", CompressionType::Snappy, CompressionMode::Default, Vec::new()),
        ("lz4", CompressionType::Lz4, CompressionMode::Default, Vec::new()),
        ("gzip", CompressionType::Gzip, CompressionMode::BestSpeed, Vec::new()),
        ("aes256", CompressionType::Snappy, CompressionMode::Disabled, key.clone()),
        ("lz4+aes256", CompressionType::Lz4, CompressionMode::Default, key),
    ];

    let mut group = c.benchmark_group("processor_roundtrip");
    for size in [64 * 1024, 1024 * 1024] {
        let data = Bytes::from(generate_data(size));
        group.throughput(Throughput::Bytes(size as u64));

        for (name, kind, mode, key) in configs.iter().cloned() {
            let constructor = processor_constructor((kind, mode), (EncryptionType::Aes, key));
            let mut processor = constructor().unwrap();
            group.bench_with_input(
                BenchmarkId::new(name, format_size(size)),
                &data,
                |b, data| {
                    b.iter(|| {
                        let stored = processor.write_process(black_box(data.clone())).unwrap();
                        processor.read_process(stored).unwrap()
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_hashers, bench_processors);
criterion_main!(benches);
