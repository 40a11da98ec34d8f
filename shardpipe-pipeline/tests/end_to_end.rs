//! End-to-end tests: stream -> chunks -> shards -> stream
//!
//! Run with: cargo test -p shardpipe-pipeline --test end_to_end

mod common;

use common::{init_tracing, memory_cluster, random_bytes, read_all, write_all};
use proptest::prelude::*;
use shardpipe_core::{CheckStatus, ErasureEncoder, STRIPE_UNIT};
use shardpipe_pipeline::{new_cluster, new_pipeline, DistributionConfig, PipelineConfig};
use shardpipe_storage::MemoryConnector;
use shardpipe_core::processing::{CompressionMode, CompressionType};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

const KEY: &str = "0123456789abcdef0123456789abcdef";

fn config(chunk_size: usize, k: usize, m: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        distribution: DistributionConfig::new(k as i64, m as i64),
        job_count: 4,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hello_world_random_placement() {
    init_tracing();
    let (cluster, _) = memory_cluster(3);
    let pipeline = new_pipeline(&config(4, 0, 0), cluster).unwrap();

    let chunks = write_all(pipeline.as_ref(), b"hello world!").await.unwrap();
    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert_eq!(chunk.size, 4);
        assert_eq!(chunk.objects.len(), 1);
    }
    assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), b"hello world!");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_object_replicated() {
    init_tracing();
    let (cluster, connector) = memory_cluster(3);
    let pipeline = new_pipeline(&config(0, 3, 0), cluster).unwrap();

    let chunks = write_all(pipeline.as_ref(), b"hi").await.unwrap();
    assert_eq!(chunks.len(), 1);
    let shards: HashSet<_> = chunks[0].objects.iter().map(|o| o.shard_id.clone()).collect();
    assert_eq!(shards.len(), 3);
    assert_eq!(pipeline.check(&chunks, false).await.unwrap(), CheckStatus::Optimal);

    let lost = chunks[0].objects[0].clone();
    connector.shard(&lost.shard_id).clear();
    assert_eq!(pipeline.check(&chunks, false).await.unwrap(), CheckStatus::Valid);
    assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), b"hi");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicated_repair_restores_distinct_shards() {
    init_tracing();
    let (cluster, connector) = memory_cluster(4);
    let pipeline = new_pipeline(&config(0, 3, 0), cluster).unwrap();

    let chunks = write_all(pipeline.as_ref(), b"hi").await.unwrap();
    let lost = chunks[0].objects[1].clone();
    connector.shard(&lost.shard_id).clear();

    let repaired = pipeline.repair(&chunks).await.unwrap();
    let shards: HashSet<_> = repaired[0].objects.iter().map(|o| o.shard_id.clone()).collect();
    assert_eq!(shards.len(), 3);
    assert!(!repaired[0].objects.contains(&lost));
    assert_eq!(repaired[0].hash, chunks[0].hash);
    assert_eq!(pipeline.check(&repaired, false).await.unwrap(), CheckStatus::Optimal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distributed_any_two_lost() {
    init_tracing();
    let (cluster, connector) = memory_cluster(8);
    let pipeline = new_pipeline(&config(128, 2, 2), cluster).unwrap();
    let data = random_bytes(512, 3);

    let chunks = write_all(pipeline.as_ref(), &data).await.unwrap();
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks.iter().map(|c| c.objects.len()).sum::<usize>(), 16);

    // drop positions (i, i+1) of every chunk, each chunk a different pair
    let pairs = [[0, 1], [1, 2], [2, 3], [0, 3]];
    for (chunk, pair) in chunks.iter().zip(pairs) {
        for pos in pair {
            let obj = &chunk.objects[pos];
            shardpipe_storage::ClientSync::delete_object(connector.shard(&obj.shard_id).as_ref(), &obj.key)
                .unwrap();
        }
    }
    assert_eq!(pipeline.check(&chunks, false).await.unwrap(), CheckStatus::Valid);
    assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), data);

    let obj = &chunks[2].objects[0];
    shardpipe_storage::ClientSync::delete_object(connector.shard(&obj.shard_id).as_ref(), &obj.key).unwrap();
    assert_eq!(pipeline.check(&chunks, false).await.unwrap(), CheckStatus::Invalid);
    assert!(read_all(pipeline.as_ref(), &chunks).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_processing_stack_is_deterministic() {
    init_tracing();
    let data = random_bytes(10 * 1024, 4);
    let mut cfg = config(256, 10, 3);
    cfg.hashing.key = KEY.to_string();
    cfg.compression.mode = CompressionMode::Default;
    cfg.compression.compression_type = CompressionType::Lz4;
    cfg.encryption.key = KEY.to_string();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (cluster, _) = memory_cluster(13);
        let pipeline = new_pipeline(&cfg, cluster).unwrap();
        let chunks = write_all(pipeline.as_ref(), &data).await.unwrap();
        assert_eq!(chunks.len(), 40);
        assert!(chunks.iter().all(|c| c.objects.len() == 13));
        assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), data);
        runs.push(chunks.into_iter().map(|c| c.hash).collect::<Vec<_>>());
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_short_final_chunk_every_strategy() {
    init_tracing();
    for (k, m) in [(0, 0), (2, 0), (2, 1)] {
        let (cluster, _) = memory_cluster(3);
        let pipeline = new_pipeline(&config(2, k, m), cluster).unwrap();
        let chunks = write_all(pipeline.as_ref(), b"abcde").await.unwrap();
        let sizes: Vec<u64> = chunks.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![2, 2, 1], "k={} m={}", k, m);
        assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), b"abcde");
    }
}

#[test]
fn test_codec_any_four_of_eight() {
    let encoder = ErasureEncoder::new(4, 4).unwrap();
    let data = random_bytes(4097, 6);
    let parts = encoder.encode(&data).unwrap();

    for mask in 0u32..256 {
        if mask.count_ones() != 4 {
            continue;
        }
        let kept: Vec<_> = parts
            .iter()
            .enumerate()
            .map(|(i, p)| (mask & (1 << i) != 0).then(|| p.clone()))
            .collect();
        assert_eq!(encoder.decode(&kept, 4097).unwrap(), data);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_boundary_sizes() {
    init_tracing();
    let k = 3;
    let (cluster, _) = memory_cluster(5);
    let pipeline = new_pipeline(&config(0, k, 2), cluster).unwrap();

    // empty, no padding needed, maximum padding
    for len in [0, k * STRIPE_UNIT, k * STRIPE_UNIT + 1] {
        let data = random_bytes(len, len as u64);
        let chunks = write_all(pipeline.as_ref(), &data).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), data);
        assert_eq!(pipeline.check(&chunks, false).await.unwrap(), CheckStatus::Optimal);
    }
}

#[tokio::test]
async fn test_single_shard_single_copy() {
    let (cluster, _) = memory_cluster(1);
    let pipeline = new_pipeline(&config(3, 1, 0), cluster).unwrap();
    let chunks = write_all(pipeline.as_ref(), b"tiny cluster").await.unwrap();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.objects[0].shard_id == "shard-0"));
    assert_eq!(pipeline.check(&chunks, true).await.unwrap(), CheckStatus::Optimal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_on_one_pipeline() {
    init_tracing();
    let (cluster, _) = memory_cluster(6);
    let mut cfg = config(64, 2, 1);
    cfg.encryption.key = KEY[..16].to_string();
    let pipeline: std::sync::Arc<dyn shardpipe_pipeline::Pipeline> = new_pipeline(&cfg, cluster).unwrap().into();

    let mut tasks = Vec::new();
    for seed in 0..8u64 {
        let pipeline = pipeline.clone();
        tasks.push(tokio::spawn(async move {
            let data = random_bytes(1000 + seed as usize * 37, seed);
            let chunks = write_all(pipeline.as_ref(), &data).await.unwrap();
            (data, chunks)
        }));
    }

    for task in tasks {
        let (data, chunks) = task.await.unwrap();
        assert_eq!(chunks.len(), data.len().div_ceil(64));
        assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), data);
    }
}

#[tokio::test]
async fn test_pipeline_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        chunk_size = 10
        job_count = 2

        [hashing]
        type = "sha_256"

        [compression]
        mode = "best_compression"
        type = "gzip"

        [distribution]
        data_shards = 2
        parity_shards = 1

        [cluster]
        shards = ["node-a", "node-b", "node-c"]
        "#
    )
    .unwrap();

    let cfg = PipelineConfig::load(file.path()).unwrap();
    let connector = Arc::new(MemoryConnector::new("integration"));
    let cluster = new_cluster(&cfg, connector.clone()).unwrap();
    let pipeline = new_pipeline(&cfg, cluster).unwrap();

    let data = random_bytes(95, 9);
    let chunks = write_all(pipeline.as_ref(), &data).await.unwrap();
    assert_eq!(chunks.len(), 10);
    assert!(chunks.iter().all(|c| c.hash.len() == 32 && c.objects.len() == 3));
    assert_eq!(read_all(pipeline.as_ref(), &chunks).await.unwrap(), data);
    for id in ["node-a", "node-b", "node-c"] {
        assert_eq!(connector.shard(id).object_count(), 10);
    }

    pipeline.delete(&chunks).await.unwrap();
    pipeline.close().await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 0usize..300,
        strategy in 0usize..3,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (k, m) = [(0, 0), (2, 0), (3, 2)][strategy];

        let out = runtime.block_on(async {
            let (cluster, _) = memory_cluster(5);
            let mut cfg = config(chunk_size, k, m);
            cfg.compression.mode = CompressionMode::Default;
            cfg.encryption.key = KEY.to_string();
            let pipeline = new_pipeline(&cfg, cluster).unwrap();
            let chunks = write_all(pipeline.as_ref(), &data).await.unwrap();
            if chunk_size > 0 {
                assert_eq!(chunks.len(), data.len().div_ceil(chunk_size));
            } else {
                assert_eq!(chunks.len(), 1);
            }
            read_all(pipeline.as_ref(), &chunks).await.unwrap()
        });
        prop_assert_eq!(out, data);
    }
}
