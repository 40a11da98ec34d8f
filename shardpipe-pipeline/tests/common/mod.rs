//! Shared helpers for the pipeline integration tests

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use shardpipe_core::{Chunk, Result};
use shardpipe_pipeline::Pipeline;
use shardpipe_storage::{Cluster, MemoryConnector, ShardCluster};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Cluster of `n` in-memory shards named `shard-0..n`
pub fn memory_cluster(n: usize) -> (Arc<dyn Cluster>, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::new("integration"));
    let addresses: Vec<String> = (0..n).map(|i| format!("shard-{}", i)).collect();
    let cluster = ShardCluster::new(&addresses, connector.clone()).unwrap();
    (Arc::new(cluster), connector)
}

/// Deterministic pseudo-random bytes
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

pub async fn read_all(pipeline: &dyn Pipeline, chunks: &[Chunk]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pipeline.read(chunks, &mut out).await?;
    Ok(out)
}

pub async fn write_all(pipeline: &dyn Pipeline, data: &[u8]) -> Result<Vec<Chunk>> {
    let mut reader = data;
    pipeline.write(&mut reader).await
}
