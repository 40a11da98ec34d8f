//! Builds pipelines and their parts from a [`PipelineConfig`]
//!
//! Hasher and processor constructors are invoked once while building, so
//! unknown algorithms and bad keys fail here instead of mid-stream.

use crate::config::{PipelineConfig, Placement};
use crate::pipeline::{AsyncSplitterPipeline, Pipeline, SingleObjectPipeline};
use crate::storage::{ChunkStorage, DistributedChunkStorage, RandomChunkStorage, ReplicatedChunkStorage};
use shardpipe_core::crypto::{hasher_constructor, HasherConstructor};
use shardpipe_core::error::Result;
use shardpipe_core::processing::{processor_constructor, ProcessorConstructor};
use shardpipe_storage::{Cluster, ShardConnector};
use std::sync::Arc;
use tracing::{debug, info};

/// Hasher constructor for the configured algorithm and key
pub fn new_hasher_constructor(config: &PipelineConfig) -> Result<HasherConstructor> {
    let constructor = hasher_constructor(config.hashing.hash_type.clone(), config.hash_key().to_vec());
    constructor()?;
    Ok(constructor)
}

/// Processor constructor for the configured compression and encryption
pub fn new_processor_constructor(config: &PipelineConfig) -> Result<ProcessorConstructor> {
    let constructor = processor_constructor(
        (config.compression.compression_type, config.compression.mode),
        (
            config.encryption.encryption_type,
            config.encryption.key.as_bytes().to_vec(),
        ),
    );
    constructor()?;
    Ok(constructor)
}

/// Cluster of the configured shard addresses
pub fn new_cluster(config: &PipelineConfig, connector: Arc<dyn ShardConnector>) -> Result<Arc<dyn Cluster>> {
    let cluster = config.cluster.connect(connector)?;
    debug!(shards = config.cluster.shards.len(), "cluster connected");
    Ok(Arc::new(cluster))
}

/// Chunk storage for the configured distribution
pub fn new_chunk_storage(config: &PipelineConfig, cluster: Arc<dyn Cluster>) -> Result<Arc<dyn ChunkStorage>> {
    let storage: Arc<dyn ChunkStorage> = match config.distribution.placement()? {
        Placement::Random => Arc::new(RandomChunkStorage::new(cluster)?),
        Placement::Replicated(copies) => {
            Arc::new(ReplicatedChunkStorage::new(cluster, copies, config.job_count)?)
        }
        Placement::Distributed {
            data_shards,
            parity_shards,
        } => Arc::new(DistributedChunkStorage::new(
            cluster,
            data_shards,
            parity_shards,
            config.job_count,
        )?),
    };
    Ok(storage)
}

/// Complete pipeline: single object when `chunk_size` is 0, chunked otherwise
pub fn new_pipeline(config: &PipelineConfig, cluster: Arc<dyn Cluster>) -> Result<Box<dyn Pipeline>> {
    config.validate()?;

    let hasher = new_hasher_constructor(config)?;
    let processor = new_processor_constructor(config)?;
    let storage = new_chunk_storage(config, cluster)?;

    info!(
        chunk_size = config.chunk_size,
        data_shards = config.distribution.data_shards,
        parity_shards = config.distribution.parity_shards,
        job_count = config.job_count,
        "pipeline created"
    );

    if config.chunk_size == 0 {
        Ok(Box::new(SingleObjectPipeline::new(storage, hasher, processor)))
    } else {
        Ok(Box::new(AsyncSplitterPipeline::new(
            storage,
            config.chunk_size,
            hasher,
            processor,
            config.job_count,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistributionConfig;
    use crate::storage::test_util::memory_cluster;
    use shardpipe_core::error::ShardPipeError;
    use shardpipe_core::processing::CompressionMode;
    use shardpipe_storage::{ClusterConfig, MemoryConnector};

    #[test]
    fn test_unknown_hash_type_fails_early() {
        let mut config = PipelineConfig::default();
        config.hashing.hash_type = "md5".to_string();
        assert!(matches!(
            new_hasher_constructor(&config),
            Err(ShardPipeError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_encryption_key_fails_early() {
        let mut config = PipelineConfig::default();
        config.encryption.key = "short".to_string();
        assert!(new_processor_constructor(&config).is_err());
    }

    #[test]
    fn test_storage_selection() {
        let (cluster, _) = memory_cluster(4);
        let mut config = PipelineConfig::default();
        assert!(new_chunk_storage(&config, cluster.clone()).is_ok());

        config.distribution = DistributionConfig::new(4, 0);
        assert!(new_chunk_storage(&config, cluster.clone()).is_ok());
        config.distribution = DistributionConfig::new(5, 0);
        assert!(new_chunk_storage(&config, cluster.clone()).is_err());

        config.distribution = DistributionConfig::new(2, 2);
        assert!(new_chunk_storage(&config, cluster.clone()).is_ok());
        config.distribution = DistributionConfig::new(0, 2);
        assert!(matches!(
            new_chunk_storage(&config, cluster),
            Err(ShardPipeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_from_configured_cluster() {
        let connector = Arc::new(MemoryConnector::new("test"));
        let mut config = PipelineConfig {
            chunk_size: 4,
            distribution: DistributionConfig::new(2, 1),
            ..Default::default()
        };
        config.cluster = ClusterConfig::new(["a", "b", "c"]);

        let cluster = new_cluster(&config, connector.clone()).unwrap();
        assert_eq!(cluster.listed_shard_count(), 3);

        let pipeline = new_pipeline(&config, cluster).unwrap();
        let chunks = pipeline.write(&mut &b"configured"[..]).await.unwrap();
        assert_eq!(chunks.len(), 3);
        for id in ["a", "b", "c"] {
            assert_eq!(connector.shard(id).object_count(), 3);
        }

        config.cluster = ClusterConfig::new(["a", "a"]);
        assert!(new_cluster(&config, connector).is_err());
    }

    #[test]
    fn test_pipeline_kind_follows_chunk_size() {
        let (cluster, _) = memory_cluster(2);
        let mut config = PipelineConfig::default();
        config.compression.mode = CompressionMode::Default;

        let single = new_pipeline(&config, cluster.clone()).unwrap();
        assert_eq!(single.chunk_size(), 0);

        config.chunk_size = 512;
        let chunked = new_pipeline(&config, cluster).unwrap();
        assert_eq!(chunked.chunk_size(), 512);
    }
}
