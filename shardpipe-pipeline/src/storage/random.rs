//! Random placement: one object on one randomly chosen shard

use super::{log_shard_failure, ChunkStorage, RepairError};
use async_trait::async_trait;
use bytes::Bytes;
use shardpipe_core::chunk::{CheckStatus, ChunkConfig, ObjectRef};
use shardpipe_core::error::{Result, ShardPipeError};
use shardpipe_storage::{Cluster, ObjectStatus, ShardIterator};
use std::sync::Arc;
use tracing::debug;

/// Stores every chunk as a single object on a random shard
pub struct RandomChunkStorage {
    cluster: Arc<dyn Cluster>,
}

impl RandomChunkStorage {
    pub fn new(cluster: Arc<dyn Cluster>) -> Result<Self> {
        if cluster.listed_shard_count() == 0 {
            return Err(ShardPipeError::InvalidArgument(
                "random chunk storage requires at least one listed shard".to_string(),
            ));
        }
        Ok(Self { cluster })
    }

    fn single_object(cfg: &ChunkConfig) -> Result<&ObjectRef> {
        match cfg.objects.as_slice() {
            [obj] => Ok(obj),
            objects => Err(ShardPipeError::UnexpectedObjectCount {
                expected: 1,
                actual: objects.len(),
            }),
        }
    }
}

#[async_trait]
impl ChunkStorage for RandomChunkStorage {
    async fn write_chunk(&self, data: Bytes) -> Result<ChunkConfig> {
        let size = data.len() as u64;
        let mut shards = self.cluster.get_random_shard_iterator(&[]);

        while shards.next() {
            let Some(shard) = shards.current().cloned() else {
                break;
            };
            match shard.create_object(data.clone()).await {
                Ok(key) => {
                    debug!(shard = %shard.identifier(), size, "chunk written");
                    return Ok(ChunkConfig::new(size, vec![ObjectRef::new(key, shard.identifier())]));
                }
                Err(err) => log_shard_failure(shard.identifier(), &err, "create_object"),
            }
        }

        Err(ShardPipeError::ShardsUnavailable)
    }

    async fn read_chunk(&self, cfg: &ChunkConfig) -> Result<Bytes> {
        let obj = Self::single_object(cfg)?;
        let shard = self.cluster.get_shard(&obj.shard_id)?;
        let object = shard.get_object(&obj.key).await?;

        if object.data.len() as u64 != cfg.size {
            return Err(ShardPipeError::InvalidDataSize {
                expected: cfg.size,
                actual: object.data.len() as u64,
            });
        }
        Ok(object.data)
    }

    async fn check_chunk(&self, cfg: &ChunkConfig, _fast: bool) -> Result<CheckStatus> {
        let obj = Self::single_object(cfg)?;
        let shard = match self.cluster.get_shard(&obj.shard_id) {
            Ok(shard) => shard,
            Err(err) => {
                log_shard_failure(&obj.shard_id, &err, "get_shard");
                return Ok(CheckStatus::Invalid);
            }
        };

        match shard.get_object_status(&obj.key).await {
            Ok(ObjectStatus::Ok) => Ok(CheckStatus::Optimal),
            Ok(_) => Ok(CheckStatus::Invalid),
            Err(err) => {
                log_shard_failure(&obj.shard_id, &err, "get_object_status");
                Ok(CheckStatus::Invalid)
            }
        }
    }

    async fn repair_chunk(&self, _cfg: &ChunkConfig) -> std::result::Result<ChunkConfig, RepairError> {
        Err(ShardPipeError::NotSupported("repair of randomly placed chunks").into())
    }

    async fn delete_chunk(&self, cfg: &ChunkConfig) -> Result<()> {
        let obj = Self::single_object(cfg)?;
        let shard = self.cluster.get_shard(&obj.shard_id)?;
        shard.delete_object(&obj.key).await
    }

    async fn close(&self) -> Result<()> {
        self.cluster.close().await
    }
}
