//! Replicated placement: N identical copies on N distinct shards

use super::{
    delete_objects, log_shard_failure, probe_objects, shard_ids, ChunkStorage, Probe, RepairError,
};
use async_trait::async_trait;
use bytes::Bytes;
use shardpipe_core::chunk::{CheckStatus, ChunkConfig, ObjectRef};
use shardpipe_core::error::{Result, ShardPipeError};
use shardpipe_core::group::{send_or_cancel, spawn_feeder, ErrorGroup};
use shardpipe_storage::{shard_channel, Cluster, LazyShardIterator, ShardIterator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Stores every chunk as N copies on N distinct shards
pub struct ReplicatedChunkStorage {
    cluster: Arc<dyn Cluster>,
    data_shard_count: usize,
    job_count: usize,
    write_job_count: usize,
}

impl ReplicatedChunkStorage {
    /// Create a storage writing `data_shard_count` copies of every chunk
    pub fn new(cluster: Arc<dyn Cluster>, data_shard_count: usize, job_count: usize) -> Result<Self> {
        if data_shard_count == 0 {
            return Err(ShardPipeError::InvalidArgument(
                "replication requires at least one copy".to_string(),
            ));
        }
        if cluster.listed_shard_count() < data_shard_count {
            return Err(ShardPipeError::InvalidArgument(format!(
                "replication of {} copies requires at least {} listed shards, cluster has {}",
                data_shard_count,
                data_shard_count,
                cluster.listed_shard_count()
            )));
        }
        let job_count = job_count.max(1);
        Ok(Self {
            cluster,
            data_shard_count,
            job_count,
            // enough jobs to always write every copy concurrently
            write_job_count: job_count.max(data_shard_count),
        })
    }

    /// Replication factor
    pub fn data_shard_count(&self) -> usize {
        self.data_shard_count
    }

    /// Write `count` copies of `data` to distinct shards outside `except`.
    ///
    /// Returns the copies written, even when the write as a whole failed.
    async fn write_copies(
        &self,
        data: Bytes,
        count: usize,
        except: &[String],
    ) -> (Vec<ObjectRef>, Result<()>) {
        let mut group = ErrorGroup::new();
        let token = group.token();

        // one token per copy still to be written
        let requests = spawn_feeder(vec![(); count], count, token.clone());
        let shards = shard_channel(
            self.cluster.get_random_shard_iterator(except),
            count,
            token.clone(),
        );
        let (result_tx, mut result_rx) = mpsc::channel(count.max(1));

        for _ in 0..self.write_job_count.min(count) {
            let requests = requests.clone();
            let shards = shards.clone();
            let token = token.clone();
            let result_tx = result_tx.clone();
            let data = data.clone();
            group.spawn(async move {
                while requests.recv_or_cancel(&token).await.is_some() {
                    loop {
                        let Some(shard) = shards.recv_or_cancel(&token).await else {
                            if token.is_cancelled() {
                                return Ok(());
                            }
                            return Err(ShardPipeError::ShardsUnavailable);
                        };
                        match shard.create_object(data.clone()).await {
                            Ok(key) => {
                                let obj = ObjectRef::new(key, shard.identifier());
                                if !send_or_cancel(&result_tx, obj, &token).await {
                                    return Ok(());
                                }
                                break;
                            }
                            Err(err) => log_shard_failure(shard.identifier(), &err, "create_object"),
                        }
                    }
                }
                Ok(())
            });
        }
        drop(result_tx);

        let outcome = group.wait().await;
        let mut objects = Vec::with_capacity(count);
        while let Some(obj) = result_rx.recv().await {
            objects.push(obj);
        }
        (objects, outcome)
    }

    /// Read the first copy whose length matches the recorded size
    ///
    /// Copies are tried in placement order; shards the cluster cannot
    /// resolve are skipped by the iterator.
    async fn read_any(&self, size: u64, objects: &[ObjectRef]) -> Result<Bytes> {
        let mut shards = LazyShardIterator::new(Arc::clone(&self.cluster), shard_ids(objects));
        while shards.next() {
            let Some(shard) = shards.current().cloned() else {
                break;
            };
            // copies live on distinct shards
            let Some(obj) = objects.iter().find(|obj| obj.shard_id == shard.identifier()) else {
                continue;
            };
            match shard.get_object(&obj.key).await {
                Ok(object) if object.data.len() as u64 == size => return Ok(object.data),
                Ok(object) => warn!(
                    shard = %obj.shard_id,
                    expected = size,
                    actual = object.data.len(),
                    "replica has unexpected size"
                ),
                Err(err) => log_shard_failure(&obj.shard_id, &err, "get_object"),
            }
        }
        Err(ShardPipeError::ShardsUnavailable)
    }
}

#[async_trait]
impl ChunkStorage for ReplicatedChunkStorage {
    async fn write_chunk(&self, data: Bytes) -> Result<ChunkConfig> {
        let size = data.len() as u64;
        let (objects, outcome) = self.write_copies(data, self.data_shard_count, &[]).await;
        outcome?;
        debug!(copies = objects.len(), size, "chunk replicated");
        Ok(ChunkConfig::new(size, objects))
    }

    async fn read_chunk(&self, cfg: &ChunkConfig) -> Result<Bytes> {
        if cfg.objects.is_empty() {
            return Err(ShardPipeError::UnexpectedObjectCount {
                expected: self.data_shard_count,
                actual: 0,
            });
        }
        self.read_any(cfg.size, &cfg.objects).await
    }

    async fn check_chunk(&self, cfg: &ChunkConfig, fast: bool) -> Result<CheckStatus> {
        if cfg.objects.is_empty() {
            return Err(ShardPipeError::UnexpectedObjectCount {
                expected: self.data_shard_count,
                actual: 0,
            });
        }

        let stop_after = if fast { 1 } else { self.data_shard_count };
        let probes = probe_objects(&self.cluster, &cfg.objects, self.job_count, Some(stop_after)).await?;
        let valid = probes
            .iter()
            .filter(|(_, probe)| *probe == Probe::Valid)
            .count()
            .min(self.data_shard_count);

        Ok(match valid {
            0 => CheckStatus::Invalid,
            n if n == self.data_shard_count => CheckStatus::Optimal,
            _ => CheckStatus::Valid,
        })
    }

    async fn repair_chunk(&self, cfg: &ChunkConfig) -> std::result::Result<ChunkConfig, RepairError> {
        let mut probes = probe_objects(&self.cluster, &cfg.objects, self.job_count, None).await?;
        probes.sort_by_key(|(index, _)| *index);

        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        let mut unreachable = 0;
        for (index, probe) in probes {
            match probe {
                Probe::Valid => valid.push(cfg.objects[index].clone()),
                Probe::Invalid => invalid.push(cfg.objects[index].clone()),
                Probe::Unreachable => unreachable += 1,
            }
        }

        if valid.is_empty() {
            return Err(ShardPipeError::ShardsUnavailable.into());
        }
        if valid.len() >= self.data_shard_count {
            return Ok(ChunkConfig::new(cfg.size, valid));
        }

        info!(
            valid = valid.len(),
            invalid = invalid.len(),
            unreachable,
            target = self.data_shard_count,
            "repairing replicated chunk"
        );

        let data = self.read_any(cfg.size, &valid).await?;
        let missing = self.data_shard_count - valid.len();
        // unreachable shards may take a fresh copy
        let mut except = shard_ids(&valid);
        except.extend(shard_ids(&invalid));
        let (written, outcome) = self.write_copies(data, missing, &except).await;

        valid.extend(written);
        let repaired = ChunkConfig::new(cfg.size, valid);
        if let Err(err) = outcome {
            return Err(RepairError::partial(repaired, err));
        }
        if repaired.objects.len() < self.data_shard_count {
            return Err(RepairError::partial(repaired, ShardPipeError::ShardsUnavailable));
        }
        Ok(repaired)
    }

    async fn delete_chunk(&self, cfg: &ChunkConfig) -> Result<()> {
        delete_objects(&self.cluster, &cfg.objects, self.job_count).await
    }

    async fn close(&self) -> Result<()> {
        self.cluster.close().await
    }
}
