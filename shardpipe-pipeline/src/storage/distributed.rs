//! Erasure-coded placement: k data parts and m parity parts on k+m shards

use super::{delete_objects, log_shard_failure, probe_objects, ChunkStorage, Probe, RepairError};
use async_trait::async_trait;
use bytes::Bytes;
use shardpipe_core::chunk::{CheckStatus, ChunkConfig, ObjectRef};
use shardpipe_core::erasure::ErasureEncoder;
use shardpipe_core::error::{Result, ShardPipeError};
use shardpipe_core::group::{send_or_cancel, spawn_feeder, ErrorGroup};
use shardpipe_storage::{shard_channel, Cluster, ObjectStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Stores every chunk as `k + m` Reed-Solomon parts on distinct shards
pub struct DistributedChunkStorage {
    cluster: Arc<dyn Cluster>,
    encoder: ErasureEncoder,
    job_count: usize,
}

impl DistributedChunkStorage {
    /// Create a storage splitting chunks into `data_shards` data parts and
    /// `parity_shards` parity parts
    pub fn new(
        cluster: Arc<dyn Cluster>,
        data_shards: usize,
        parity_shards: usize,
        job_count: usize,
    ) -> Result<Self> {
        let encoder = ErasureEncoder::new(data_shards, parity_shards)?;
        let required = encoder.required_shard_count();
        if cluster.listed_shard_count() < required {
            return Err(ShardPipeError::InvalidArgument(format!(
                "erasure coding {}+{} requires at least {} listed shards, cluster has {}",
                data_shards,
                parity_shards,
                required,
                cluster.listed_shard_count()
            )));
        }
        Ok(Self {
            cluster,
            encoder,
            job_count: job_count.max(1),
        })
    }

    pub fn encoder(&self) -> &ErasureEncoder {
        &self.encoder
    }

    fn check_object_count(&self, cfg: &ChunkConfig) -> Result<()> {
        let expected = self.encoder.required_shard_count();
        if cfg.objects.len() != expected {
            return Err(ShardPipeError::UnexpectedObjectCount {
                expected,
                actual: cfg.objects.len(),
            });
        }
        Ok(())
    }

    /// Fetch parts until `k` are collected, then decode.
    ///
    /// With `check_status`, objects whose shard does not report them as
    /// healthy are skipped without being read.
    async fn read_chunk_inner(&self, cfg: &ChunkConfig, check_status: bool) -> Result<Bytes> {
        self.check_object_count(cfg)?;

        let total = self.encoder.required_shard_count();
        let needed = self.encoder.minimum_valid_shard_count();
        let part_size = self.encoder.checked_shard_size(cfg.size).ok_or_else(|| {
            ShardPipeError::InvalidArgument(format!("recorded chunk size {} is too large", cfg.size))
        })?;

        let mut group = ErrorGroup::new();
        let token = group.token();
        let jobs = self.job_count.min(total);
        let queue = spawn_feeder(
            cfg.objects.iter().cloned().enumerate().collect(),
            jobs,
            token.clone(),
        );
        let (tx, mut rx) = mpsc::channel(total);

        for _ in 0..jobs {
            let cluster = Arc::clone(&self.cluster);
            let queue = queue.clone();
            let token = token.clone();
            let tx = tx.clone();
            group.spawn(async move {
                while let Some((index, obj)) = queue.recv_or_cancel(&token).await {
                    let Some(data) = fetch_part(cluster.as_ref(), &obj, part_size, check_status).await else {
                        continue;
                    };
                    if !send_or_cancel(&tx, (index, data), &token).await {
                        break;
                    }
                }
                Ok(())
            });
        }
        drop(tx);

        let mut parts: Vec<Option<Bytes>> = vec![None; total];
        let mut collected = 0;
        while let Some((index, data)) = rx.recv().await {
            parts[index] = Some(data);
            collected += 1;
            if collected >= needed {
                token.cancel();
                break;
            }
        }
        drop(rx);
        group.wait().await?;

        if collected < needed {
            warn!(collected, needed, "not enough parts to rebuild chunk");
            return Err(ShardPipeError::ShardsUnavailable);
        }

        match self.encoder.decode(&parts, cfg.size) {
            Err(ShardPipeError::InsufficientShards { .. }) => Err(ShardPipeError::ShardsUnavailable),
            other => other,
        }
    }
}

/// Read one part, returning `None` when it is missing, damaged or unreachable
async fn fetch_part(
    cluster: &dyn Cluster,
    obj: &ObjectRef,
    part_size: usize,
    check_status: bool,
) -> Option<Bytes> {
    let shard = match cluster.get_shard(&obj.shard_id) {
        Ok(shard) => shard,
        Err(err) => {
            log_shard_failure(&obj.shard_id, &err, "get_shard");
            return None;
        }
    };

    if check_status {
        match shard.get_object_status(&obj.key).await {
            Ok(ObjectStatus::Ok) => {}
            Ok(status) => {
                debug!(shard = %obj.shard_id, %status, "skipping unhealthy part");
                return None;
            }
            Err(err) => {
                log_shard_failure(&obj.shard_id, &err, "get_object_status");
                return None;
            }
        }
    }

    match shard.get_object(&obj.key).await {
        Ok(object) if object.data.len() == part_size => Some(object.data),
        Ok(object) => {
            warn!(
                shard = %obj.shard_id,
                expected = part_size,
                actual = object.data.len(),
                "part has unexpected size"
            );
            None
        }
        Err(err) => {
            log_shard_failure(&obj.shard_id, &err, "get_object");
            None
        }
    }
}

#[async_trait]
impl ChunkStorage for DistributedChunkStorage {
    async fn write_chunk(&self, data: Bytes) -> Result<ChunkConfig> {
        let size = data.len() as u64;
        let parts = self.encoder.encode(&data)?;
        let total = parts.len();

        let mut group = ErrorGroup::new();
        let token = group.token();
        // every part draws from the same stream, so no shard holds two parts
        let shards = shard_channel(self.cluster.get_random_shard_iterator(&[]), total, token.clone());
        let (tx, mut rx) = mpsc::channel(total);

        for (index, part) in parts.into_iter().enumerate() {
            let shards = shards.clone();
            let token = token.clone();
            let tx = tx.clone();
            group.spawn(async move {
                loop {
                    let Some(shard) = shards.recv_or_cancel(&token).await else {
                        if token.is_cancelled() {
                            return Ok(());
                        }
                        return Err(ShardPipeError::ShardsUnavailable);
                    };
                    match shard.create_object(part.clone()).await {
                        Ok(key) => {
                            let obj = ObjectRef::new(key, shard.identifier());
                            send_or_cancel(&tx, (index, obj), &token).await;
                            return Ok(());
                        }
                        Err(err) => log_shard_failure(shard.identifier(), &err, "create_object"),
                    }
                }
            });
        }
        drop(tx);

        group.wait().await?;

        let mut slots: Vec<Option<ObjectRef>> = vec![None; total];
        while let Some((index, obj)) = rx.recv().await {
            slots[index] = Some(obj);
        }
        let objects = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(ShardPipeError::ShardsUnavailable)?;

        debug!(parts = total, size, "chunk distributed");
        Ok(ChunkConfig::new(size, objects))
    }

    async fn read_chunk(&self, cfg: &ChunkConfig) -> Result<Bytes> {
        self.read_chunk_inner(cfg, false).await
    }

    async fn check_chunk(&self, cfg: &ChunkConfig, fast: bool) -> Result<CheckStatus> {
        self.check_object_count(cfg)?;

        let total = self.encoder.required_shard_count();
        let needed = self.encoder.minimum_valid_shard_count();
        let target = if fast { needed } else { total };

        let probes = probe_objects(&self.cluster, &cfg.objects, self.job_count, Some(target)).await?;
        let valid = probes
            .iter()
            .filter(|(_, probe)| *probe == Probe::Valid)
            .count();

        Ok(if valid >= total {
            CheckStatus::Optimal
        } else if valid >= needed {
            CheckStatus::Valid
        } else {
            CheckStatus::Invalid
        })
    }

    async fn repair_chunk(&self, cfg: &ChunkConfig) -> std::result::Result<ChunkConfig, RepairError> {
        let data = self.read_chunk_inner(cfg, true).await?;
        info!(size = cfg.size, "rewriting erasure-coded chunk");
        Ok(self.write_chunk(data).await?)
    }

    async fn delete_chunk(&self, cfg: &ChunkConfig) -> Result<()> {
        self.check_object_count(cfg)?;
        delete_objects(&self.cluster, &cfg.objects, self.job_count).await
    }

    async fn close(&self) -> Result<()> {
        self.cluster.close().await
    }
}
