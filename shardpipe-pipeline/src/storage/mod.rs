//! Chunk storage strategies
//!
//! A [`ChunkStorage`] places one chunk of already-processed bytes on the
//! cluster and can later read, check, repair and delete it:
//!
//! - [`RandomChunkStorage`]: a single object on one random shard
//! - [`ReplicatedChunkStorage`]: N identical copies on N distinct shards
//! - [`DistributedChunkStorage`]: k data + m parity parts (Reed-Solomon)
//!
//! Single-shard failures during placement are logged and the next shard
//! is tried; only running out of shards surfaces as `ShardsUnavailable`.

mod distributed;
mod random;
mod replicated;

pub use distributed::DistributedChunkStorage;
pub use random::RandomChunkStorage;
pub use replicated::ReplicatedChunkStorage;

use async_trait::async_trait;
use bytes::Bytes;
use shardpipe_core::chunk::{CheckStatus, ChunkConfig, ObjectRef};
use shardpipe_core::error::{Result, ShardPipeError};
use shardpipe_core::group::{spawn_feeder, ErrorGroup};
use shardpipe_storage::{Cluster, ObjectStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Places, reads, checks, repairs and deletes a single chunk
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store processed data, returning where it was placed
    async fn write_chunk(&self, data: Bytes) -> Result<ChunkConfig>;

    /// Fetch the processed data of a chunk
    async fn read_chunk(&self, cfg: &ChunkConfig) -> Result<Bytes>;

    /// Report the health of a chunk; unhealthy is a status, not an error
    async fn check_chunk(&self, cfg: &ChunkConfig, fast: bool) -> Result<CheckStatus>;

    /// Restore full redundancy, returning the updated placement
    async fn repair_chunk(&self, cfg: &ChunkConfig) -> std::result::Result<ChunkConfig, RepairError>;

    /// Delete every object of a chunk
    async fn delete_chunk(&self, cfg: &ChunkConfig) -> Result<()>;

    /// Close the underlying cluster
    async fn close(&self) -> Result<()>;
}

/// Failed repair, possibly carrying a degraded but usable placement
///
/// A replicated repair that could not place every copy still returns the
/// copies it has, so the caller can decide to keep the degraded chunk.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RepairError {
    pub partial: Option<ChunkConfig>,
    #[source]
    pub source: ShardPipeError,
}

impl RepairError {
    pub fn partial(partial: ChunkConfig, source: ShardPipeError) -> Self {
        Self {
            partial: Some(partial),
            source,
        }
    }
}

impl From<ShardPipeError> for RepairError {
    fn from(source: ShardPipeError) -> Self {
        Self {
            partial: None,
            source,
        }
    }
}

impl From<RepairError> for ShardPipeError {
    fn from(err: RepairError) -> Self {
        err.source
    }
}

/// Log a failed shard operation at the level its kind calls for.
pub(crate) fn log_shard_failure(shard: &str, err: &ShardPipeError, action: &'static str) {
    match err {
        ShardPipeError::NamespaceFull { .. } => {
            warn!(shard = %shard, error = %err, action, "shard namespace is full")
        }
        err if err.is_shard_error() => {
            error!(shard = %shard, error = %err, action, "shard operation failed")
        }
        err if err.is_integrity_failure() => {
            error!(shard = %shard, error = %err, action, "shard returned invalid data")
        }
        _ => error!(shard = %shard, error = %err, action, "shard unreachable"),
    }
}

/// Outcome of probing one stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Valid,
    Invalid,
    Unreachable,
}

async fn probe_object(cluster: &dyn Cluster, obj: &ObjectRef) -> Probe {
    let shard = match cluster.get_shard(&obj.shard_id) {
        Ok(shard) => shard,
        Err(err) => {
            log_shard_failure(&obj.shard_id, &err, "get_shard");
            return Probe::Unreachable;
        }
    };
    match shard.get_object_status(&obj.key).await {
        Ok(ObjectStatus::Ok) => Probe::Valid,
        Ok(_) => Probe::Invalid,
        Err(err) => {
            log_shard_failure(&obj.shard_id, &err, "get_object_status");
            Probe::Unreachable
        }
    }
}

/// Probe the status of `objects` in parallel.
///
/// With `stop_after_valid`, probing stops as soon as that many objects are
/// valid. Results are `(position, probe)` pairs in completion order.
pub(crate) async fn probe_objects(
    cluster: &Arc<dyn Cluster>,
    objects: &[ObjectRef],
    job_count: usize,
    stop_after_valid: Option<usize>,
) -> Result<Vec<(usize, Probe)>> {
    if objects.is_empty() {
        return Ok(Vec::new());
    }

    let mut group = ErrorGroup::new();
    let token = group.token();
    let jobs = job_count.clamp(1, objects.len());
    let queue = spawn_feeder(
        objects.iter().cloned().enumerate().collect(),
        jobs,
        token.clone(),
    );
    let (tx, mut rx) = mpsc::channel(objects.len());

    for _ in 0..jobs {
        let cluster = Arc::clone(cluster);
        let queue = queue.clone();
        let token = token.clone();
        let tx = tx.clone();
        group.spawn(async move {
            while let Some((index, obj)) = queue.recv_or_cancel(&token).await {
                let probe = probe_object(cluster.as_ref(), &obj).await;
                if tx.send((index, probe)).await.is_err() {
                    break;
                }
            }
            Ok(())
        });
    }
    drop(tx);

    let mut probes = Vec::with_capacity(objects.len());
    let mut valid = 0;
    while let Some((index, probe)) = rx.recv().await {
        if probe == Probe::Valid {
            valid += 1;
        }
        probes.push((index, probe));
        if stop_after_valid.is_some_and(|limit| valid >= limit) {
            token.cancel();
            break;
        }
    }
    drop(rx);

    group.wait().await?;
    Ok(probes)
}

/// Delete `objects` in parallel; the first error aborts the rest.
pub(crate) async fn delete_objects(
    cluster: &Arc<dyn Cluster>,
    objects: &[ObjectRef],
    job_count: usize,
) -> Result<()> {
    if objects.is_empty() {
        return Ok(());
    }

    let mut group = ErrorGroup::new();
    let token = group.token();
    let jobs = job_count.clamp(1, objects.len());
    let queue = spawn_feeder(objects.to_vec(), jobs, token.clone());

    for _ in 0..jobs {
        let cluster = Arc::clone(cluster);
        let queue = queue.clone();
        let token = token.clone();
        group.spawn(async move {
            while let Some(obj) = queue.recv_or_cancel(&token).await {
                let shard = cluster.get_shard(&obj.shard_id)?;
                shard.delete_object(&obj.key).await?;
            }
            Ok(())
        });
    }

    group.wait().await
}

/// Shard identifiers used by a placement
pub(crate) fn shard_ids(objects: &[ObjectRef]) -> Vec<String> {
    objects.iter().map(|obj| obj.shard_id.clone()).collect()
}
