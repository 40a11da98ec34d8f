//! ShardPipe Storage
//!
//! Provides the shard-facing side of the pipeline:
//! - `Client` / `ClientSync` traits every shard implements
//! - `MemoryClient` and `MemoryConnector` for testing
//! - `ShardCluster`: listed shards plus lazily created unlisted shards
//! - Ordered and random shard iterators, and a channel adapter that lets
//!   many workers draw shards without ever sharing one

pub mod client;
pub mod cluster;
pub mod iterator;
pub mod memory;

pub use client::{AsyncClient, Client, ClientSync, Namespace, Object, ObjectStatus, Shard};
pub use cluster::{Cluster, ShardCluster, ShardConnector};
pub use iterator::{random_index, shard_channel, LazyShardIterator, RandomShardIterator, ShardIterator};
pub use memory::{MemoryClient, MemoryConnector};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cluster configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Addresses of the listed shards
    pub shards: Vec<String>,
}

impl ClusterConfig {
    /// Create a cluster config for the given shard addresses
    pub fn new<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shards: shards.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a cluster, connecting to every listed shard
    pub fn connect(&self, connector: Arc<dyn ShardConnector>) -> shardpipe_core::Result<ShardCluster> {
        ShardCluster::new(&self.shards, connector)
    }
}
