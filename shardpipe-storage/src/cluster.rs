//! Shard cluster
//!
//! A cluster holds a fixed set of listed shards plus a cache of unlisted
//! shards created on demand when an identifier outside the listed set is
//! requested (for example, when reading data placed by an older cluster).

use crate::client::{Client, Shard};
use crate::iterator::{random_index, RandomShardIterator};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use shardpipe_core::error::{Result, ShardPipeError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

/// Creates a client for a shard address
pub trait ShardConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn Client>>;
}

/// Set of shards addressed by the pipeline
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Listed shard with this identifier, or a lazily created unlisted one
    fn get_shard(&self, id: &str) -> Result<Shard>;

    /// Pseudo-random listed shard
    fn get_random_shard(&self) -> Result<Shard>;

    /// Iterator over every listed shard not in `except`, in random order
    fn get_random_shard_iterator(&self, except: &[String]) -> RandomShardIterator;

    /// Number of listed shards
    fn listed_shard_count(&self) -> usize;

    /// Close every listed and unlisted shard
    async fn close(&self) -> Result<()>;
}

/// Cluster backed by a [`ShardConnector`]
pub struct ShardCluster {
    listed: HashMap<String, Shard>,
    listed_slice: Vec<Shard>,
    unlisted: Mutex<HashMap<String, Shard>>,
    connector: Arc<dyn ShardConnector>,
}

impl ShardCluster {
    /// Connect to every listed address up front
    pub fn new(addresses: &[String], connector: Arc<dyn ShardConnector>) -> Result<Self> {
        let mut listed = HashMap::with_capacity(addresses.len());
        let mut listed_slice = Vec::with_capacity(addresses.len());
        for address in addresses {
            if listed.contains_key(address) {
                return Err(ShardPipeError::InvalidArgument(format!(
                    "duplicate shard address: {}",
                    address
                )));
            }
            let shard = Shard::new(address.as_str(), connector.connect(address)?);
            listed.insert(address.clone(), shard.clone());
            listed_slice.push(shard);
        }
        debug!(shards = listed_slice.len(), "cluster created");

        Ok(Self {
            listed,
            listed_slice,
            unlisted: Mutex::new(HashMap::new()),
            connector,
        })
    }

    /// Listed shards, in the order they were given
    pub fn listed_shards(&self) -> &[Shard] {
        &self.listed_slice
    }

    /// Number of unlisted shards created so far
    pub fn unlisted_shard_count(&self) -> usize {
        self.unlisted.lock().len()
    }
}

#[async_trait]
impl Cluster for ShardCluster {
    fn get_shard(&self, id: &str) -> Result<Shard> {
        if let Some(shard) = self.listed.get(id) {
            return Ok(shard.clone());
        }

        let mut unlisted = self.unlisted.lock();
        if let Some(shard) = unlisted.get(id) {
            return Ok(shard.clone());
        }
        let shard = Shard::new(id, self.connector.connect(id)?);
        unlisted.insert(id.to_string(), shard.clone());
        debug!(shard = %id, "created unlisted shard");
        Ok(shard)
    }

    fn get_random_shard(&self) -> Result<Shard> {
        if self.listed_slice.is_empty() {
            return Err(ShardPipeError::ShardsUnavailable);
        }
        Ok(self.listed_slice[random_index(self.listed_slice.len())].clone())
    }

    fn get_random_shard_iterator(&self, except: &[String]) -> RandomShardIterator {
        if except.is_empty() {
            return RandomShardIterator::new(self.listed_slice.clone());
        }
        let except: HashSet<&str> = except.iter().map(String::as_str).collect();
        let shards = self
            .listed_slice
            .iter()
            .filter(|shard| !except.contains(shard.identifier()))
            .cloned()
            .collect();
        RandomShardIterator::new(shards)
    }

    fn listed_shard_count(&self) -> usize {
        self.listed_slice.len()
    }

    async fn close(&self) -> Result<()> {
        let unlisted: Vec<Shard> = self.unlisted.lock().drain().map(|(_, s)| s).collect();

        let shards: Vec<&Shard> = self.listed_slice.iter().chain(unlisted.iter()).collect();
        let results = join_all(shards.iter().map(|shard| shard.close())).await;

        let mut failures = Vec::new();
        for (shard, result) in shards.iter().zip(results) {
            if let Err(err) = result {
                error!(shard = %shard.identifier(), error = %err, "failed to close shard");
                failures.push(format!("{}: {}", shard.identifier(), err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShardPipeError::Transport(format!(
                "failed to close {} shard(s): {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientFuture;
    use crate::client::{Namespace, Object, ObjectStatus};
    use crate::iterator::ShardIterator;
    use crate::memory::MemoryConnector;
    use bytes::Bytes;

    fn addresses(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.0.{}:9900", i)).collect()
    }

    #[test]
    fn test_listed_shards() {
        let cluster = ShardCluster::new(&addresses(4), Arc::new(MemoryConnector::new("ns"))).unwrap();
        assert_eq!(cluster.listed_shard_count(), 4);

        let shard = cluster.get_shard("10.0.0.2:9900").unwrap();
        assert_eq!(shard.identifier(), "10.0.0.2:9900");
        assert_eq!(cluster.unlisted_shard_count(), 0);
    }

    #[test]
    fn test_unlisted_shards_are_cached() {
        let cluster = ShardCluster::new(&addresses(2), Arc::new(MemoryConnector::new("ns"))).unwrap();
        cluster.get_shard("192.168.1.1:9900").unwrap();
        cluster.get_shard("192.168.1.1:9900").unwrap();
        assert_eq!(cluster.unlisted_shard_count(), 1);
        // unlisted shards are never handed out at random
        assert_eq!(cluster.listed_shard_count(), 2);
    }

    #[test]
    fn test_duplicate_address() {
        let mut addrs = addresses(2);
        addrs.push(addrs[0].clone());
        assert!(ShardCluster::new(&addrs, Arc::new(MemoryConnector::new("ns"))).is_err());
    }

    #[test]
    fn test_random_shard() {
        let cluster = ShardCluster::new(&addresses(3), Arc::new(MemoryConnector::new("ns"))).unwrap();
        let shard = cluster.get_random_shard().unwrap();
        assert!(addresses(3).contains(&shard.identifier().to_string()));

        let empty = ShardCluster::new(&[], Arc::new(MemoryConnector::new("ns"))).unwrap();
        assert!(matches!(
            empty.get_random_shard(),
            Err(ShardPipeError::ShardsUnavailable)
        ));
    }

    #[test]
    fn test_random_iterator_except() {
        let addrs = addresses(5);
        let cluster = ShardCluster::new(&addrs, Arc::new(MemoryConnector::new("ns"))).unwrap();
        let except = vec![addrs[1].clone(), addrs[3].clone()];

        let mut iter = cluster.get_random_shard_iterator(&except);
        let mut seen = Vec::new();
        while iter.next() {
            seen.push(iter.current().unwrap().identifier().to_string());
        }
        seen.sort();
        assert_eq!(seen, vec![addrs[0].clone(), addrs[2].clone(), addrs[4].clone()]);
    }

    struct FailingClose;

    impl Client for FailingClose {
        fn create_object<'a>(&'a self, _data: Bytes) -> ClientFuture<'a, Vec<u8>> {
            Box::pin(async { Err(ShardPipeError::Transport("down".into())) })
        }
        fn get_object<'a>(&'a self, _key: &'a [u8]) -> ClientFuture<'a, Object> {
            Box::pin(async { Err(ShardPipeError::Transport("down".into())) })
        }
        fn delete_object<'a>(&'a self, _key: &'a [u8]) -> ClientFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
        fn get_object_status<'a>(&'a self, _key: &'a [u8]) -> ClientFuture<'a, ObjectStatus> {
            Box::pin(async { Ok(ObjectStatus::Missing) })
        }
        fn exist_object<'a>(&'a self, _key: &'a [u8]) -> ClientFuture<'a, bool> {
            Box::pin(async { Ok(false) })
        }
        fn get_namespace<'a>(&'a self) -> ClientFuture<'a, Namespace> {
            Box::pin(async { Ok(Namespace::default()) })
        }
        fn close<'a>(&'a self) -> ClientFuture<'a, ()> {
            Box::pin(async { Err(ShardPipeError::Transport("close failed".into())) })
        }
    }

    struct FailingConnector;

    impl ShardConnector for FailingConnector {
        fn connect(&self, _address: &str) -> Result<Arc<dyn Client>> {
            Ok(Arc::new(FailingClose))
        }
    }

    #[tokio::test]
    async fn test_close_aggregates_errors() {
        let cluster = ShardCluster::new(&addresses(2), Arc::new(FailingConnector)).unwrap();
        cluster.get_shard("unlisted:1").unwrap();

        let err = cluster.close().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("failed to close 3 shard(s)"), "{}", msg);
        assert!(msg.contains("unlisted:1"));
    }

    #[tokio::test]
    async fn test_close_memory_cluster() {
        let cluster = ShardCluster::new(&addresses(3), Arc::new(MemoryConnector::new("ns"))).unwrap();
        cluster.close().await.unwrap();
    }
}
