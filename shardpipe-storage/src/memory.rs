//! In-memory shard
//!
//! Used for testing and development. Not persistent. Supports a capacity
//! limit, corruption injection and taking the shard offline, so that
//! degraded clusters can be exercised without any network.

use crate::client::{AsyncClient, Client, ClientSync, Namespace, Object, ObjectStatus};
use crate::cluster::ShardConnector;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use shardpipe_core::error::{Result, ShardPipeError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct StoredObject {
    data: Bytes,
    corrupted: bool,
}

/// In-memory shard client
pub struct MemoryClient {
    /// Namespace label
    namespace: String,

    /// Object storage
    objects: RwLock<HashMap<Vec<u8>, StoredObject>>,

    /// Maximum capacity (0 = unlimited)
    max_capacity: u64,

    /// Current bytes used
    bytes_used: AtomicU64,

    /// When set, every call fails with a transport error
    offline: AtomicBool,

    /// Operation counters
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryClient {
    /// Create a new in-memory shard
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_capacity(namespace, 0)
    }

    /// Create with a maximum capacity
    pub fn with_capacity(namespace: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            namespace: namespace.into(),
            objects: RwLock::new(HashMap::new()),
            max_capacity: max_bytes,
            bytes_used: AtomicU64::new(0),
            offline: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Mark a stored object as corrupted. Returns false if it does not exist.
    pub fn corrupt(&self, key: &[u8]) -> bool {
        match self.objects.write().get_mut(key) {
            Some(obj) => {
                obj.corrupted = true;
                true
            }
            None => false,
        }
    }

    /// Take the shard offline (or bring it back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Clear all stored objects
    pub fn clear(&self) {
        let mut objects = self.objects.write();
        objects.clear();
        self.bytes_used.store(0, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ShardPipeError::Transport("shard is offline".to_string()));
        }
        Ok(())
    }
}

impl ClientSync for MemoryClient {
    fn create_object(&self, data: Bytes) -> Result<Vec<u8>> {
        self.check_online()?;
        let data_len = data.len() as u64;

        let mut objects = self.objects.write();

        // Check capacity
        if self.max_capacity > 0 {
            let current = self.bytes_used.load(Ordering::SeqCst);
            if current + data_len > self.max_capacity {
                return Err(ShardPipeError::NamespaceFull {
                    used: current,
                    capacity: self.max_capacity,
                });
            }
        }

        let key = uuid::Uuid::new_v4().as_bytes().to_vec();
        objects.insert(
            key.clone(),
            StoredObject {
                data,
                corrupted: false,
            },
        );
        self.bytes_used.fetch_add(data_len, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::Relaxed);

        Ok(key)
    }

    fn get_object(&self, key: &[u8]) -> Result<Object> {
        self.check_online()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.read();
        match objects.get(key) {
            Some(obj) if obj.corrupted => Err(ShardPipeError::ObjectCorrupted),
            Some(obj) => Ok(Object {
                key: key.to_vec(),
                data: obj.data.clone(),
            }),
            None => Err(ShardPipeError::KeyNotFound),
        }
    }

    fn delete_object(&self, key: &[u8]) -> Result<()> {
        self.check_online()?;
        let mut objects = self.objects.write();
        if let Some(old) = objects.remove(key) {
            self.bytes_used
                .fetch_sub(old.data.len() as u64, Ordering::SeqCst);
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn get_object_status(&self, key: &[u8]) -> Result<ObjectStatus> {
        self.check_online()?;
        let objects = self.objects.read();
        Ok(match objects.get(key) {
            Some(obj) if obj.corrupted => ObjectStatus::Corrupted,
            Some(_) => ObjectStatus::Ok,
            None => ObjectStatus::Missing,
        })
    }

    fn exist_object(&self, key: &[u8]) -> Result<bool> {
        self.check_online()?;
        let objects = self.objects.read();
        match objects.get(key) {
            Some(obj) if obj.corrupted => Err(ShardPipeError::ObjectCorrupted),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn get_namespace(&self) -> Result<Namespace> {
        self.check_online()?;
        let objects = self.objects.read();
        Ok(Namespace {
            label: self.namespace.clone(),
            object_count: objects.len() as u64,
            bytes_used: self.bytes_used.load(Ordering::SeqCst),
            capacity: (self.max_capacity > 0).then_some(self.max_capacity),
        })
    }

    fn close(&self) -> Result<()> {
        // No-op for in-memory storage
        Ok(())
    }
}

/// Connector handing out in-memory shards by address
///
/// The same address always maps to the same shard, so data survives
/// across clusters built from one connector.
pub struct MemoryConnector {
    namespace: String,
    capacity: u64,
    shards: Mutex<HashMap<String, Arc<MemoryClient>>>,
}

impl MemoryConnector {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_capacity(namespace, 0)
    }

    /// Every shard created by this connector gets the given capacity
    pub fn with_capacity(namespace: impl Into<String>, capacity: u64) -> Self {
        Self {
            namespace: namespace.into(),
            capacity,
            shards: Mutex::new(HashMap::new()),
        }
    }

    /// The in-memory shard behind an address, creating it if needed
    pub fn shard(&self, address: &str) -> Arc<MemoryClient> {
        let mut shards = self.shards.lock();
        Arc::clone(shards.entry(address.to_string()).or_insert_with(|| {
            Arc::new(MemoryClient::with_capacity(
                self.namespace.clone(),
                self.capacity,
            ))
        }))
    }

    /// Insert a pre-built shard under an address
    pub fn insert(&self, address: impl Into<String>, client: Arc<MemoryClient>) {
        self.shards.lock().insert(address.into(), client);
    }
}

impl ShardConnector for MemoryConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn Client>> {
        Ok(Arc::new(AsyncClient::new(self.shard(address))))
    }
}
