//! Shard client contract
//!
//! Defines the interface every shard (remote object store) must offer.
//! Keys are generated by the shard when an object is created and are
//! opaque to the pipeline.

use bytes::Bytes;
use shardpipe_core::error::Result;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`Client`] operations
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Status of an object stored on a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectStatus {
    Ok,
    Missing,
    Corrupted,
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectStatus::Ok => "ok",
            ObjectStatus::Missing => "missing",
            ObjectStatus::Corrupted => "corrupted",
        };
        f.write_str(s)
    }
}

/// Object as returned by a shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub key: Vec<u8>,
    pub data: Bytes,
}

/// Namespace information reported by a shard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    /// Namespace label
    pub label: String,

    /// Number of objects stored
    pub object_count: u64,

    /// Bytes used by stored objects
    pub bytes_used: u64,

    /// Capacity in bytes, `None` when unlimited
    pub capacity: Option<u64>,
}

impl Namespace {
    /// Available space in bytes
    pub fn bytes_available(&self) -> u64 {
        match self.capacity {
            Some(capacity) => capacity.saturating_sub(self.bytes_used),
            None => u64::MAX,
        }
    }
}

/// Async shard client
///
/// Implementations must be safe for concurrent calls.
pub trait Client: Send + Sync {
    /// Store an object, returning the key generated for it
    fn create_object<'a>(&'a self, data: Bytes) -> ClientFuture<'a, Vec<u8>>;

    /// Fetch an object by key
    fn get_object<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, Object>;

    /// Delete an object; deleting an absent object is not an error
    fn delete_object<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, ()>;

    /// Report the status of an object
    fn get_object_status<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, ObjectStatus>;

    /// Check whether an object exists
    fn exist_object<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, bool>;

    /// Fetch namespace information
    fn get_namespace<'a>(&'a self) -> ClientFuture<'a, Namespace>;

    /// Release any resources held by the client
    fn close<'a>(&'a self) -> ClientFuture<'a, ()>;
}

/// Synchronous shard client (for simpler, in-process implementations)
pub trait ClientSync: Send + Sync {
    fn create_object(&self, data: Bytes) -> Result<Vec<u8>>;

    fn get_object(&self, key: &[u8]) -> Result<Object>;

    fn delete_object(&self, key: &[u8]) -> Result<()>;

    fn get_object_status(&self, key: &[u8]) -> Result<ObjectStatus>;

    fn exist_object(&self, key: &[u8]) -> Result<bool>;

    fn get_namespace(&self) -> Result<Namespace>;

    fn close(&self) -> Result<()>;
}

/// Wrapper to expose a sync client through the async contract
pub struct AsyncClient<T: ClientSync>(pub Arc<T>);

impl<T: ClientSync> AsyncClient<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self(inner)
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.0
    }
}

impl<T: ClientSync + 'static> Client for AsyncClient<T> {
    fn create_object<'a>(&'a self, data: Bytes) -> ClientFuture<'a, Vec<u8>> {
        Box::pin(async move { self.0.create_object(data) })
    }

    fn get_object<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, Object> {
        Box::pin(async move { self.0.get_object(key) })
    }

    fn delete_object<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, ()> {
        Box::pin(async move { self.0.delete_object(key) })
    }

    fn get_object_status<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, ObjectStatus> {
        Box::pin(async move { self.0.get_object_status(key) })
    }

    fn exist_object<'a>(&'a self, key: &'a [u8]) -> ClientFuture<'a, bool> {
        Box::pin(async move { self.0.exist_object(key) })
    }

    fn get_namespace<'a>(&'a self) -> ClientFuture<'a, Namespace> {
        Box::pin(async move { self.0.get_namespace() })
    }

    fn close<'a>(&'a self) -> ClientFuture<'a, ()> {
        Box::pin(async move { self.0.close() })
    }
}

/// A client together with the stable identifier (address) of its shard
///
/// Cheap to clone; clones share the underlying client.
#[derive(Clone)]
pub struct Shard {
    identifier: Arc<str>,
    client: Arc<dyn Client>,
}

impl Shard {
    pub fn new(identifier: impl Into<Arc<str>>, client: Arc<dyn Client>) -> Self {
        Self {
            identifier: identifier.into(),
            client,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Deref for Shard {
    type Target = dyn Client;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shard({})", self.identifier)
    }
}

impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Shard {}
