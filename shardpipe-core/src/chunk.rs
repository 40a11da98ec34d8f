//! Chunk types and metadata
//!
//! A chunk is the unit produced by splitting an input stream. Its metadata
//! record lists the objects that together reconstruct it, and the hash of
//! the plaintext that produced it. The embedder stores these records; the
//! pipeline only creates and consumes them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Locator of a single object stored on a shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Key generated by the shard when the object was created
    pub key: Vec<u8>,

    /// Identifier (address) of the shard holding the object
    pub shard_id: String,
}

impl ObjectRef {
    pub fn new(key: impl Into<Vec<u8>>, shard_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            shard_id: shard_id.into(),
        }
    }
}

/// Placement of one chunk of processed data
///
/// `size` is the length of the processed bytes handed to the chunk storage.
/// The order of `objects` is significant for erasure-coded chunks: position
/// `i` holds the locator of part `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub size: u64,
    pub objects: Vec<ObjectRef>,
}

impl ChunkConfig {
    pub fn new(size: u64, objects: Vec<ObjectRef>) -> Self {
        Self { size, objects }
    }
}

/// Metadata record describing one chunk of an input stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Size of the processed data stored for this chunk
    pub size: u64,

    /// Locators of the objects that reconstruct this chunk
    pub objects: Vec<ObjectRef>,

    /// Digest of the plaintext, before processing
    pub hash: Vec<u8>,
}

impl Chunk {
    /// Combine a storage placement with the plaintext hash.
    pub fn from_config(cfg: ChunkConfig, hash: Vec<u8>) -> Self {
        Self {
            size: cfg.size,
            objects: cfg.objects,
            hash,
        }
    }

    /// Storage placement of this chunk.
    pub fn config(&self) -> ChunkConfig {
        ChunkConfig {
            size: self.size,
            objects: self.objects.clone(),
        }
    }
}

/// Health of stored data, from unrecoverable to fully redundant
///
/// Ordered so that the health of a list is the minimum of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Not enough valid objects to reconstruct the data
    Invalid,
    /// Readable, but not every object is available
    Valid,
    /// Every object is available
    Optimal,
}

impl CheckStatus {
    /// Combine the status of two parts of the same stream.
    pub fn combine(self, other: CheckStatus) -> CheckStatus {
        self.min(other)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Invalid => "invalid",
            CheckStatus::Valid => "valid",
            CheckStatus::Optimal => "optimal",
        };
        f.write_str(s)
    }
}
