//! ShardPipe Core Library
//!
//! Building blocks for the ShardPipe data pipeline.
//! This crate provides:
//! - Chunk metadata records and check status tiers
//! - Keyed and unkeyed hashers (Blake2b, SHA-2) behind a named registry
//! - Reversible processors (compression, AES-GCM encryption, chains)
//! - Reed-Solomon erasure coding with stripe padding
//! - The error group and shared work queue used by every fan-out
//! - Common error handling

pub mod chunk;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod group;
pub mod processing;

pub use chunk::{CheckStatus, Chunk, ChunkConfig, ObjectRef};
pub use crypto::{hasher_constructor, new_hasher, HashType, Hasher, HasherConstructor};
pub use erasure::{ErasureConfig, ErasureEncoder};
pub use error::{Result, ShardPipeError};
pub use group::{send_or_cancel, shared_channel, spawn_feeder, ErrorGroup, SharedReceiver};
pub use processing::{
    processor_constructor, CompressionMode, CompressionType, EncryptionType, Processor,
    ProcessorConstructor,
};

/// Every data part produced by the erasure codec is a multiple of this many bytes.
/// Changing it breaks compatibility with chunks already stored.
pub const STRIPE_UNIT: usize = 256;

/// Default number of parallel jobs: twice the available hardware parallelism.
pub fn default_job_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}
