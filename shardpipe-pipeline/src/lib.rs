//! ShardPipe Pipeline
//!
//! Turns byte streams into chunk lists stored on a shard cluster:
//! - Chunk storages: random, replicated and erasure-coded placement
//! - Pipelines: single object, async splitter and dev-null
//! - Configuration and a factory building a pipeline from it

pub mod config;
pub mod factory;
pub mod pipeline;
pub mod storage;

pub use config::{
    CompressionConfig, ConfigError, DistributionConfig, EncryptionConfig, HashingConfig, PipelineConfig,
    Placement,
};
pub use factory::{new_chunk_storage, new_cluster, new_hasher_constructor, new_pipeline, new_processor_constructor};
pub use pipeline::{AsyncSplitterPipeline, DevNullPipeline, Pipeline, SingleObjectPipeline};
pub use storage::{
    ChunkStorage, DistributedChunkStorage, RandomChunkStorage, RepairError, ReplicatedChunkStorage,
};
