//! Serial pipeline storing a whole stream as one chunk

use super::Pipeline;
use crate::storage::ChunkStorage;
use async_trait::async_trait;
use bytes::Bytes;
use shardpipe_core::chunk::{CheckStatus, Chunk};
use shardpipe_core::crypto::HasherConstructor;
use shardpipe_core::error::{Result, ShardPipeError};
use shardpipe_core::processing::ProcessorConstructor;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Pipeline that never splits its input
pub struct SingleObjectPipeline {
    hasher: HasherConstructor,
    processor: ProcessorConstructor,
    storage: Arc<dyn ChunkStorage>,
}

impl SingleObjectPipeline {
    pub fn new(
        storage: Arc<dyn ChunkStorage>,
        hasher: HasherConstructor,
        processor: ProcessorConstructor,
    ) -> Self {
        Self {
            hasher,
            processor,
            storage,
        }
    }

    /// Hash, process and store one chunk of plaintext
    pub(crate) async fn write_bytes(&self, plain: Bytes) -> Result<Chunk> {
        let (hash, data) = {
            let mut hasher = (self.hasher)()?;
            let mut processor = (self.processor)()?;
            (hasher.hash(&plain), processor.write_process(plain)?)
        };
        let cfg = self.storage.write_chunk(data).await?;
        Ok(Chunk::from_config(cfg, hash))
    }

    /// Fetch, reverse the processing of and verify one chunk
    pub(crate) async fn read_chunk(&self, chunk: &Chunk, index: usize) -> Result<Bytes> {
        let data = self.storage.read_chunk(&chunk.config()).await?;
        let mut hasher = (self.hasher)()?;
        let mut processor = (self.processor)()?;
        let plain = processor.read_process(data)?;
        if hasher.hash(&plain) != chunk.hash {
            return Err(ShardPipeError::HashMismatch { index });
        }
        Ok(plain)
    }
}

fn single_chunk(chunks: &[Chunk]) -> Result<&Chunk> {
    match chunks {
        [chunk] => Ok(chunk),
        _ => Err(ShardPipeError::InvalidArgument(format!(
            "single object pipeline expects exactly one chunk, got {}",
            chunks.len()
        ))),
    }
}

#[async_trait]
impl Pipeline for SingleObjectPipeline {
    async fn write(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<Vec<Chunk>> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        debug!(size = buf.len(), "writing single object");
        Ok(vec![self.write_bytes(Bytes::from(buf)).await?])
    }

    async fn read(&self, chunks: &[Chunk], writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()> {
        let chunk = single_chunk(chunks)?;
        let plain = self.read_chunk(chunk, 0).await?;
        writer.write_all(&plain).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn check(&self, chunks: &[Chunk], fast: bool) -> Result<CheckStatus> {
        let chunk = single_chunk(chunks)?;
        self.storage.check_chunk(&chunk.config(), fast).await
    }

    async fn repair(&self, chunks: &[Chunk]) -> Result<Vec<Chunk>> {
        let chunk = single_chunk(chunks)?;
        let cfg = self.storage.repair_chunk(&chunk.config()).await?;
        Ok(vec![Chunk::from_config(cfg, chunk.hash.clone())])
    }

    async fn delete(&self, chunks: &[Chunk]) -> Result<()> {
        let chunk = single_chunk(chunks)?;
        self.storage.delete_chunk(&chunk.config()).await
    }

    fn chunk_size(&self) -> usize {
        0
    }

    async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}
