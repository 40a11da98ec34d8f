//! Pipeline that splits and hashes but stores nothing
//!
//! Useful for measuring the cost of reading and hashing a stream apart
//! from any shard I/O.

use super::{read_full, Pipeline};
use async_trait::async_trait;
use shardpipe_core::chunk::{CheckStatus, Chunk};
use shardpipe_core::crypto::HasherConstructor;
use shardpipe_core::error::{Result, ShardPipeError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

pub struct DevNullPipeline {
    chunk_size: usize,
    hasher: HasherConstructor,
}

impl DevNullPipeline {
    /// `chunk_size` 0 hashes the whole stream as one chunk
    pub fn new(chunk_size: usize, hasher: HasherConstructor) -> Self {
        Self { chunk_size, hasher }
    }
}

#[async_trait]
impl Pipeline for DevNullPipeline {
    async fn write(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<Vec<Chunk>> {
        let mut hasher = (self.hasher)()?;

        if self.chunk_size == 0 {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            return Ok(vec![Chunk {
                size: buf.len() as u64,
                objects: Vec::new(),
                hash: hasher.hash(&buf),
            }]);
        }

        let mut chunks = Vec::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let filled = read_full(&mut *reader, &mut buf).await?;
            if filled == 0 {
                break;
            }
            chunks.push(Chunk {
                size: filled as u64,
                objects: Vec::new(),
                hash: hasher.hash(&buf[..filled]),
            });
            if filled < self.chunk_size {
                break;
            }
        }
        Ok(chunks)
    }

    async fn read(&self, _chunks: &[Chunk], _writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()> {
        Err(ShardPipeError::NotSupported("read from dev-null pipeline"))
    }

    async fn check(&self, _chunks: &[Chunk], _fast: bool) -> Result<CheckStatus> {
        Err(ShardPipeError::NotSupported("check on dev-null pipeline"))
    }

    async fn repair(&self, _chunks: &[Chunk]) -> Result<Vec<Chunk>> {
        Err(ShardPipeError::NotSupported("repair on dev-null pipeline"))
    }

    async fn delete(&self, _chunks: &[Chunk]) -> Result<()> {
        Err(ShardPipeError::NotSupported("delete on dev-null pipeline"))
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardpipe_core::crypto::{hasher_constructor, sum_256};

    #[tokio::test]
    async fn test_write_hashes_chunks() {
        let pipeline = DevNullPipeline::new(2, hasher_constructor("", ""));
        let chunks = pipeline.write(&mut &b"abcde"[..]).await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].hash, sum_256(b"ab"));
        assert_eq!(chunks[2].hash, sum_256(b"e"));
        assert_eq!(chunks[2].size, 1);
        assert!(chunks.iter().all(|c| c.objects.is_empty()));
    }

    #[tokio::test]
    async fn test_whole_stream() {
        let pipeline = DevNullPipeline::new(0, hasher_constructor("sha_256", ""));
        let chunks = pipeline.write(&mut &b"abcde"[..]).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].size, 5);
        assert_eq!(chunks[0].hash.len(), 32);
    }

    #[tokio::test]
    async fn test_other_operations_unsupported() {
        let pipeline = DevNullPipeline::new(4, hasher_constructor("", ""));
        let mut out = Vec::new();
        assert!(matches!(
            pipeline.read(&[], &mut out).await,
            Err(ShardPipeError::NotSupported(_))
        ));
        assert!(matches!(
            pipeline.check(&[], true).await,
            Err(ShardPipeError::NotSupported(_))
        ));
        assert!(pipeline.repair(&[]).await.is_err());
        assert!(pipeline.delete(&[]).await.is_err());
        pipeline.close().await.unwrap();
    }
}
