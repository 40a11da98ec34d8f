//! Chunked pipeline with parallel processing and storage stages
//!
//! Write path:
//!
//! ```text
//! reader -> splitter -> [P processor workers] -> [S storage workers] -> collector
//! ```
//!
//! Read path is the dual: a feeder hands chunks to `S` storage workers,
//! `P` processor workers reverse the processing and verify hashes, and an
//! output stage writes plaintext strictly in chunk order.
//!
//! Every stage shares one cancellation token; the first error anywhere
//! stops the rest.

use super::{read_full, Pipeline, SingleObjectPipeline};
use crate::storage::ChunkStorage;
use async_trait::async_trait;
use bytes::Bytes;
use shardpipe_core::chunk::{CheckStatus, Chunk};
use shardpipe_core::crypto::HasherConstructor;
use shardpipe_core::error::{Result, ShardPipeError};
use shardpipe_core::group::{send_or_cancel, shared_channel, spawn_feeder, ErrorGroup};
use shardpipe_core::processing::{detach, ProcessorConstructor};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Plaintext chunk cut from the input stream
struct SourceChunk {
    index: usize,
    data: Bytes,
}

/// Processed chunk on its way to storage
struct ProcessedChunk {
    index: usize,
    hash: Vec<u8>,
    data: Bytes,
}

/// Pipeline splitting streams into fixed-size chunks
pub struct AsyncSplitterPipeline {
    chunk_size: usize,
    processor_jobs: usize,
    storage_jobs: usize,
    hasher: HasherConstructor,
    processor: ProcessorConstructor,
    storage: Arc<dyn ChunkStorage>,
    single: SingleObjectPipeline,
}

impl AsyncSplitterPipeline {
    /// Create a pipeline with `job_count` processor workers and twice as
    /// many storage workers
    pub fn new(
        storage: Arc<dyn ChunkStorage>,
        chunk_size: usize,
        hasher: HasherConstructor,
        processor: ProcessorConstructor,
        job_count: usize,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ShardPipeError::InvalidArgument(
                "chunk size must be positive".to_string(),
            ));
        }
        let processor_jobs = job_count.max(1);
        Ok(Self {
            chunk_size,
            processor_jobs,
            storage_jobs: processor_jobs * 2,
            single: SingleObjectPipeline::new(
                Arc::clone(&storage),
                Arc::clone(&hasher),
                Arc::clone(&processor),
            ),
            hasher,
            processor,
            storage,
        })
    }

    /// Processor and storage worker counts
    pub fn job_counts(&self) -> (usize, usize) {
        (self.processor_jobs, self.storage_jobs)
    }

    /// Cut the stream into chunks and publish them in order.
    ///
    /// Returns early, without error, once `token` is cancelled or nobody
    /// is left to receive.
    async fn split(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        tx: mpsc::Sender<SourceChunk>,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut index = 0;
        loop {
            let filled = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                filled = read_full(&mut *reader, &mut buf) => filled?,
            };
            if filled == 0 {
                break;
            }

            let chunk = SourceChunk {
                index,
                data: Bytes::copy_from_slice(&buf[..filled]),
            };
            if !send_or_cancel(&tx, chunk, token).await {
                return Ok(());
            }
            index += 1;

            if filled < self.chunk_size {
                break;
            }
        }
        trace!(chunks = index, "splitter finished");
        Ok(())
    }

    /// Run `op` on every chunk with the storage job count.
    ///
    /// Results come back tagged with the chunk position, in completion order.
    async fn for_each_chunk<T, F, Fut>(&self, chunks: &[Chunk], op: F) -> Result<Vec<(usize, T)>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn ChunkStorage>, Chunk) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut group = ErrorGroup::new();
        let token = group.token();
        let jobs = self.storage_jobs.clamp(1, chunks.len().max(1));
        let queue = spawn_feeder(
            chunks.iter().cloned().enumerate().collect(),
            jobs,
            token.clone(),
        );
        let (tx, mut rx) = mpsc::channel(chunks.len().max(1));

        for _ in 0..jobs {
            let storage = Arc::clone(&self.storage);
            let queue = queue.clone();
            let token = token.clone();
            let tx = tx.clone();
            let op = op.clone();
            group.spawn(async move {
                while let Some((index, chunk)) = queue.recv_or_cancel(&token).await {
                    let result = op(Arc::clone(&storage), chunk).await?;
                    if !send_or_cancel(&tx, (index, result), &token).await {
                        break;
                    }
                }
                Ok(())
            });
        }
        drop(tx);

        group.wait().await?;

        let mut results = Vec::with_capacity(chunks.len());
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        Ok(results)
    }
}

/// Write plaintext chunks strictly in index order, returning how many
/// were written.
async fn write_in_order(
    writer: &mut (dyn AsyncWrite + Unpin + Send),
    rx: &mut mpsc::Receiver<(usize, Bytes)>,
) -> Result<usize> {
    // out-of-order arrivals wait here until their turn
    let mut pending: HashMap<usize, Bytes> = HashMap::new();
    let mut next = 0;
    while let Some((index, plain)) = rx.recv().await {
        pending.insert(index, plain);
        while let Some(plain) = pending.remove(&next) {
            writer.write_all(&plain).await?;
            next += 1;
        }
    }
    writer.flush().await?;
    Ok(next)
}

fn no_chunks(action: &str) -> ShardPipeError {
    ShardPipeError::InvalidArgument(format!("no chunks given to {}", action))
}

/// Index-addressed chunk list that grows as chunks arrive
#[derive(Default)]
struct ChunkCollector {
    slots: Vec<Option<Chunk>>,
    len: usize,
}

impl ChunkCollector {
    fn insert(&mut self, index: usize, chunk: Chunk) {
        if index >= self.slots.len() {
            let grown = (self.slots.len() * 2).max(index + 1);
            self.slots.resize_with(grown, || None);
        }
        self.slots[index] = Some(chunk);
        self.len = self.len.max(index + 1);
    }

    fn finish(mut self) -> Result<Vec<Chunk>> {
        self.slots.truncate(self.len);
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| ShardPipeError::Internal(format!("chunk #{} was never stored", index)))
            })
            .collect()
    }
}

#[async_trait]
impl Pipeline for AsyncSplitterPipeline {
    async fn write(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<Vec<Chunk>> {
        let mut group = ErrorGroup::new();
        let token = group.token();

        let (input_tx, input_rx) = shared_channel::<SourceChunk>(self.processor_jobs);
        let (data_tx, data_rx) = shared_channel::<ProcessedChunk>(self.storage_jobs);
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<(usize, Chunk)>(self.storage_jobs);

        for _ in 0..self.processor_jobs {
            let input_rx = input_rx.clone();
            let data_tx = data_tx.clone();
            let token = token.clone();
            let new_hasher = Arc::clone(&self.hasher);
            let new_processor = Arc::clone(&self.processor);
            group.spawn(async move {
                let mut hasher = new_hasher()?;
                let mut processor = new_processor()?;
                let shared = processor.shared_write_buffer();
                while let Some(SourceChunk { index, data }) = input_rx.recv_or_cancel(&token).await {
                    let hash = hasher.hash(&data);
                    let data = detach(processor.write_process(data)?, shared);
                    let processed = ProcessedChunk { index, hash, data };
                    if !send_or_cancel(&data_tx, processed, &token).await {
                        break;
                    }
                }
                Ok(())
            });
        }
        drop(input_rx);
        drop(data_tx);

        for _ in 0..self.storage_jobs {
            let data_rx = data_rx.clone();
            let chunk_tx = chunk_tx.clone();
            let token = token.clone();
            let storage = Arc::clone(&self.storage);
            group.spawn(async move {
                while let Some(ProcessedChunk { index, hash, data }) = data_rx.recv_or_cancel(&token).await {
                    let cfg = storage.write_chunk(data).await?;
                    if !send_or_cancel(&chunk_tx, (index, Chunk::from_config(cfg, hash)), &token).await {
                        break;
                    }
                }
                Ok(())
            });
        }
        drop(data_rx);
        drop(chunk_tx);

        let splitter = async {
            let result = self.split(reader, input_tx, &token).await;
            if result.is_err() {
                token.cancel();
            }
            result
        };
        let collector = async {
            let mut collector = ChunkCollector::default();
            while let Some((index, chunk)) = chunk_rx.recv().await {
                collector.insert(index, chunk);
            }
            collector
        };

        let (split_result, collector) = tokio::join!(splitter, collector);
        let group_result = group.wait().await;
        split_result?;
        group_result?;

        let chunks = collector.finish()?;
        debug!(chunks = chunks.len(), chunk_size = self.chunk_size, "stream written");
        Ok(chunks)
    }

    async fn read(&self, chunks: &[Chunk], writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()> {
        match chunks.len() {
            // an empty stream writes no chunks and reads back as nothing
            0 => return Ok(()),
            1 => return self.single.read(chunks, writer).await,
            _ => {}
        }

        let total = chunks.len();
        let storage_jobs = self.storage_jobs.min(total);
        let processor_jobs = self.processor_jobs.min(total);

        let mut group = ErrorGroup::new();
        let token = group.token();

        let queue = spawn_feeder(
            chunks.iter().cloned().enumerate().collect(),
            storage_jobs,
            token.clone(),
        );
        let (raw_tx, raw_rx) = shared_channel::<ProcessedChunk>(processor_jobs);
        let (plain_tx, mut plain_rx) = mpsc::channel::<(usize, Bytes)>(processor_jobs);

        for _ in 0..storage_jobs {
            let queue = queue.clone();
            let raw_tx = raw_tx.clone();
            let token = token.clone();
            let storage = Arc::clone(&self.storage);
            group.spawn(async move {
                while let Some((index, chunk)) = queue.recv_or_cancel(&token).await {
                    let data = storage.read_chunk(&chunk.config()).await?;
                    let raw = ProcessedChunk {
                        index,
                        hash: chunk.hash,
                        data,
                    };
                    if !send_or_cancel(&raw_tx, raw, &token).await {
                        break;
                    }
                }
                Ok(())
            });
        }
        drop(queue);
        drop(raw_tx);

        for _ in 0..processor_jobs {
            let raw_rx = raw_rx.clone();
            let plain_tx = plain_tx.clone();
            let token = token.clone();
            let new_hasher = Arc::clone(&self.hasher);
            let new_processor = Arc::clone(&self.processor);
            group.spawn(async move {
                let mut hasher = new_hasher()?;
                let mut processor = new_processor()?;
                let shared = processor.shared_read_buffer();
                while let Some(ProcessedChunk { index, hash, data }) = raw_rx.recv_or_cancel(&token).await {
                    let plain = detach(processor.read_process(data)?, shared);
                    if hasher.hash(&plain) != hash {
                        return Err(ShardPipeError::HashMismatch { index });
                    }
                    if !send_or_cancel(&plain_tx, (index, plain), &token).await {
                        break;
                    }
                }
                Ok(())
            });
        }
        drop(raw_rx);
        drop(plain_tx);

        let output = write_in_order(writer, &mut plain_rx).await;
        if output.is_err() {
            token.cancel();
        }
        drop(plain_rx);

        let group_result = group.wait().await;
        let written = output?;
        group_result?;

        if written != total {
            return Err(ShardPipeError::Internal(format!(
                "wrote {} of {} chunks",
                written, total
            )));
        }
        Ok(())
    }

    async fn check(&self, chunks: &[Chunk], fast: bool) -> Result<CheckStatus> {
        match chunks.len() {
            0 => return Err(no_chunks("check")),
            1 => return self.single.check(chunks, fast).await,
            _ => {}
        }

        let statuses = self
            .for_each_chunk(chunks, move |storage, chunk| async move {
                storage.check_chunk(&chunk.config(), fast).await
            })
            .await?;

        Ok(statuses
            .into_iter()
            .fold(CheckStatus::Optimal, |acc, (_, status)| acc.combine(status)))
    }

    async fn repair(&self, chunks: &[Chunk]) -> Result<Vec<Chunk>> {
        match chunks.len() {
            0 => return Err(no_chunks("repair")),
            1 => return self.single.repair(chunks).await,
            _ => {}
        }

        let repaired = self
            .for_each_chunk(chunks, |storage, chunk| async move {
                let cfg = storage.repair_chunk(&chunk.config()).await?;
                Ok::<_, ShardPipeError>(Chunk::from_config(cfg, chunk.hash))
            })
            .await?;

        let mut collector = ChunkCollector::default();
        for (index, chunk) in repaired {
            collector.insert(index, chunk);
        }
        collector.finish()
    }

    async fn delete(&self, chunks: &[Chunk]) -> Result<()> {
        match chunks.len() {
            0 => return Err(no_chunks("delete")),
            1 => return self.single.delete(chunks).await,
            _ => {}
        }

        self.for_each_chunk(chunks, |storage, chunk| async move {
            storage.delete_chunk(&chunk.config()).await
        })
        .await?;
        Ok(())
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}
