//! Pipelines: turn a byte stream into a chunk list and back
//!
//! - [`SingleObjectPipeline`]: the whole stream as one chunk, serially
//! - [`AsyncSplitterPipeline`]: fixed-size chunks through parallel
//!   processing and storage stages, reassembled in order on read
//! - [`DevNullPipeline`]: splits and hashes without storing anything

mod async_splitter;
mod dev_null;
mod single_object;

pub use async_splitter::AsyncSplitterPipeline;
pub use dev_null::DevNullPipeline;
pub use single_object::SingleObjectPipeline;

use async_trait::async_trait;
use shardpipe_core::chunk::{CheckStatus, Chunk};
use shardpipe_core::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Stores, retrieves, checks, repairs and deletes whole streams
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Store everything `reader` yields, returning the chunk list in stream order
    async fn write(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<Vec<Chunk>>;

    /// Write the plaintext described by `chunks` to `writer`, in order
    async fn read(&self, chunks: &[Chunk], writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()>;

    /// Worst health of any chunk in the list
    async fn check(&self, chunks: &[Chunk], fast: bool) -> Result<CheckStatus>;

    /// Restore redundancy, returning the updated list with hashes preserved
    async fn repair(&self, chunks: &[Chunk]) -> Result<Vec<Chunk>>;

    /// Delete every object of every chunk
    async fn delete(&self, chunks: &[Chunk]) -> Result<()>;

    /// Split size; 0 when the stream is stored as a single chunk
    fn chunk_size(&self) -> usize;

    /// Release the underlying storage
    async fn close(&self) -> Result<()>;
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes read; less than `buf.len()` means the
/// stream ended.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that hands out at most one byte per call
    struct Trickle(Cursor<Vec<u8>>);

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let mut byte = [0u8; 1];
            let mut one = ReadBuf::new(&mut byte);
            match Pin::new(&mut self.0).poll_read(cx, &mut one) {
                Poll::Ready(Ok(())) => {
                    buf.put_slice(one.filled());
                    Poll::Ready(Ok(()))
                }
                other => other,
            }
        }
    }

    #[tokio::test]
    async fn test_read_full_accumulates_short_reads() {
        let mut reader = Trickle(Cursor::new(b"abcdefg".to_vec()));
        let mut buf = [0u8; 3];

        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'g');
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 0);
    }
}
