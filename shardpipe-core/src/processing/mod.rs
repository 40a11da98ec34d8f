//! Reversible byte transforms applied to every chunk
//!
//! A [`Processor`] turns plaintext into stored bytes on write and back on
//! read. For every valid configuration `read_process(write_process(x)) == x`.
//!
//! Processors that produce output in an internal scratch buffer report
//! so through [`Processor::shared_write_buffer`] and
//! [`Processor::shared_read_buffer`]. The returned [`Bytes`] then pins that
//! scratch allocation, and callers take an owned copy before handing the
//! data to another task.

mod compression;
mod encryption;

pub use compression::{CompressionMode, CompressionType, Compressor};
pub use encryption::{EncryptionType, Encrypter, NONCE_SIZE, TAG_SIZE};

use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;

/// Builds a fresh processor for a single worker
pub type ProcessorConstructor = Arc<dyn Fn() -> Result<Processor> + Send + Sync>;

/// A reversible byte transform
#[derive(Default)]
pub enum Processor {
    /// Identity in both directions
    #[default]
    Nop,
    /// Compression on write, decompression on read
    Compressor(Compressor),
    /// Authenticated encryption on write, decryption on read
    Encrypter(Encrypter),
    /// Applies its members in order on write, in reverse order on read
    Chain(Vec<Processor>),
}

impl Processor {
    /// Compress with the given algorithm and mode
    pub fn compressor(kind: CompressionType, mode: CompressionMode) -> Result<Self> {
        Ok(Processor::Compressor(Compressor::new(kind, mode)?))
    }

    /// Encrypt with the given private key
    pub fn encrypter(kind: EncryptionType, key: &[u8]) -> Result<Self> {
        Ok(Processor::Encrypter(Encrypter::new(kind, key)?))
    }

    /// Chain processors; a single-member chain collapses to that member
    pub fn chain(mut processors: Vec<Processor>) -> Self {
        match processors.len() {
            0 => Processor::Nop,
            1 => processors.remove(0),
            _ => Processor::Chain(processors),
        }
    }

    /// Transform plaintext into the bytes to store
    pub fn write_process(&mut self, data: Bytes) -> Result<Bytes> {
        match self {
            Processor::Nop => Ok(data),
            Processor::Compressor(c) => c.compress(&data),
            Processor::Encrypter(e) => e.encrypt(&data),
            Processor::Chain(processors) => processors
                .iter_mut()
                .try_fold(data, |data, p| p.write_process(data)),
        }
    }

    /// Transform stored bytes back into plaintext
    pub fn read_process(&mut self, data: Bytes) -> Result<Bytes> {
        match self {
            Processor::Nop => Ok(data),
            Processor::Compressor(c) => c.decompress(&data),
            Processor::Encrypter(e) => e.decrypt(&data),
            Processor::Chain(processors) => processors
                .iter_mut()
                .rev()
                .try_fold(data, |data, p| p.read_process(data)),
        }
    }

    /// Whether `write_process` output lives in a reused scratch buffer
    pub fn shared_write_buffer(&self) -> bool {
        match self {
            Processor::Nop => false,
            Processor::Compressor(_) | Processor::Encrypter(_) => true,
            Processor::Chain(processors) => processors
                .last()
                .map(|p| p.shared_write_buffer())
                .unwrap_or(false),
        }
    }

    /// Whether `read_process` output lives in a reused scratch buffer
    pub fn shared_read_buffer(&self) -> bool {
        match self {
            Processor::Nop => false,
            Processor::Compressor(_) | Processor::Encrypter(_) => true,
            Processor::Chain(processors) => processors
                .first()
                .map(|p| p.shared_read_buffer())
                .unwrap_or(false),
        }
    }
}

/// Constructor for the identity processor
pub fn nop_constructor() -> ProcessorConstructor {
    Arc::new(|| Ok(Processor::Nop))
}

/// Constructor following the standard processing policy:
///
/// - compression disabled and no key: identity
/// - compression disabled: encryption only
/// - no key: compression only
/// - otherwise compression, then encryption
pub fn processor_constructor(
    compression: (CompressionType, CompressionMode),
    encryption: (EncryptionType, Vec<u8>),
) -> ProcessorConstructor {
    let (compression_type, compression_mode) = compression;
    let (encryption_type, key) = encryption;
    let compress = compression_mode != CompressionMode::Disabled;
    let encrypt = !key.is_empty();

    match (compress, encrypt) {
        (false, false) => nop_constructor(),
        (false, true) => Arc::new(move || Processor::encrypter(encryption_type, &key)),
        (true, false) => Arc::new(move || Processor::compressor(compression_type, compression_mode)),
        (true, true) => Arc::new(move || {
            Ok(Processor::chain(vec![
                Processor::compressor(compression_type, compression_mode)?,
                Processor::encrypter(encryption_type, &key)?,
            ]))
        }),
    }
}

/// Copy `data` out of a processor's scratch buffer when it is shared.
pub fn detach(data: Bytes, shared: bool) -> Bytes {
    if shared {
        Bytes::copy_from_slice(&data)
    } else {
        data
    }
}
