//! Compression processors: Snappy, LZ4 and GZip

use crate::error::{Result, ShardPipeError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use tracing::warn;

/// How hard to compress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionMode {
    #[default]
    Disabled,
    Default,
    BestSpeed,
    BestCompression,
}

impl CompressionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::Disabled => "disabled",
            CompressionMode::Default => "default",
            CompressionMode::BestSpeed => "best_speed",
            CompressionMode::BestCompression => "best_compression",
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMode {
    type Err = ShardPipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "disabled" | "none" => Ok(CompressionMode::Disabled),
            "default" => Ok(CompressionMode::Default),
            "best_speed" => Ok(CompressionMode::BestSpeed),
            "best_compression" => Ok(CompressionMode::BestCompression),
            _ => Err(ShardPipeError::Configuration(format!(
                "unknown compression mode: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for CompressionMode {
    type Error = ShardPipeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CompressionMode> for String {
    fn from(mode: CompressionMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Compression algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionType {
    #[default]
    Snappy,
    Lz4,
    Gzip,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::Snappy => "snappy",
            CompressionType::Lz4 => "lz4",
            CompressionType::Gzip => "gzip",
        }
    }

    /// Resolve `mode` to one this algorithm supports.
    ///
    /// Snappy and LZ4 have no tunable levels and only support the default mode.
    fn effective_mode(&self, mode: CompressionMode) -> CompressionMode {
        match self {
            CompressionType::Gzip => mode,
            CompressionType::Snappy | CompressionType::Lz4 => {
                if mode != CompressionMode::Default {
                    warn!(
                        algorithm = %self,
                        requested = %mode,
                        "compression mode not supported, using default"
                    );
                }
                CompressionMode::Default
            }
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = ShardPipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "snappy" => Ok(CompressionType::Snappy),
            "lz4" => Ok(CompressionType::Lz4),
            "gzip" | "gz" => Ok(CompressionType::Gzip),
            _ => Err(ShardPipeError::Configuration(format!(
                "unknown compression type: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for CompressionType {
    type Error = ShardPipeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CompressionType> for String {
    fn from(kind: CompressionType) -> Self {
        kind.as_str().to_string()
    }
}

/// Compressor-decompressor with reusable scratch buffers
pub struct Compressor {
    kind: CompressionType,
    mode: CompressionMode,
    write_buf: BytesMut,
    read_buf: BytesMut,
}

impl Compressor {
    pub fn new(kind: CompressionType, mode: CompressionMode) -> Result<Self> {
        if mode == CompressionMode::Disabled {
            return Err(ShardPipeError::Configuration(
                "cannot create a compressor with compression disabled".to_string(),
            ));
        }
        Ok(Self {
            kind,
            mode: kind.effective_mode(mode),
            write_buf: BytesMut::new(),
            read_buf: BytesMut::new(),
        })
    }

    pub fn kind(&self) -> CompressionType {
        self.kind
    }

    /// Mode in use, after falling back for algorithms without levels
    pub fn mode(&self) -> CompressionMode {
        self.mode
    }

    pub fn compress(&mut self, data: &[u8]) -> Result<Bytes> {
        self.write_buf.clear();
        let out = (&mut self.write_buf).writer();
        match self.kind {
            CompressionType::Snappy => {
                let mut encoder = snap::write::FrameEncoder::new(out);
                encoder.write_all(data)?;
                encoder
                    .into_inner()
                    .map_err(|e| ShardPipeError::Processing(format!("snappy: {}", e.error())))?;
            }
            CompressionType::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(out);
                encoder.write_all(data)?;
                encoder
                    .finish()
                    .map_err(|e| ShardPipeError::Processing(format!("lz4: {}", e)))?;
            }
            CompressionType::Gzip => {
                let level = match self.mode {
                    CompressionMode::BestSpeed => flate2::Compression::fast(),
                    CompressionMode::BestCompression => flate2::Compression::best(),
                    _ => flate2::Compression::default(),
                };
                let mut encoder = flate2::write::GzEncoder::new(out, level);
                encoder.write_all(data)?;
                encoder.finish()?;
            }
        }
        Ok(self.write_buf.split().freeze())
    }

    pub fn decompress(&mut self, data: &[u8]) -> Result<Bytes> {
        self.read_buf.clear();
        let mut out = (&mut self.read_buf).writer();
        let copied = match self.kind {
            CompressionType::Snappy => copy_all(snap::read::FrameDecoder::new(data), &mut out),
            CompressionType::Lz4 => copy_all(lz4_flex::frame::FrameDecoder::new(data), &mut out),
            CompressionType::Gzip => copy_all(flate2::read::GzDecoder::new(data), &mut out),
        };
        copied.map_err(|e| {
            ShardPipeError::Processing(format!("malformed {} frame: {}", self.kind, e))
        })?;
        Ok(self.read_buf.split().freeze())
    }
}

fn copy_all<R: Read, W: Write>(mut reader: R, writer: &mut W) -> io::Result<u64> {
    io::copy(&mut reader, writer)
}
