//! Pipeline configuration
//!
//! Loaded from TOML, optionally overridden from environment variables.
//!
//! ```toml
//! chunk_size = 4096
//! job_count = 8
//!
//! [hashing]
//! type = "blake2b_256"
//! key = "..."
//!
//! [compression]
//! mode = "default"
//! type = "lz4"
//!
//! [encryption]
//! type = "aes"
//! key = "..."
//!
//! [distribution]
//! data_shards = 4
//! parity_shards = 2
//!
//! [cluster]
//! shards = ["shard-0:9000", "shard-1:9000"]
//! ```

use serde::{Deserialize, Serialize};
use shardpipe_core::crypto::HashType;
use shardpipe_core::error::ShardPipeError;
use shardpipe_core::processing::{CompressionMode, CompressionType, EncryptionType};
use shardpipe_storage::ClusterConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),
}

impl From<ConfigError> for ShardPipeError {
    fn from(err: ConfigError) -> Self {
        ShardPipeError::Configuration(err.to_string())
    }
}

/// Hash algorithm and optional MAC key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Registry name of the algorithm; empty selects Blake2b-256
    #[serde(rename = "type")]
    pub hash_type: String,

    /// MAC key; falls back to the encryption key when empty
    pub key: String,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            hash_type: HashType::default().name().to_string(),
            key: String::new(),
        }
    }
}

impl fmt::Debug for HashingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashingConfig")
            .field("hash_type", &self.hash_type)
            .field("key", &redacted(&self.key))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub mode: CompressionMode,

    #[serde(rename = "type")]
    pub compression_type: CompressionType,
}

/// Encryption algorithm and key; an empty key disables encryption
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    #[serde(rename = "type")]
    pub encryption_type: EncryptionType,

    pub key: String,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("encryption_type", &self.encryption_type)
            .field("key", &redacted(&self.key))
            .finish()
    }
}

fn redacted(key: &str) -> &'static str {
    if key.is_empty() {
        ""
    } else {
        "[REDACTED]"
    }
}

/// Data and parity shard counts
///
/// Signed so that negative counts are reported by [`placement`](Self::placement)
/// instead of failing to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    #[serde(alias = "k")]
    pub data_shards: i64,

    #[serde(alias = "m")]
    pub parity_shards: i64,
}

/// How chunks are placed on the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// One object on one random shard
    Random,
    /// N identical copies
    Replicated(usize),
    /// Reed-Solomon data and parity parts
    Distributed { data_shards: usize, parity_shards: usize },
}

impl DistributionConfig {
    pub fn new(data_shards: i64, parity_shards: i64) -> Self {
        Self {
            data_shards,
            parity_shards,
        }
    }

    /// Placement strategy selected by the shard counts
    pub fn placement(&self) -> Result<Placement, ConfigError> {
        let (Ok(data_shards), Ok(parity_shards)) = (
            usize::try_from(self.data_shards),
            usize::try_from(self.parity_shards),
        ) else {
            return Err(ConfigError::InvalidDistribution(format!(
                "shard counts must not be negative (data {}, parity {})",
                self.data_shards, self.parity_shards
            )));
        };
        match (data_shards, parity_shards) {
            (0, 0) | (1, 0) => Ok(Placement::Random),
            (0, m) => Err(ConfigError::InvalidDistribution(format!(
                "{} parity shards require at least one data shard",
                m
            ))),
            (n, 0) => Ok(Placement::Replicated(n)),
            (k, m) => Ok(Placement::Distributed {
                data_shards: k,
                parity_shards: m,
            }),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Split size in bytes; 0 stores every stream as a single chunk
    pub chunk_size: usize,

    pub hashing: HashingConfig,

    pub compression: CompressionConfig,

    pub encryption: EncryptionConfig,

    pub distribution: DistributionConfig,

    pub cluster: ClusterConfig,

    /// Processor workers; storage workers are twice as many
    pub job_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 0,
            hashing: HashingConfig::default(),
            compression: CompressionConfig::default(),
            encryption: EncryptionConfig::default(),
            distribution: DistributionConfig::default(),
            cluster: ClusterConfig::default(),
            job_count: shardpipe_core::default_job_count(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Override numeric settings from `SHARDPIPE_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(chunk_size) = parse_var(&lookup, "SHARDPIPE_CHUNK_SIZE")? {
            self.chunk_size = chunk_size;
        }
        if let Some(job_count) = parse_var(&lookup, "SHARDPIPE_JOB_COUNT")? {
            self.job_count = job_count;
        }
        if let Some(data_shards) = parse_var(&lookup, "SHARDPIPE_DATA_SHARDS")? {
            self.distribution.data_shards = data_shards;
        }
        if let Some(parity_shards) = parse_var(&lookup, "SHARDPIPE_PARITY_SHARDS")? {
            self.distribution.parity_shards = parity_shards;
        }
        Ok(())
    }

    /// Reject settings that can never produce a working pipeline
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_count == 0 {
            return Err(ConfigError::InvalidValue(
                "job_count".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        self.distribution.placement()?;
        Ok(())
    }

    /// Key used for hashing: the hashing key, or else the encryption key
    pub fn hash_key(&self) -> &[u8] {
        if self.hashing.key.is_empty() {
            self.encryption.key.as_bytes()
        } else {
            self.hashing.key.as_bytes()
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), value)),
        None => Ok(None),
    }
}
