//! Reed-Solomon Erasure Coding
//!
//! Implements (k, m) erasure coding where:
//! - k data parts carry the (padded) input, split into equal contiguous parts
//! - m parity parts are computed from the data parts
//! - any k of the k+m parts reconstruct the input
//!
//! Input is right-padded with zeros to a multiple of `k * STRIPE_UNIT`
//! before splitting. The padding policy is part of the stored format.

use crate::error::{Result, ShardPipeError};
use crate::STRIPE_UNIT;
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Erasure coding configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data shards (k)
    pub data_shards: usize,
    /// Number of parity shards (m)
    pub parity_shards: usize,
}

impl ErasureConfig {
    /// Create a new erasure config
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(ShardPipeError::InvalidArgument(
                "data_shards must be at least 1".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(ShardPipeError::InvalidArgument(
                "parity_shards must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    /// Total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Storage overhead ratio (parity/data)
    pub fn overhead_ratio(&self) -> f64 {
        self.parity_shards as f64 / self.data_shards as f64
    }

    /// Maximum number of lost parts that can be tolerated
    pub fn max_failures(&self) -> usize {
        self.parity_shards
    }

    /// Length of a full padding stripe
    fn stripe_len(&self) -> usize {
        self.data_shards * STRIPE_UNIT
    }
}

/// Reed-Solomon encoder/decoder
pub struct ErasureEncoder {
    config: ErasureConfig,
    encoder: ReedSolomon,
}

impl ErasureEncoder {
    /// Create a new encoder for `k` data and `m` parity shards
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        Self::with_config(ErasureConfig::new(data_shards, parity_shards)?)
    }

    /// Create a new encoder with custom configuration
    pub fn with_config(config: ErasureConfig) -> Result<Self> {
        let encoder = ReedSolomon::new(config.data_shards, config.parity_shards)?;
        Ok(Self { config, encoder })
    }

    /// Get the erasure configuration
    pub fn config(&self) -> &ErasureConfig {
        &self.config
    }

    /// Number of parts produced by `encode` and expected by `decode`
    pub fn required_shard_count(&self) -> usize {
        self.config.total_shards()
    }

    /// Number of parts needed to reconstruct the data
    pub fn minimum_valid_shard_count(&self) -> usize {
        self.config.data_shards
    }

    /// Number of zero bytes appended to data of the given length.
    ///
    /// Empty input is padded to one full stripe so every part is non-empty.
    pub fn padding_len(&self, data_len: usize) -> usize {
        let stripe = self.config.stripe_len();
        match data_len % stripe {
            0 if data_len > 0 => 0,
            rem => stripe - rem,
        }
    }

    /// Length of every part produced for data of the given length
    pub fn shard_size(&self, data_len: usize) -> usize {
        (data_len + self.padding_len(data_len)) / self.config.data_shards
    }

    /// Part length for a recorded data length, `None` when the padded
    /// length overflows
    pub fn checked_shard_size(&self, data_len: u64) -> Option<usize> {
        let data_len = usize::try_from(data_len).ok()?;
        let padded = data_len.checked_add(self.padding_len(data_len))?;
        Some(padded / self.config.data_shards)
    }

    /// Encode data into `k + m` parts
    ///
    /// The first `k` parts hold the padded data, the last `m` the parity.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Bytes>> {
        let shard_size = self.shard_size(data.len());

        let mut padded = Vec::with_capacity(shard_size * self.config.data_shards);
        padded.extend_from_slice(data);
        padded.resize(shard_size * self.config.data_shards, 0);

        let mut shards: Vec<Vec<u8>> = padded.chunks(shard_size).map(|c| c.to_vec()).collect();
        for _ in 0..self.config.parity_shards {
            shards.push(vec![0u8; shard_size]);
        }

        // Fills in the parity shards
        self.encoder.encode(&mut shards)?;

        Ok(shards.into_iter().map(Bytes::from).collect())
    }

    /// Decode parts back into the original data
    ///
    /// `parts` must hold exactly `k + m` entries in their original positions.
    /// Missing parts are `None` or empty. At least `k` parts must be present.
    pub fn decode(&self, parts: &[Option<Bytes>], data_size: u64) -> Result<Bytes> {
        let total_shards = self.config.total_shards();
        if parts.len() != total_shards {
            return Err(ShardPipeError::UnexpectedObjectCount {
                expected: total_shards,
                actual: parts.len(),
            });
        }

        let mut shards: Vec<Option<Vec<u8>>> = parts
            .iter()
            .map(|part| match part {
                Some(data) if !data.is_empty() => Some(data.to_vec()),
                _ => None,
            })
            .collect();

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.config.data_shards {
            return Err(ShardPipeError::InsufficientShards {
                available,
                required: self.config.data_shards,
            });
        }

        // Parity parts are not needed for the output
        self.encoder.reconstruct_data(&mut shards)?;

        let mut result = Vec::new();
        for shard in shards.iter().take(self.config.data_shards) {
            match shard {
                Some(data) => result.extend_from_slice(data),
                None => {
                    return Err(ShardPipeError::Internal(
                        "data shard missing after reconstruction".to_string(),
                    ))
                }
            }
        }

        if data_size > result.len() as u64 {
            return Err(ShardPipeError::InvalidDataSize {
                expected: data_size,
                actual: result.len() as u64,
            });
        }
        result.truncate(data_size as usize);
        Ok(Bytes::from(result))
    }

    /// Verify that a complete set of parts is consistent
    pub fn verify(&self, parts: &[Bytes]) -> Result<bool> {
        if parts.len() != self.config.total_shards() {
            return Ok(false);
        }

        let expected_size = parts.first().map(|p| p.len()).unwrap_or(0);
        if !parts.iter().all(|p| p.len() == expected_size) {
            return Ok(false);
        }

        let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_ref()).collect();
        Ok(self.encoder.verify(&refs)?)
    }
}
