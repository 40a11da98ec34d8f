//! Error types for ShardPipe
//!
//! Provides a unified error type for all pipeline, storage and shard operations.

use thiserror::Error;

/// Result type alias for ShardPipe operations
pub type Result<T> = std::result::Result<T, ShardPipeError>;

/// Unified error type for ShardPipe
#[derive(Error, Debug)]
pub enum ShardPipeError {
    // ===== Caller Errors =====
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Placement Errors =====
    #[error("Not enough shards available")]
    ShardsUnavailable,

    #[error("Unexpected object count: expected {expected}, got {actual}")]
    UnexpectedObjectCount { expected: usize, actual: usize },

    #[error("Invalid data size: expected {expected}, got {actual}")]
    InvalidDataSize { expected: u64, actual: u64 },

    // ===== Integrity Errors =====
    #[error("Object chunk #{index}'s data and hash do not match")]
    HashMismatch { index: usize },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    // ===== Erasure Coding Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Insufficient shards: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    // ===== Shard Errors =====
    #[error("Key not found")]
    KeyNotFound,

    #[error("Object corrupted")]
    ObjectCorrupted,

    #[error("Namespace full: {used} / {capacity} bytes")]
    NamespaceFull { used: u64, capacity: u64 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Generic Errors =====
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShardPipeError {
    /// Integrity failures are fatal and must never be swallowed by a shard loop.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            ShardPipeError::HashMismatch { .. }
                | ShardPipeError::Processing(_)
                | ShardPipeError::InvalidKeyLength(_)
        )
    }

    /// Errors reported by a shard client rather than by the pipeline itself.
    pub fn is_shard_error(&self) -> bool {
        matches!(
            self,
            ShardPipeError::KeyNotFound
                | ShardPipeError::ObjectCorrupted
                | ShardPipeError::NamespaceFull { .. }
                | ShardPipeError::PermissionDenied(_)
                | ShardPipeError::Transport(_)
        )
    }
}

impl From<reed_solomon_erasure::Error> for ShardPipeError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        ShardPipeError::ErasureCoding(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ShardPipeError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ShardPipeError::Cancelled
        } else {
            ShardPipeError::Internal(format!("worker task panicked: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShardPipeError::InsufficientShards {
            available: 8,
            required: 10,
        };
        assert_eq!(err.to_string(), "Insufficient shards: have 8, need 10");

        let err = ShardPipeError::HashMismatch { index: 3 };
        assert_eq!(
            err.to_string(),
            "Object chunk #3's data and hash do not match"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ShardPipeError = io_err.into();
        assert!(matches!(err, ShardPipeError::Io(_)));
    }

    #[test]
    fn test_error_classification() {
        assert!(ShardPipeError::HashMismatch { index: 0 }.is_integrity_failure());
        assert!(ShardPipeError::Processing("bad frame".into()).is_integrity_failure());
        assert!(!ShardPipeError::ShardsUnavailable.is_integrity_failure());

        assert!(ShardPipeError::KeyNotFound.is_shard_error());
        assert!(ShardPipeError::NamespaceFull { used: 1, capacity: 1 }.is_shard_error());
        assert!(!ShardPipeError::ShardsUnavailable.is_shard_error());
    }
}
