//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store has no room left for the write.
    #[error("storage quota exceeded: need {required} bytes, limit is {limit} bytes")]
    QuotaExceeded {
        /// Total bytes the store would hold after the write.
        required: u64,
        /// Configured capacity of the store.
        limit: u64,
    },

    /// A persisted value could not be read back.
    #[error("stored value for key {key:?} is corrupted: {message}")]
    Corrupted {
        /// The affected key.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// The key is empty or otherwise unusable.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Another process holds the store directory.
    #[error("store directory is locked by another process")]
    Locked,
}

impl StorageError {
    /// Returns true if the error means the device ran out of room.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
