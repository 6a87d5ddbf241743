//! Error types for the sync engine.

use keepsake_codec::CodecError;
use keepsake_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync, backup and restore operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A remote call did not complete within the request timeout.
    #[error("operation timed out")]
    Timeout,

    /// The backup rate limit refuses uploads until `retry_at` (Unix millis).
    #[error("rate limited until {retry_at}")]
    RateLimited {
        /// Earliest time the next upload is allowed.
        retry_at: u64,
    },

    /// Downloaded data does not match its manifest.
    #[error("integrity check failed: {message}")]
    Integrity {
        /// Description of the mismatch.
        message: String,
    },

    /// The restored payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// The local store has no room left.
    #[error("local storage quota exceeded: need {required} bytes, limit is {limit} bytes")]
    QuotaExceeded {
        /// Bytes the write would need.
        required: u64,
        /// Configured capacity.
        limit: u64,
    },

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    /// The remote rejected the credentials.
    #[error("remote rejected the credentials")]
    Unauthorized,

    /// The remote has no object at the requested location.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// The remote refused an upload as too large.
    #[error("remote refused payload of {size} bytes as too large")]
    PayloadTooLarge {
        /// Size of the refused body.
        size: u64,
    },

    /// No credentials have been configured.
    #[error("no remote credentials configured")]
    NoCredentials,

    /// The remote holds no backup to restore.
    #[error("no backup available on the remote")]
    NoBackup,

    /// Another sync or restore is running.
    #[error("a sync or restore is already in flight")]
    AlreadyInFlight,

    /// The device is offline.
    #[error("device is offline")]
    Offline,

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Returns the earliest retry time if this is a rate-limit refusal.
    pub fn rate_limited_until(&self) -> Option<u64> {
        match self {
            SyncError::RateLimited { retry_at } => Some(*retry_at),
            _ => None,
        }
    }

    /// Returns true for outcomes that do not put the engine into the error
    /// state.
    pub(crate) fn is_expected(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited { .. }
                | SyncError::NoBackup
                | SyncError::AlreadyInFlight
                | SyncError::Offline
                | SyncError::NoCredentials
        )
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QuotaExceeded { required, limit } => {
                SyncError::QuotaExceeded { required, limit }
            }
            other => SyncError::Storage(other),
        }
    }
}
