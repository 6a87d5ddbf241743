//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while compacting or expanding a snapshot.
///
/// Every variant except [`CodecError::EncodingFailed`] and
/// [`CodecError::KeyDerivation`] means the payload could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode the snapshot.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// The payload does not start with the envelope magic.
    #[error("not a snapshot payload (bad magic)")]
    BadMagic,

    /// The payload was written by an incompatible format version.
    #[error("unsupported payload version: found {found}, supported {supported}")]
    UnsupportedVersion {
        /// Version found in the payload.
        found: u16,
        /// Version this build understands.
        supported: u16,
    },

    /// The payload ends before a declared section.
    #[error("payload truncated")]
    Truncated,

    /// The payload parsed but its structure is invalid.
    #[error("invalid payload structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// The compressed body could not be decompressed.
    #[error("decompression failed: {message}")]
    DecompressionFailed {
        /// Description of the decompression error.
        message: String,
    },

    /// A short-coded key has no entry in the dictionary.
    #[error("unknown short code {0:?}")]
    UnknownShortCode(String),

    /// Sealed secrets failed authentication (wrong key or tampering).
    #[error("sealed secrets failed authentication")]
    DecryptionFailed,

    /// Key derivation from the credential material failed.
    #[error("key derivation failed")]
    KeyDerivation,

    /// A restored secret points at a location that does not exist.
    #[error("secret location {pointer:?} does not exist in the snapshot")]
    DanglingSecret {
        /// JSON Pointer of the secret.
        pointer: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create a decompression failed error.
    pub fn decompression_failed(message: impl Into<String>) -> Self {
        Self::DecompressionFailed {
            message: message.into(),
        }
    }

    /// Returns true if the error came from reading a payload.
    pub fn is_decode_error(&self) -> bool {
        !matches!(
            self,
            CodecError::EncodingFailed { .. } | CodecError::KeyDerivation
        )
    }
}
