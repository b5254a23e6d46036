//! Error types for sealing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Authentication failed, or the box was not addressed to this key.
    #[error("failed to open sealed message")]
    OpeningError,

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// Result type for sealing operations.
pub type Result<T> = std::result::Result<T, SealError>;
