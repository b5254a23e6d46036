//! Error types for the sig-chain data model.

use thiserror::Error;

/// Core errors raised while encoding, decoding or authenticating messages.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    /// The bytes decode, but re-encoding them does not reproduce the input.
    #[error("message is not canonically encoded")]
    NonCanonical,
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
