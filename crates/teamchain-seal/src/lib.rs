//! # Teamchain Seal
//!
//! Sealing primitives for team sig-chains.
//!
//! ## Encryption Model
//!
//! The audit log uses a two-layer key model:
//!
//! 1. **Log key**: a symmetric key (ChaCha20-Poly1305) that encrypts each entry
//! 2. **Wrapped keys**: the log key is boxed to each recipient via X25519
//!
//! Adding a recipient only boxes the existing key again. Removing one
//! requires a new log key, since the old recipient still holds a copy.

pub mod boxed;
pub mod crypto;
pub mod error;

pub use boxed::{wrap_log_key, BoxedMessage, PlaintextBody};
pub use crypto::{BoxSecret, EncryptionKey, EncryptionNonce, SharedKey};
pub use error::{Result, SealError};
