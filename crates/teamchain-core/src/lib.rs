//! # Teamchain Core
//!
//! The data model of team sig-chains: signed messages, main-chain and
//! log-chain payloads, identities, and the canonical encoding they are
//! signed and hashed over.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`SignedMessage`] - A serialized [`Message`] plus its signer and signature
//! - [`MainChain`] / [`Operation`] - Team state transitions
//! - [`LogChain`] / [`LogOperation`] - The per-member encrypted audit log
//! - [`Team`] - The projection folded from the main chain
//!
//! ## Canonicalization
//!
//! Every message is encoded as deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod log_chain;
pub mod main_chain;
pub mod message;
pub mod team;
pub mod types;

pub use canonical::{encode_canonical, from_canonical_bytes, to_canonical_bytes};
pub use crypto::{Keypair, Sha256Hash, SignPublicKey, Signature};
pub use error::CoreError;
pub use log_chain::{
    EncryptedLog, GenesisLogBlock, LogBlock, LogChain, LogChainGenesisPointer, LogChainPointer,
    LogOperation, LogsFilter, ReadLogBlocksRequest, WrappedKey,
};
pub use main_chain::{
    email_domain, Block, GenesisBlock, Identity, Invitation, LoggingEndpoint, MainChain,
    Operation, Policy, ReadBlocksRequest, Restriction, SshHostKey, TeamInfo, TeamPointer,
};
pub use message::{
    now_secs, Body, EmailChallenge, Header, Message, PushDevice, PushSubscription,
    PushSubscriptionAction, ReadBillingInfo, ReadToken, SignedMessage, TimeToken, Version,
    PROTOCOL_VERSION,
};
pub use team::Team;
pub use types::{BlockHash, BoxPublicKey};
