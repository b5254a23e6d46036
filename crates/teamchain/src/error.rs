//! Error types for the team sig-chain engine.

use teamchain_core::{BlockHash, CoreError, Version};
use teamchain_seal::SealError;
use teamchain_store::StoreError;
use thiserror::Error;

use crate::transport::TransportError;

/// Broad classes of failure, used to decide what a caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Incompatible version or undecodable message. Never retried.
    Protocol,
    /// Bad signature, bad link or wrong chain. Corruption or a malicious relay.
    Integrity,
    /// A well-formed operation that is invalid against the current state.
    Precondition,
    /// Storage failure. Commit conflicts are retryable.
    Store,
    /// A signing or sealing primitive failed.
    Crypto,
    /// The transport collaborator failed.
    Transport,
}

/// Errors from verifying, producing or syncing blocks.
#[derive(Debug, Error)]
pub enum ChainError {
    // Main chain
    #[error("first block is not a main-chain create")]
    MissingCreateChain,

    #[error("genesis is not signed by the initial team public key")]
    TeamPublicKeyMismatch,

    #[error("protocol version {0} is a major upgrade")]
    MajorVersionIncompatible(Version),

    #[error("expected a main-chain append")]
    UnexpectedBlock,

    #[error("signer is not an admin")]
    SignerNotAdmin,

    #[error("no open invitation admits this acceptance")]
    UnknownAcceptBlockPublicKey,

    #[error("last block hash does not match the chain head {expected:?}")]
    BadBlockHash { expected: Option<BlockHash> },

    #[error("bad block signature")]
    BadSignature,

    #[error("invitation public key already exists")]
    InvitePublicKeyAlreadyExists,

    #[error("direct invite for an existing member's email")]
    DirectInviteForExistingMemberEmail,

    #[error("direct invite for an existing member's public key")]
    DirectInviteForExistingMemberPublicKey,

    #[error("indirect invite lists an existing member's email")]
    IndirectInviteForExistingMemberEmail,

    #[error("email address already belongs to a member")]
    DuplicateEmailAddress,

    #[error("public key already belongs to a member")]
    MemberAlreadyExists,

    #[error("host key already pinned")]
    HostKeyAlreadyPinned,

    #[error("host key not pinned")]
    HostKeyNotPinned,

    #[error("member is already an admin")]
    MemberIsAlreadyAdmin,

    #[error("member is not an admin")]
    MemberNotAdmin,

    #[error("member does not exist")]
    MemberDoesNotExist,

    #[error("signer cannot remove themself")]
    SignerCannotRemoveSelf,

    #[error("logging endpoint already exists")]
    LoggingEndpointAlreadyExists,

    #[error("logging endpoint does not exist")]
    LoggingEndpointDoesNotExist,

    // Log chain
    #[error("not a log-chain block")]
    NotLogChainBlock,

    #[error("log block is not authored by this identity")]
    SignerNotLogChainAuthor,

    #[error("expected a log-chain genesis")]
    ExpectedLogChainGenesis,

    #[error("expected a log-chain append")]
    ExpectedLogChainAppend,

    #[error("last log block hash does not match the log chain head")]
    BadLogBlockHash,

    #[error("log genesis points at an unknown main-chain state")]
    MissingTeamPointerBlockHash,

    #[error("key rotation carries no key for this identity")]
    MissingLogChainWrappedKey,

    #[error("wrapped log key could not be opened")]
    BadLogChainWrappedKey,

    #[error("command logging is disabled for this team")]
    LoggingDisabled,

    // Block construction
    #[error("no main-chain head to build on")]
    NoBlockHash,

    #[error("no such member")]
    NoSuchMember,

    #[error("no such admin")]
    NoSuchAdmin,

    #[error("no such pinned host key")]
    NoSuchPinnedHostKey,

    #[error("no such logging endpoint")]
    NoSuchLoggingEndpoint,

    #[error("no open invitation matches")]
    NoMatchingInvitation,

    #[error("invalid invite link: {0}")]
    InvalidInviteLink(String),

    // Sync
    #[error("{chain} chains diverged: destination head {head} is unknown to the source")]
    StoresDiverged { chain: &'static str, head: BlockHash },

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("seal error: {0}")]
    Seal(#[from] SealError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("identity file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        use ChainError::*;

        match self {
            MajorVersionIncompatible(_) => ErrorKind::Protocol,
            Core(CoreError::DecodingError(_) | CoreError::NonCanonical) => ErrorKind::Protocol,

            MissingCreateChain
            | TeamPublicKeyMismatch
            | UnexpectedBlock
            | UnknownAcceptBlockPublicKey
            | BadBlockHash { .. }
            | BadSignature
            | NotLogChainBlock
            | SignerNotLogChainAuthor
            | ExpectedLogChainGenesis
            | ExpectedLogChainAppend
            | BadLogBlockHash
            | MissingTeamPointerBlockHash
            | MissingLogChainWrappedKey
            | BadLogChainWrappedKey
            | StoresDiverged { .. }
            | Core(CoreError::InvalidSignature | CoreError::InvalidPublicKey) => {
                ErrorKind::Integrity
            }

            SignerNotAdmin
            | InvitePublicKeyAlreadyExists
            | DirectInviteForExistingMemberEmail
            | DirectInviteForExistingMemberPublicKey
            | IndirectInviteForExistingMemberEmail
            | DuplicateEmailAddress
            | MemberAlreadyExists
            | HostKeyAlreadyPinned
            | HostKeyNotPinned
            | MemberIsAlreadyAdmin
            | MemberNotAdmin
            | MemberDoesNotExist
            | SignerCannotRemoveSelf
            | LoggingEndpointAlreadyExists
            | LoggingEndpointDoesNotExist
            | LoggingDisabled
            | NoBlockHash
            | NoSuchMember
            | NoSuchAdmin
            | NoSuchPinnedHostKey
            | NoSuchLoggingEndpoint
            | NoMatchingInvitation
            | InvalidInviteLink(_) => ErrorKind::Precondition,

            Store(_) | Json(_) | Io(_) => ErrorKind::Store,
            Core(CoreError::EncodingError(_)) | Seal(_) => ErrorKind::Crypto,
            Transport(_) => ErrorKind::Transport,
        }
    }

    /// Only a lost commit race is worth retrying: reload and rebuild.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Store(e) if e.is_conflict())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ChainError>;
