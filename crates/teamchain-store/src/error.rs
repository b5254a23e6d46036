//! Error types for the store module.

use thiserror::Error;

use crate::state::Domain;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another transaction committed to the same domain first.
    #[error("commit conflict in {domain} domain")]
    Conflict { domain: Domain },

    #[error("no team")]
    NoTeam,

    #[error("team already exists")]
    TeamAlreadyExists,

    #[error("no main-chain genesis block")]
    NoGenesisBlock,

    #[error("no log-chain genesis block")]
    NoLogGenesisBlock,

    #[error("no such member")]
    NoSuchMember,

    #[error("member already exists")]
    MemberAlreadyExists,

    #[error("prospective admin is not a member")]
    ProspectiveAdminIsNotMember,

    /// The host is pinned, but not to the presented key.
    #[error("host key mismatch for {host}: expected one of {expected:?}")]
    HostMismatch { host: String, expected: Vec<String> },

    #[error("unknown block: {0}")]
    UnknownBlock(String),

    #[error("block already exists: {0}")]
    BlockAlreadyExists(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
