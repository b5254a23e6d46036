//! # Teamchain
//!
//! The trust core of a team: an append-only, signed main chain holding
//! membership, admins, policy, pinned host keys and logging settings, plus
//! a per-member encrypted audit-log chain.
//!
//! ## Overview
//!
//! - **Identity**: a member's signing and sealing keys ([`TeamIdentity`])
//! - **Verifier**: checks every main-chain block before it touches a store
//! - **Log chain**: wraps a per-member log key to the current admins and
//!   encrypts queued audit entries under it
//! - **Sync**: keeps two local stores of one identity convergent
//! - **Service**: drives all of the above against an untrusted coordinator
//!
//! Blocks from anywhere (the coordinator, a companion database) go through
//! the same verification path. There is no trusted shortcut.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use teamchain::core::TeamInfo;
//! use teamchain::store::SqliteStore;
//! use teamchain::transport::memory::MemoryCoordinator;
//! use teamchain::{MemberProfile, RequestableOperation, TeamConfig, TeamService};
//!
//! async fn example() -> teamchain::Result<()> {
//!     let store = Arc::new(SqliteStore::open("team.db")?);
//!     let service = TeamService::create_team(
//!         MemberProfile::new("admin@acme.co"),
//!         TeamInfo { name: "acme".into() },
//!         store,
//!         MemoryCoordinator::default(),
//!         TeamConfig::default(),
//!     )
//!     .await?;
//!
//!     // Anyone at acme.co may join with this link
//!     let link = service
//!         .perform(RequestableOperation::IndirectInvite(
//!             teamchain::core::Restriction::Domain("acme.co".into()),
//!         ))
//!         .await?;
//!     println!("{:?}", link);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `teamchain::core` - chain data model and canonical encoding
//! - `teamchain::seal` - box and symmetric sealing
//! - `teamchain::store` - ledger state, transactions, SQLite

pub mod builder;
pub mod config;
pub mod error;
pub mod identity;
pub mod log_chain;
pub mod service;
pub mod sync;
pub mod transport;
pub mod verifier;

// Re-export component crates
pub use teamchain_core as core;
pub use teamchain_seal as seal;
pub use teamchain_store as store;

// Re-export main types for convenience
pub use builder::{
    accept_direct_invite, accept_indirect_invite, signed_message_for, InviteSecret,
    RequestableOperation,
};
pub use config::{DatabaseRole, TeamConfig};
pub use error::{ChainError, ErrorKind, Result};
pub use identity::{MemberProfile, TeamIdentity};
pub use log_chain::{next_log_block, verify_and_process_log_block, NextLogBlock};
pub use service::TeamService;
pub use sync::{check_convergence, sync_stores, Convergence, SyncReport};
pub use transport::{TeamTransport, TransportError};
pub use verifier::{ingest_blocks, verify_and_process_blocks};
