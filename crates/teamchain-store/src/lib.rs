//! # Teamchain Store
//!
//! Append-only local storage for team sig-chains: the main and log chains,
//! the projections folded from them, and the unsent audit-log queue.
//!
//! ## Overview
//!
//! A [`LedgerStore`] hands out snapshots and commits journals of
//! [`Change`]s. All reading and writing happens through a [`Transaction`]
//! (or a [`ReadTransaction`]), obtained from [`StoreExt::begin`]. The primary
//! implementation is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use teamchain_store::{SqliteStore, StoreExt, StoreError};
//!
//! let store = SqliteStore::open("team.db").unwrap();
//!
//! let head = store
//!     .with_read_transaction(|txn| Ok::<_, StoreError>(txn.last_block_hash()))
//!     .unwrap();
//! ```
//!
//! ## Design Notes
//!
//! - **Optimistic concurrency**: two transactions that write the same chain
//!   cannot both commit; the second fails with [`StoreError::Conflict`]
//! - **Per-block atomicity**: [`Transaction::savepoint`] and
//!   [`Transaction::rollback_to`] undo part of a transaction
//! - **Commuting queue**: audit-log enqueues and removals never conflict

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod state;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use state::{Chain, ChainLink, Change, Domain, LedgerState, Member, UnsentAuditLog, Versions};
pub use traits::{LedgerStore, ReadTransaction, Savepoint, StoreExt, Transaction};
