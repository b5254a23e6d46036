//! In-memory implementation of the LedgerStore trait.
//!
//! This is primarily for testing. It has the same commit semantics as
//! SQLite but keeps everything in memory with no persistence.

use std::sync::RwLock;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::state::{Change, LedgerState, Versions};
use crate::traits::LedgerStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<LedgerState>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn snapshot(&self) -> Result<LedgerState> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.clone())
    }

    fn commit(&self, base: Versions, changes: &[Change]) -> Result<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.check_versions(base, changes)?;

        let mut next = state.clone();
        next.apply_journal(changes)?;
        debug!(versions = ?next.versions(), "memory store commit");
        *state = next;
        Ok(())
    }
}
