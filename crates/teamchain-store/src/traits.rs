//! Store trait and the transactions built on top of it.
//!
//! A [`LedgerStore`] only knows two things: how to hand out a snapshot and
//! how to commit a journal of [`Change`]s against the snapshot's versions.
//! [`Transaction`] buffers changes on a private working copy; nothing is
//! visible to other transactions until [`Transaction::commit`]. Dropping a
//! transaction without committing discards it.

use std::ops::Deref;

use bytes::Bytes;
use tracing::{debug, warn};

use teamchain_core::{
    BoxPublicKey, Identity, Invitation, Sha256Hash, SignPublicKey, SignedMessage, SshHostKey, Team,
};
use teamchain_seal::EncryptionKey;

use crate::error::{Result, StoreError};
use crate::state::{Change, LedgerState, Versions};

/// Backend interface for ledger persistence.
///
/// # Design Notes
///
/// - **Optimistic concurrency**: `commit` fails with [`StoreError::Conflict`]
///   when a guarded domain written by `changes` has moved since `base`.
///   The first committer wins; the loser must re-read and retry.
/// - **Atomic commits**: either every change in the journal is applied or none is.
pub trait LedgerStore: Send + Sync {
    /// A consistent copy of the current committed state.
    fn snapshot(&self) -> Result<LedgerState>;

    /// Apply `changes` atomically if no guarded domain moved since `base`.
    fn commit(&self, base: Versions, changes: &[Change]) -> Result<()>;
}

/// Transaction entry points, available on every store and on `dyn LedgerStore`.
pub trait StoreExt {
    fn as_store(&self) -> &dyn LedgerStore;

    /// Open a read-write transaction.
    fn begin(&self) -> Result<Transaction<'_>> {
        let store = self.as_store();
        let base = store.snapshot()?;
        Ok(Transaction {
            store,
            state: base.clone(),
            base,
            journal: Vec::new(),
        })
    }

    /// Open a read-only transaction.
    fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(ReadTransaction {
            state: self.as_store().snapshot()?,
        })
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// Run `f` against a read-only snapshot.
    fn with_read_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&ReadTransaction) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let txn = self.begin_read()?;
        f(&txn)
    }
}

impl<S: LedgerStore> StoreExt for S {
    fn as_store(&self) -> &dyn LedgerStore {
        self
    }
}

impl StoreExt for dyn LedgerStore + '_ {
    fn as_store(&self) -> &dyn LedgerStore {
        self
    }
}

/// A position in a transaction's journal to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// A read-write transaction.
///
/// Reads see the transaction's own uncommitted changes (through `Deref`
/// to [`LedgerState`]).
pub struct Transaction<'s> {
    store: &'s dyn LedgerStore,
    base: LedgerState,
    state: LedgerState,
    journal: Vec<Change>,
}

impl<'s> Transaction<'s> {
    /// Buffered changes, oldest first.
    pub fn changes(&self) -> &[Change] {
        &self.journal
    }

    pub fn has_changes(&self) -> bool {
        !self.journal.is_empty()
    }

    fn record(&mut self, change: Change) -> Result<()> {
        self.state.apply(&change)?;
        self.journal.push(change);
        Ok(())
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.journal.len())
    }

    /// Discard every change recorded after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint) -> Result<()> {
        if savepoint.0 >= self.journal.len() {
            return Ok(());
        }
        self.journal.truncate(savepoint.0);

        let mut state = self.base.clone();
        for change in &self.journal {
            state.apply(change)?;
        }
        self.state = state;
        Ok(())
    }

    /// Make the buffered changes durable and visible.
    pub fn commit(self) -> Result<()> {
        if self.journal.is_empty() {
            return Ok(());
        }
        match self.store.commit(self.base.versions(), &self.journal) {
            Ok(()) => {
                debug!(changes = self.journal.len(), "committed transaction");
                Ok(())
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(error = %e, "transaction lost commit race");
                }
                Err(e)
            }
        }
    }

    /// Discard the buffered changes.
    pub fn rollback(self) {
        if !self.journal.is_empty() {
            debug!(changes = self.journal.len(), "rolled back transaction");
        }
    }

    // Main chain

    pub fn create_team(&mut self, team: Team, creator: Identity, block: SignedMessage) -> Result<()> {
        self.record(Change::CreateTeam {
            team,
            creator,
            block,
        })
    }

    pub fn append_block(&mut self, block: SignedMessage) -> Result<()> {
        self.record(Change::AppendBlock(block))
    }

    pub fn set_team(&mut self, team: Team) -> Result<()> {
        self.record(Change::SetTeam(team))
    }

    pub fn add_member(&mut self, identity: Identity) -> Result<()> {
        self.record(Change::AddMember(identity))
    }

    pub fn remove_member(&mut self, public_key: SignPublicKey) -> Result<()> {
        self.record(Change::RemoveMember(public_key))
    }

    pub fn add_admin(&mut self, public_key: SignPublicKey) -> Result<()> {
        self.record(Change::AddAdmin(public_key))
    }

    pub fn remove_admin(&mut self, public_key: SignPublicKey) -> Result<()> {
        self.record(Change::RemoveAdmin(public_key))
    }

    pub fn add_invitation(&mut self, invitation: Invitation) -> Result<()> {
        self.record(Change::AddInvitation(invitation))
    }

    pub fn remove_direct_invitations(&mut self, public_key: SignPublicKey) -> Result<()> {
        self.record(Change::RemoveDirectInvitations(public_key))
    }

    pub fn remove_all_invitations(&mut self) -> Result<()> {
        self.record(Change::RemoveAllInvitations)
    }

    pub fn pin_host_key(&mut self, host_key: SshHostKey) -> Result<()> {
        self.record(Change::PinHostKey(host_key))
    }

    pub fn unpin_host_key(&mut self, host_key: SshHostKey) -> Result<()> {
        self.record(Change::UnpinHostKey(host_key))
    }

    // Log chain

    pub fn append_log_block(&mut self, block: SignedMessage) -> Result<()> {
        self.record(Change::AppendLogBlock(block))
    }

    pub fn set_log_encryption_key(&mut self, key: EncryptionKey) -> Result<()> {
        self.record(Change::SetLogEncryptionKey(key))
    }

    pub fn set_tracked_wrapped_to(
        &mut self,
        recipients: std::collections::BTreeSet<BoxPublicKey>,
    ) -> Result<()> {
        self.record(Change::SetTrackedWrappedTo(recipients))
    }

    // Audit-log queue

    pub fn enqueue_audit_log(&mut self, data: Bytes, date: u64) -> Result<()> {
        self.record(Change::EnqueueAuditLog { data, date })
    }

    pub fn mark_audit_log_sent(&mut self, data_hash: Sha256Hash) -> Result<()> {
        self.record(Change::MarkAuditLogSent(data_hash))
    }

    pub fn clear_unsent_audit_logs(&mut self) -> Result<()> {
        self.record(Change::ClearUnsentAuditLogs)
    }
}

impl Deref for Transaction<'_> {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        &self.state
    }
}

/// A read-only transaction: an owned snapshot with no commit path.
#[derive(Debug, Clone)]
pub struct ReadTransaction {
    state: LedgerState,
}

impl ReadTransaction {
    pub fn into_state(self) -> LedgerState {
        self.state
    }
}

impl Deref for ReadTransaction {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        &self.state
    }
}
