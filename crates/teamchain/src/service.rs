//! The team service: one identity, one local store, one coordinator.
//!
//! Every mutating call takes the identity lock for its whole duration, so
//! "read the head, build a block, post it, apply it" is never interleaved
//! with another call against the same identity.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use teamchain_core::{now_secs, BlockHash, SignPublicKey, TeamInfo};
use teamchain_store::{LedgerState, LedgerStore, StoreExt};

use crate::builder::{
    accept_direct_invite, accept_indirect_invite, read_blocks_request, read_log_blocks_request,
    signed_message_for, RequestableOperation,
};
use crate::config::TeamConfig;
use crate::error::Result;
use crate::identity::{write_identity_file, MemberProfile, TeamIdentity};
use crate::log_chain::{self, ingest_log_blocks, next_log_block, verify_and_process_log_block};
use crate::sync::{sync_stores, SyncReport};
use crate::transport::TeamTransport;
use crate::verifier::ingest_blocks;

/// A team member's view of their team, kept current through a coordinator.
pub struct TeamService<S: LedgerStore, T: TeamTransport> {
    identity: Mutex<TeamIdentity>,
    store: Arc<S>,
    transport: T,
    config: TeamConfig,
}

impl<S: LedgerStore, T: TeamTransport> TeamService<S, T> {
    pub fn new(identity: TeamIdentity, store: Arc<S>, transport: T, config: TeamConfig) -> Self {
        Self {
            identity: Mutex::new(identity),
            store,
            transport,
            config,
        }
    }

    /// Found a new team: generate the admin identity, publish the genesis
    /// block and apply it locally.
    pub async fn create_team(
        profile: MemberProfile,
        team_info: TeamInfo,
        store: Arc<S>,
        transport: T,
        config: TeamConfig,
    ) -> Result<Self> {
        let (identity, genesis) = TeamIdentity::new_admin(profile, team_info)?;
        transport.post_block(genesis.clone()).await?;
        ingest_blocks(&identity.public_key(), &*store, &[genesis])?;
        info!(team = %identity.initial_team_public_key(), "created team");
        Ok(Self::new(identity, store, transport, config))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    /// A snapshot of the local state.
    pub fn snapshot(&self) -> Result<LedgerState> {
        Ok(self.store.snapshot()?)
    }

    pub async fn public_key(&self) -> SignPublicKey {
        self.identity.lock().await.public_key()
    }

    pub async fn checkpoint(&self) -> BlockHash {
        self.identity.lock().await.checkpoint()
    }

    /// Write the identity file under the configured data directory.
    ///
    /// The file is written on the blocking pool after the identity lock is
    /// released.
    pub async fn save_identity(&self) -> Result<()> {
        let (path, json) = {
            let identity = self.identity.lock().await;
            (self.config.identity_path(&identity.id()), identity.to_json()?)
        };
        tokio::task::spawn_blocking(move || write_identity_file(&path, &json))
            .await
            .map_err(std::io::Error::from)?
    }

    // ─────────────────────────────────────────────────────────────────────
    // Main chain
    // ─────────────────────────────────────────────────────────────────────

    /// Pull and verify main-chain blocks until the coordinator has no more.
    /// Returns the number of blocks applied.
    pub async fn update_team(&self) -> Result<usize> {
        let mut identity = self.identity.lock().await;
        self.update_locked(&mut identity).await
    }

    async fn update_locked(&self, identity: &mut TeamIdentity) -> Result<usize> {
        let team_public_key = identity.initial_team_public_key();
        let mut applied = 0;
        loop {
            let request = read_blocks_request(identity, &self.store.snapshot()?)?;
            let response = self.transport.read_blocks(request).await?;
            applied += ingest_blocks(&team_public_key, &*self.store, &response.blocks)?;
            if !response.has_more || response.blocks.is_empty() {
                break;
            }
        }

        if let Some(head) = self.store.snapshot()?.last_block_hash() {
            identity.set_checkpoint(head);
        }
        if applied > 0 {
            debug!(applied, checkpoint = %identity.checkpoint(), "team updated");
        }
        Ok(applied)
    }

    /// Append `request` to the main chain. Indirect invites return their
    /// join link.
    pub async fn perform(&self, request: RequestableOperation) -> Result<Option<String>> {
        let mut identity = self.identity.lock().await;
        self.update_locked(&mut identity).await?;

        let state = self.store.snapshot()?;
        let (block, link) =
            signed_message_for(&identity, &state, request, &self.config.app_url_scheme)?;
        self.transport.post_block(block).await?;

        self.update_locked(&mut identity).await?;
        Ok(link)
    }

    /// Accept an invitation: the indirect one behind `link`, or a direct
    /// invitation to this identity's key when `link` is `None`.
    pub async fn join_team(&self, link: Option<&str>) -> Result<()> {
        let mut identity = self.identity.lock().await;
        self.update_locked(&mut identity).await?;

        let state = self.store.snapshot()?;
        let block = match link {
            Some(link) => accept_indirect_invite(&identity, link, &state)?,
            None => accept_direct_invite(&identity, &state)?,
        };
        self.transport.post_block(block).await?;

        self.update_locked(&mut identity).await?;
        info!(member = %identity.public_key(), "joined team");
        Ok(())
    }

    /// Replay anything `source` has that the local store lacks.
    pub async fn sync_from(&self, source: &dyn LedgerStore) -> Result<SyncReport> {
        let mut identity = self.identity.lock().await;
        let report = sync_stores(
            &identity,
            source,
            &*self.store,
            self.config.read_batch_limit,
        )?;
        if let Some(head) = self.store.snapshot()?.last_block_hash() {
            identity.set_checkpoint(head);
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Audit log
    // ─────────────────────────────────────────────────────────────────────

    /// Queue an audit-log entry for the next [`Self::send_unsent_log_blocks`].
    pub async fn write_audit_log(&self, data: impl Into<Bytes>) -> Result<()> {
        let _identity = self.identity.lock().await;
        let data = data.into();
        self.store
            .with_transaction(|txn| log_chain::write_audit_log(txn, data, now_secs()))
    }

    /// Publish the queued audit log.
    ///
    /// Catches up on the main chain (for the current admin set) and on the
    /// identity's own log chain first, then produces, posts and applies one
    /// log block at a time. Returns the number of entries sent.
    pub async fn send_unsent_log_blocks(&self) -> Result<usize> {
        let mut identity = self.identity.lock().await;
        self.update_locked(&mut identity).await?;
        self.pull_log_blocks(&identity).await?;

        let mut sent = 0;
        loop {
            let mut txn = self.store.begin()?;
            let Some(next) = next_log_block(&identity, &mut txn)? else {
                txn.rollback();
                break;
            };

            if let Err(e) = self.transport.post_block(next.block.clone()).await {
                warn!(error = %e, "coordinator refused log block");
                txn.rollback();
                return Err(e.into());
            }
            verify_and_process_log_block(&identity, &mut txn, &next.block)?;
            if let Some(entry) = next.consumed {
                txn.mark_audit_log_sent(entry.data_hash)?;
                sent += 1;
            }
            txn.commit()?;
        }

        if sent > 0 {
            info!(sent, "sent audit log entries");
        }
        Ok(sent)
    }

    async fn pull_log_blocks(&self, identity: &TeamIdentity) -> Result<usize> {
        let mut applied = 0;
        loop {
            let request = read_log_blocks_request(identity, &self.store.snapshot()?)?;
            let response = self.transport.read_log_blocks(request).await?;
            applied += ingest_log_blocks(identity, &*self.store, &response.log_blocks)?;
            if !response.more || response.log_blocks.is_empty() {
                break;
            }
        }
        Ok(applied)
    }
}
