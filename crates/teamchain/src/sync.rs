//! Keeping two local stores of one identity convergent.
//!
//! Blocks are replayed from the source into the destination through the
//! same verifier and log engine used for blocks from the coordinator, so a
//! companion store never trusts anything the main store could not prove.

use tracing::{debug, info};

use teamchain_core::{Identity, Invitation, SignedMessage, SshHostKey, Team};
use teamchain_store::{Chain, LedgerState, LedgerStore, StoreExt};

use crate::error::{ChainError, Result};
use crate::identity::TeamIdentity;
use crate::log_chain::ingest_log_blocks;
use crate::verifier::ingest_blocks;

/// How many blocks a sync applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub main_blocks: usize,
    pub log_blocks: usize,
}

/// Replay everything `destination` lacks from `source`.
///
/// Fails with [`ChainError::StoresDiverged`] if the destination's head is
/// not on the source's chain and the destination is not simply ahead.
/// Batches already applied stay committed.
pub fn sync_stores(
    identity: &TeamIdentity,
    source: &dyn LedgerStore,
    destination: &dyn LedgerStore,
    batch_limit: usize,
) -> Result<SyncReport> {
    let batch_limit = batch_limit.max(1);
    let source = source.begin_read()?;
    let mut report = SyncReport::default();

    loop {
        let target = destination.snapshot()?;
        let blocks = next_batch(source.main_chain(), target.main_chain(), batch_limit, "main")?;
        if blocks.is_empty() {
            break;
        }
        let team_public_key = identity.initial_team_public_key();
        report.main_blocks += ingest_blocks(&team_public_key, destination, &blocks)?;
    }

    loop {
        let target = destination.snapshot()?;
        let blocks = next_batch(source.log_chain(), target.log_chain(), batch_limit, "log")?;
        if blocks.is_empty() {
            break;
        }
        report.log_blocks += ingest_log_blocks(identity, destination, &blocks)?;
    }

    if report != SyncReport::default() {
        info!(
            main_blocks = report.main_blocks,
            log_blocks = report.log_blocks,
            "synced stores"
        );
    }
    Ok(report)
}

/// The next blocks of `source` that `target` lacks. Empty when `target` is
/// level with or ahead of `source`.
fn next_batch(
    source: &Chain,
    target: &Chain,
    limit: usize,
    name: &'static str,
) -> Result<Vec<SignedMessage>> {
    let Some(head) = target.head() else {
        let Some(genesis) = source.genesis() else {
            return Ok(Vec::new());
        };
        let mut blocks = vec![genesis.clone()];
        blocks.extend(source.after(&genesis.hash(), limit - 1)?);
        return Ok(blocks);
    };

    if !source.contains(&head) {
        let target_is_ahead = source.head().map_or(true, |theirs| target.contains(&theirs));
        if target_is_ahead {
            return Ok(Vec::new());
        }
        return Err(ChainError::StoresDiverged { chain: name, head });
    }
    let blocks = source.after(&head, limit)?;
    debug!(chain = name, after = %head, count = blocks.len(), "sync batch");
    Ok(blocks)
}

/// Which chain a convergence check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Main,
    Log,
}

/// Which of the two compared stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

/// The result of comparing two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Same heads and the same folded state.
    Converged,
    /// One store is a strict prefix of the other; a sync will fix it.
    Behind {
        chain: ChainKind,
        lagging: Side,
        missing: usize,
    },
    /// The stores disagree in a way a sync cannot repair.
    Diverged { chain: ChainKind },
}

/// Compare two stores' chain heads and folded projections.
pub fn check_convergence(first: &dyn LedgerStore, second: &dyn LedgerStore) -> Result<Convergence> {
    let a = first.snapshot()?;
    let b = second.snapshot()?;

    for (kind, chain_a, chain_b) in [
        (ChainKind::Main, a.main_chain(), b.main_chain()),
        (ChainKind::Log, a.log_chain(), b.log_chain()),
    ] {
        if let Some(outcome) = compare_chains(kind, chain_a, chain_b)? {
            return Ok(outcome);
        }
    }

    if Projection::of(&a) != Projection::of(&b) {
        return Ok(Convergence::Diverged {
            chain: ChainKind::Main,
        });
    }
    if a.tracked_wrapped_to() != b.tracked_wrapped_to() {
        return Ok(Convergence::Diverged {
            chain: ChainKind::Log,
        });
    }
    Ok(Convergence::Converged)
}

fn compare_chains(kind: ChainKind, a: &Chain, b: &Chain) -> Result<Option<Convergence>> {
    let outcome = match (a.head(), b.head()) {
        (head_a, head_b) if head_a == head_b => None,
        (_, None) => Some(Convergence::Behind {
            chain: kind,
            lagging: Side::Second,
            missing: a.len(),
        }),
        (None, _) => Some(Convergence::Behind {
            chain: kind,
            lagging: Side::First,
            missing: b.len(),
        }),
        (Some(head_a), Some(head_b)) => {
            if a.contains(&head_b) {
                Some(Convergence::Behind {
                    chain: kind,
                    lagging: Side::Second,
                    missing: a.after(&head_b, usize::MAX)?.len(),
                })
            } else if b.contains(&head_a) {
                Some(Convergence::Behind {
                    chain: kind,
                    lagging: Side::First,
                    missing: b.after(&head_a, usize::MAX)?.len(),
                })
            } else {
                Some(Convergence::Diverged { chain: kind })
            }
        }
    };
    Ok(outcome)
}

/// The main-chain state folded from blocks.
#[derive(PartialEq)]
struct Projection<'a> {
    team: Option<&'a Team>,
    members: Vec<&'a Identity>,
    admins: Vec<&'a Identity>,
    invitations: &'a [Invitation],
    pinned_host_keys: Vec<&'a SshHostKey>,
}

impl<'a> Projection<'a> {
    fn of(state: &'a LedgerState) -> Self {
        Self {
            team: state.fetch_team().ok(),
            members: state.members().collect(),
            admins: state.admins().collect(),
            invitations: state.invitations(),
            pinned_host_keys: state.pinned_host_keys().collect(),
        }
    }
}
