//! Main-chain verification: folding signed blocks into the team state.
//!
//! Blocks arrive from untrusted parties. Each one is decoded, checked
//! against the current head, authorized against the current membership and
//! signature-verified before its operation touches the store.

use tracing::{debug, info, warn};

use teamchain_core::{
    Block, Body, GenesisBlock, Invitation, MainChain, Message, Operation, Restriction,
    SignPublicKey, SignedMessage, Team, PROTOCOL_VERSION,
};
use teamchain_store::{LedgerStore, StoreExt, Transaction};

use crate::error::{ChainError, Result};

/// Verify `blocks` in order and apply them to `txn`.
///
/// `blocks` must start right after the transaction's current head (or at
/// genesis for an empty store). Each block is applied under its own
/// savepoint: on failure the failing block's changes are rolled back,
/// earlier blocks stay in the transaction, and the error is returned.
/// Returns the number of blocks applied.
pub fn verify_and_process_blocks(
    team_public_key: &SignPublicKey,
    txn: &mut Transaction<'_>,
    blocks: &[SignedMessage],
) -> Result<usize> {
    for (applied, block) in blocks.iter().enumerate() {
        let savepoint = txn.savepoint();
        if let Err(e) = process_block(team_public_key, txn, block) {
            warn!(block = %block.hash(), applied, error = %e, "rejected main-chain block");
            txn.rollback_to(savepoint)?;
            return Err(e);
        }
    }
    Ok(blocks.len())
}

/// Verify `blocks` and commit them in one transaction.
///
/// Blocks verified before a failure are committed before the error is
/// returned, so the caller only needs to re-fetch the remainder.
pub fn ingest_blocks(
    team_public_key: &SignPublicKey,
    store: &dyn LedgerStore,
    blocks: &[SignedMessage],
) -> Result<usize> {
    let mut txn = store.begin()?;
    let result = verify_and_process_blocks(team_public_key, &mut txn, blocks);
    txn.commit()?;
    result
}

fn process_block(
    team_public_key: &SignPublicKey,
    txn: &mut Transaction<'_>,
    block: &SignedMessage,
) -> Result<()> {
    let message = block.decode()?;
    check_version(&message)?;

    if txn.last_block_hash().is_none() {
        let genesis = match message.body {
            Body::Main(MainChain::Create(genesis)) => genesis,
            _ => return Err(ChainError::MissingCreateChain),
        };
        return process_genesis(team_public_key, txn, block, genesis);
    }

    let Block {
        last_block_hash,
        operation,
    } = match message.body {
        Body::Main(MainChain::Append(append)) => append,
        _ => return Err(ChainError::UnexpectedBlock),
    };

    let signer = block.public_key;
    let authorizing_key = authorizing_key(txn, &signer, &operation)?;

    let head = txn.last_block_hash();
    if head != Some(last_block_hash) {
        return Err(ChainError::BadBlockHash { expected: head });
    }
    block
        .verify_with(&authorizing_key)
        .map_err(|_| ChainError::BadSignature)?;

    apply_operation(txn, &signer, &operation)?;
    txn.append_block(block.clone())?;

    debug!(
        op = operation.name(),
        block = %block.hash(),
        signer = %signer,
        "accepted main-chain block"
    );
    Ok(())
}

fn check_version(message: &Message) -> Result<()> {
    let version = message.header.protocol_version;
    if version.is_major_upgrade_from(&PROTOCOL_VERSION) {
        return Err(ChainError::MajorVersionIncompatible(version));
    }
    Ok(())
}

fn process_genesis(
    team_public_key: &SignPublicKey,
    txn: &mut Transaction<'_>,
    block: &SignedMessage,
    genesis: GenesisBlock,
) -> Result<()> {
    if block.public_key != *team_public_key {
        return Err(ChainError::TeamPublicKeyMismatch);
    }
    block
        .verify_with(team_public_key)
        .map_err(|_| ChainError::BadSignature)?;
    if genesis.creator.public_key != *team_public_key {
        return Err(ChainError::TeamPublicKeyMismatch);
    }

    let name = genesis.team_info.name.clone();
    txn.create_team(Team::new(genesis.team_info), genesis.creator, block.clone())?;

    info!(team = %name, genesis = %block.hash(), "accepted team genesis");
    Ok(())
}

/// The key whose signature authorizes `operation` from `signer`.
fn authorizing_key(
    txn: &Transaction<'_>,
    signer: &SignPublicKey,
    operation: &Operation,
) -> Result<SignPublicKey> {
    match operation {
        Operation::AcceptInvite(identity) => txn
            .invitations()
            .iter()
            .find(|invitation| invitation.admits(identity, signer))
            .map(|invitation| *invitation.public_key())
            .ok_or(ChainError::UnknownAcceptBlockPublicKey),
        Operation::Leave => Ok(*signer),
        _ => {
            if txn.is_admin(signer) {
                Ok(*signer)
            } else {
                Err(ChainError::SignerNotAdmin)
            }
        }
    }
}

fn apply_operation(
    txn: &mut Transaction<'_>,
    signer: &SignPublicKey,
    operation: &Operation,
) -> Result<()> {
    match operation {
        Operation::Invite(invitation) => {
            check_invitation(txn, invitation)?;
            txn.add_invitation(invitation.clone())?;
        }
        Operation::CloseInvitations => {
            txn.remove_all_invitations()?;
        }
        Operation::AcceptInvite(identity) => {
            if txn.member_with_email(&identity.email).is_some() {
                return Err(ChainError::DuplicateEmailAddress);
            }
            if txn.is_member(&identity.public_key) {
                return Err(ChainError::MemberAlreadyExists);
            }
            txn.remove_direct_invitations(identity.public_key)?;
            txn.add_member(identity.clone())?;
        }
        Operation::Leave => {
            if !txn.is_member(signer) {
                return Err(ChainError::MemberDoesNotExist);
            }
            txn.remove_member(*signer)?;
        }
        Operation::Promote(public_key) => {
            if !txn.is_member(public_key) {
                return Err(ChainError::MemberDoesNotExist);
            }
            if txn.is_admin(public_key) {
                return Err(ChainError::MemberIsAlreadyAdmin);
            }
            txn.add_admin(*public_key)?;
        }
        Operation::Demote(public_key) => {
            if !txn.is_admin(public_key) {
                return Err(ChainError::MemberNotAdmin);
            }
            txn.remove_admin(*public_key)?;
        }
        Operation::Remove(public_key) => {
            if public_key == signer {
                return Err(ChainError::SignerCannotRemoveSelf);
            }
            if !txn.is_member(public_key) {
                return Err(ChainError::MemberDoesNotExist);
            }
            txn.remove_member(*public_key)?;
            txn.remove_all_invitations()?;
        }
        Operation::SetPolicy(policy) => {
            let mut team = txn.fetch_team()?.clone();
            team.policy = policy.clone();
            txn.set_team(team)?;
        }
        Operation::SetTeamInfo(info) => {
            let mut team = txn.fetch_team()?.clone();
            team.info = info.clone();
            txn.set_team(team)?;
        }
        Operation::PinHostKey(host_key) => {
            if txn.is_pinned(host_key) {
                return Err(ChainError::HostKeyAlreadyPinned);
            }
            txn.pin_host_key(host_key.clone())?;
        }
        Operation::UnpinHostKey(host_key) => {
            if !txn.is_pinned(host_key) {
                return Err(ChainError::HostKeyNotPinned);
            }
            txn.unpin_host_key(host_key.clone())?;
        }
        Operation::AddLoggingEndpoint(endpoint) => {
            let mut team = txn.fetch_team()?.clone();
            if !team.logging_endpoints.insert(*endpoint) {
                return Err(ChainError::LoggingEndpointAlreadyExists);
            }
            txn.set_team(team)?;
        }
        Operation::RemoveLoggingEndpoint(endpoint) => {
            let mut team = txn.fetch_team()?.clone();
            if !team.logging_endpoints.remove(endpoint) {
                return Err(ChainError::LoggingEndpointDoesNotExist);
            }
            txn.set_team(team)?;
            // Logging is off; queued entries will never be sent.
            txn.clear_unsent_audit_logs()?;
        }
    }
    Ok(())
}

fn check_invitation(txn: &Transaction<'_>, invitation: &Invitation) -> Result<()> {
    match invitation {
        Invitation::Direct { public_key, email } => {
            if txn.member_with_email(email).is_some() {
                return Err(ChainError::DirectInviteForExistingMemberEmail);
            }
            if txn.is_member(public_key) {
                return Err(ChainError::DirectInviteForExistingMemberPublicKey);
            }
        }
        Invitation::Indirect {
            restriction: Restriction::Emails(emails),
            ..
        } => {
            if emails.iter().any(|e| txn.member_with_email(e).is_some()) {
                return Err(ChainError::IndirectInviteForExistingMemberEmail);
            }
        }
        Invitation::Indirect { .. } => {}
    }

    let public_key = invitation.public_key();
    if txn.is_member(public_key) || !txn.invitations_for(public_key).is_empty() {
        return Err(ChainError::InvitePublicKeyAlreadyExists);
    }
    Ok(())
}
