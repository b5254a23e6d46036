//! Building signed blocks and requests from an identity and the local state.
//!
//! The verifier has the final word on every block; the checks here only
//! catch requests that could never be accepted, before they reach the
//! coordinator.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use teamchain_core::types::fixed_bytes;
use teamchain_core::{
    from_canonical_bytes, to_canonical_bytes, Block, BlockHash, Body, Invitation, Keypair,
    LogChain, LogChainGenesisPointer, LogChainPointer, LoggingEndpoint, LogsFilter, MainChain,
    Message, Operation, Policy, ReadBlocksRequest, ReadLogBlocksRequest, Restriction, Sha256Hash,
    SignPublicKey, SignedMessage, SshHostKey, TeamInfo, TeamPointer,
};
use teamchain_seal::EncryptionKey;
use teamchain_store::LedgerState;

use crate::error::{ChainError, Result};
use crate::identity::TeamIdentity;

const JOIN_TEAM_PATH: &str = "join_team/";

/// An operation a member can ask to append to the main chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestableOperation {
    DirectInvite {
        public_key: SignPublicKey,
        email: String,
    },
    /// Invite anyone satisfying the restriction; yields a join link.
    IndirectInvite(Restriction),
    CloseInvitations,
    Leave,
    Promote(SignPublicKey),
    Demote(SignPublicKey),
    Remove(SignPublicKey),
    SetPolicy(Policy),
    SetTeamInfo(TeamInfo),
    PinHostKey(SshHostKey),
    UnpinHostKey(SshHostKey),
    AddLoggingEndpoint(LoggingEndpoint),
    RemoveLoggingEndpoint(LoggingEndpoint),
}

/// What an indirect invite link unlocks: everything needed to find the
/// team and sign the acceptance with the invitation's nonce key.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct InviteSecret {
    #[zeroize(skip)]
    pub initial_team_public_key: SignPublicKey,
    #[zeroize(skip)]
    pub last_block_hash: BlockHash,
    #[serde(with = "fixed_bytes")]
    pub nonce_keypair_seed: [u8; 32],
    #[zeroize(skip)]
    pub restriction: Restriction,
}

impl std::fmt::Debug for InviteSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteSecret")
            .field("initial_team_public_key", &self.initial_team_public_key)
            .field("last_block_hash", &self.last_block_hash)
            .field("restriction", &self.restriction)
            .finish_non_exhaustive()
    }
}

/// Sign the block for `request` on top of `state`'s head.
///
/// Indirect invites also return the join link to hand to invitees.
pub fn signed_message_for(
    identity: &TeamIdentity,
    state: &LedgerState,
    request: RequestableOperation,
    app_url_scheme: &str,
) -> Result<(SignedMessage, Option<String>)> {
    let last_block_hash = state.last_block_hash().ok_or(ChainError::NoBlockHash)?;
    let mut link = None;

    let operation = match request {
        RequestableOperation::DirectInvite { public_key, email } => {
            Operation::Invite(Invitation::Direct { public_key, email })
        }
        RequestableOperation::IndirectInvite(restriction) => {
            let (invitation, join_link) =
                indirect_invitation(identity, last_block_hash, restriction, app_url_scheme)?;
            link = Some(join_link);
            Operation::Invite(invitation)
        }
        RequestableOperation::CloseInvitations => Operation::CloseInvitations,
        RequestableOperation::Leave => Operation::Leave,
        RequestableOperation::Promote(public_key) => {
            if !state.is_member(&public_key) {
                return Err(ChainError::NoSuchMember);
            }
            Operation::Promote(public_key)
        }
        RequestableOperation::Demote(public_key) => {
            if !state.is_admin(&public_key) {
                return Err(ChainError::NoSuchAdmin);
            }
            Operation::Demote(public_key)
        }
        RequestableOperation::Remove(public_key) => {
            if !state.is_member(&public_key) {
                return Err(ChainError::NoSuchMember);
            }
            Operation::Remove(public_key)
        }
        RequestableOperation::SetPolicy(policy) => Operation::SetPolicy(policy),
        RequestableOperation::SetTeamInfo(info) => Operation::SetTeamInfo(info),
        RequestableOperation::PinHostKey(host_key) => Operation::PinHostKey(host_key),
        RequestableOperation::UnpinHostKey(host_key) => {
            if !state.is_pinned(&host_key) {
                return Err(ChainError::NoSuchPinnedHostKey);
            }
            Operation::UnpinHostKey(host_key)
        }
        RequestableOperation::AddLoggingEndpoint(endpoint) => {
            Operation::AddLoggingEndpoint(endpoint)
        }
        RequestableOperation::RemoveLoggingEndpoint(endpoint) => {
            if !state.fetch_team()?.logging_endpoints.contains(&endpoint) {
                return Err(ChainError::NoSuchLoggingEndpoint);
            }
            Operation::RemoveLoggingEndpoint(endpoint)
        }
    };

    debug!(op = operation.name(), head = %last_block_hash, "signing main-chain block");
    let block = identity.sign_body(Body::Main(MainChain::Append(Block {
        last_block_hash,
        operation,
    })))?;
    Ok((block, link))
}

fn indirect_invitation(
    identity: &TeamIdentity,
    last_block_hash: BlockHash,
    restriction: Restriction,
    app_url_scheme: &str,
) -> Result<(Invitation, String)> {
    let mut secret = InviteSecret {
        initial_team_public_key: identity.initial_team_public_key(),
        last_block_hash,
        nonce_keypair_seed: [0; 32],
        restriction: restriction.clone(),
    };
    rand::thread_rng().fill_bytes(&mut secret.nonce_keypair_seed);
    let nonce_public_key = Keypair::from_seed(&secret.nonce_keypair_seed).public_key();

    let key = EncryptionKey::generate();
    let ciphertext = key.seal(&to_canonical_bytes(&secret)?)?;

    let invitation = Invitation::Indirect {
        nonce_public_key,
        invite_symmetric_key_hash: Sha256Hash::hash(key.as_bytes()),
        invite_ciphertext: Bytes::from(ciphertext),
        restriction,
    };
    let link = format!(
        "{}{}{}",
        app_url_scheme,
        JOIN_TEAM_PATH,
        URL_SAFE_NO_PAD.encode(key.as_bytes())
    );
    Ok((invitation, link))
}

/// The symmetric key carried by a join link.
pub fn parse_invite_link(link: &str) -> Result<EncryptionKey> {
    let (_, encoded) = link
        .rsplit_once(JOIN_TEAM_PATH)
        .ok_or_else(|| ChainError::InvalidInviteLink("missing join_team path".into()))?;
    let bytes = zeroize::Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('/'))
            .map_err(|e| ChainError::InvalidInviteLink(e.to_string()))?,
    );
    EncryptionKey::from_slice(&bytes).map_err(|e| ChainError::InvalidInviteLink(e.to_string()))
}

/// Find the indirect invitation `link` unlocks and open its secret.
pub fn open_invite_link(link: &str, state: &LedgerState) -> Result<(InviteSecret, SignPublicKey)> {
    let key = parse_invite_link(link)?;
    let key_hash = Sha256Hash::hash(key.as_bytes());

    let (nonce_public_key, ciphertext) = state
        .invitations()
        .iter()
        .find_map(|invitation| match invitation {
            Invitation::Indirect {
                nonce_public_key,
                invite_symmetric_key_hash,
                invite_ciphertext,
                ..
            } if *invite_symmetric_key_hash == key_hash => {
                Some((*nonce_public_key, invite_ciphertext))
            }
            _ => None,
        })
        .ok_or(ChainError::NoMatchingInvitation)?;

    let plaintext = zeroize::Zeroizing::new(
        key.open(ciphertext)
            .map_err(|_| ChainError::InvalidInviteLink("invite secret does not open".into()))?,
    );
    let secret: InviteSecret = from_canonical_bytes(&plaintext)?;
    Ok((secret, nonce_public_key))
}

/// Accept a direct invitation addressed to this identity's own key.
pub fn accept_direct_invite(identity: &TeamIdentity, state: &LedgerState) -> Result<SignedMessage> {
    let last_block_hash = state.last_block_hash().ok_or(ChainError::NoBlockHash)?;
    let public_key = identity.public_key();
    let invited = state.invitations().iter().any(|invitation| {
        matches!(invitation, Invitation::Direct { public_key: pk, .. } if *pk == public_key)
    });
    if !invited {
        return Err(ChainError::NoMatchingInvitation);
    }

    identity.sign_body(Body::Main(MainChain::Append(Block {
        last_block_hash,
        operation: Operation::AcceptInvite(identity.identity()),
    })))
}

/// Accept the indirect invitation behind `link`, signing with its nonce key.
pub fn accept_indirect_invite(
    identity: &TeamIdentity,
    link: &str,
    state: &LedgerState,
) -> Result<SignedMessage> {
    let last_block_hash = state.last_block_hash().ok_or(ChainError::NoBlockHash)?;
    let (secret, nonce_public_key) = open_invite_link(link, state)?;

    if secret.initial_team_public_key != identity.initial_team_public_key() {
        return Err(ChainError::TeamPublicKeyMismatch);
    }
    let nonce = Keypair::from_seed(&secret.nonce_keypair_seed);
    if nonce.public_key() != nonce_public_key {
        return Err(ChainError::InvalidInviteLink("nonce key mismatch".into()));
    }

    let message = Message::new(Body::Main(MainChain::Append(Block {
        last_block_hash,
        operation: Operation::AcceptInvite(identity.identity()),
    })));
    Ok(SignedMessage::sign(&message, &nonce)?)
}

/// A signed request for main-chain blocks after `state`'s head, or from
/// genesis when the store is empty.
pub fn read_blocks_request(identity: &TeamIdentity, state: &LedgerState) -> Result<SignedMessage> {
    let team_pointer = match state.last_block_hash() {
        Some(hash) => TeamPointer::LastBlockHash(hash),
        None => TeamPointer::PublicKey(identity.initial_team_public_key()),
    };
    identity.sign_body(Body::Main(MainChain::Read(ReadBlocksRequest {
        team_pointer,
        nonce: random_nonce(),
        token: None,
    })))
}

/// A signed request for this identity's own log blocks after `state`'s log head.
pub fn read_log_blocks_request(
    identity: &TeamIdentity,
    state: &LedgerState,
) -> Result<SignedMessage> {
    let pointer = match state.last_log_block_hash() {
        Some(hash) => LogChainPointer::LastBlockHash(hash),
        None => LogChainPointer::GenesisBlock(LogChainGenesisPointer {
            team_public_key: identity.initial_team_public_key(),
            member_public_key: identity.public_key(),
        }),
    };
    identity.sign_body(Body::Log(LogChain::Read(ReadLogBlocksRequest {
        nonce: random_nonce(),
        filter: LogsFilter::Member(pointer),
    })))
}

fn random_nonce() -> Bytes {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    Bytes::copy_from_slice(&nonce)
}
