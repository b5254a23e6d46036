//! Main-chain payloads: genesis, appended blocks and the operations they carry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::{Sha256Hash, SignPublicKey};
use crate::message::SignedMessage;
use crate::types::{BlockHash, BoxPublicKey};

/// The `main` message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MainChain {
    Read(ReadBlocksRequest),
    Create(GenesisBlock),
    Append(Block),
}

/// A request for main-chain blocks, answered by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBlocksRequest {
    pub team_pointer: TeamPointer,
    pub nonce: Bytes,
    pub token: Option<Box<SignedMessage>>,
}

/// Where a reader starts: the team's initial key (from genesis) or a known block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamPointer {
    PublicKey(SignPublicKey),
    LastBlockHash(BlockHash),
}

/// The first block of a team's main chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBlock {
    pub creator: Identity,
    pub team_info: TeamInfo,
}

/// An appended block: a link to its predecessor and one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub last_block_hash: BlockHash,
    pub operation: Operation,
}

/// Every state transition a main-chain block can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Invite(Invitation),
    CloseInvitations,
    AcceptInvite(Identity),
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

impl Operation {
    /// Short name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Invite(_) => "invite",
            Operation::CloseInvitations => "close_invitations",
            Operation::AcceptInvite(_) => "accept_invite",
            Operation::Leave => "leave",
            Operation::Promote(_) => "promote",
            Operation::Demote(_) => "demote",
            Operation::Remove(_) => "remove",
            Operation::SetPolicy(_) => "set_policy",
            Operation::SetTeamInfo(_) => "set_team_info",
            Operation::PinHostKey(_) => "pin_host_key",
            Operation::UnpinHostKey(_) => "unpin_host_key",
            Operation::AddLoggingEndpoint(_) => "add_logging_endpoint",
            Operation::RemoveLoggingEndpoint(_) => "remove_logging_endpoint",
        }
    }
}

/// An open invitation to join the team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invitation {
    /// Pre-authorizes one specific keypair and email.
    Direct {
        public_key: SignPublicKey,
        email: String,
    },
    /// Anyone holding the invite secret whose email satisfies `restriction`.
    ///
    /// The secret is sealed under a symmetric key; only that key's hash is
    /// published on the chain.
    Indirect {
        nonce_public_key: SignPublicKey,
        invite_symmetric_key_hash: Sha256Hash,
        invite_ciphertext: Bytes,
        restriction: Restriction,
    },
}

impl Invitation {
    /// The key that signs the acceptance of this invitation.
    pub fn public_key(&self) -> &SignPublicKey {
        match self {
            Invitation::Direct { public_key, .. } => public_key,
            Invitation::Indirect {
                nonce_public_key, ..
            } => nonce_public_key,
        }
    }

    /// Whether `identity`, accepting under `signer`, is allowed by this invitation.
    pub fn admits(&self, identity: &Identity, signer: &SignPublicKey) -> bool {
        match self {
            Invitation::Direct { public_key, email } => {
                public_key == &identity.public_key && email == &identity.email
            }
            Invitation::Indirect {
                nonce_public_key,
                restriction,
                ..
            } => nonce_public_key == signer && restriction.is_satisfied_by(&identity.email),
        }
    }
}

/// Who may accept an indirect invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    Domain(String),
    Emails(Vec<String>),
}

impl Restriction {
    pub fn is_satisfied_by(&self, email: &str) -> bool {
        match self {
            Restriction::Domain(domain) => email_domain(email) == Some(domain.as_str()),
            Restriction::Emails(emails) => emails.iter().any(|e| e == email),
        }
    }
}

/// The text after the last `@`, if there is one.
pub fn email_domain(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

/// The public identity of a team member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub public_key: SignPublicKey,
    pub encryption_public_key: BoxPublicKey,
    pub email: String,
    pub ssh_public_key: Bytes,
    pub pgp_public_key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub temporary_approval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingEndpoint {
    CommandEncrypted,
}

/// A host key admins have pinned for every member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SshHostKey {
    pub host: String,
    pub public_key: Bytes,
}
