//! The ledger state: both chains, the projections folded from them, and
//! the unsent audit-log queue.
//!
//! All mutation goes through [`Change`], so a transaction is nothing more
//! than a base snapshot plus a journal of changes. Stores commit a journal
//! by re-applying it to their latest state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use bytes::Bytes;

use teamchain_core::{
    BlockHash, BoxPublicKey, Identity, Invitation, Sha256Hash, SignPublicKey, SignedMessage,
    SshHostKey, Team,
};
use teamchain_seal::EncryptionKey;

use crate::error::{Result, StoreError};

/// A block plus its neighbours in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainLink {
    pub block: SignedMessage,
    pub previous: Option<BlockHash>,
    pub next: Option<BlockHash>,
}

/// A hash-linked list stored as an arena keyed by block hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    links: HashMap<BlockHash, ChainLink>,
    genesis: Option<BlockHash>,
    head: Option<BlockHash>,
}

impl Chain {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn head(&self) -> Option<BlockHash> {
        self.head
    }

    pub fn genesis(&self) -> Option<&SignedMessage> {
        self.genesis
            .and_then(|hash| self.links.get(&hash))
            .map(|link| &link.block)
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.links.contains_key(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Option<&SignedMessage> {
        self.links.get(hash).map(|link| &link.block)
    }

    pub fn link(&self, hash: &BlockHash) -> Option<&ChainLink> {
        self.links.get(hash)
    }

    /// Link `block` after the current head. The first block becomes genesis.
    pub fn append(&mut self, block: SignedMessage) -> Result<BlockHash> {
        let hash = block.hash();
        if self.links.contains_key(&hash) {
            return Err(StoreError::BlockAlreadyExists(hash.to_hex()));
        }

        let previous = self.head;
        if let Some(prev) = previous.and_then(|p| self.links.get_mut(&p)) {
            prev.next = Some(hash);
        }
        self.links.insert(
            hash,
            ChainLink {
                block,
                previous,
                next: None,
            },
        );
        if self.genesis.is_none() {
            self.genesis = Some(hash);
        }
        self.head = Some(hash);
        Ok(hash)
    }

    /// Blocks from genesis to head.
    pub fn iter(&self) -> impl Iterator<Item = &SignedMessage> + '_ {
        let mut cursor = self.genesis;
        std::iter::from_fn(move || {
            let link = self.links.get(&cursor?)?;
            cursor = link.next;
            Some(&link.block)
        })
    }

    /// Up to `limit` blocks strictly after `hash`.
    pub fn after(&self, hash: &BlockHash, limit: usize) -> Result<Vec<SignedMessage>> {
        let start = self
            .links
            .get(hash)
            .ok_or_else(|| StoreError::UnknownBlock(hash.to_hex()))?;

        let mut out = Vec::new();
        let mut cursor = start.next;
        while let Some(link) = cursor.and_then(|h| self.links.get(&h)) {
            if out.len() >= limit {
                break;
            }
            out.push(link.block.clone());
            cursor = link.next;
        }
        Ok(out)
    }
}

/// A current or former team member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub identity: Identity,
    pub is_admin: bool,
}

/// An audit-log entry waiting to be encrypted onto the log chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsentAuditLog {
    pub seq: u64,
    pub data: Bytes,
    /// Unix seconds.
    pub date: u64,
    pub data_hash: Sha256Hash,
}

/// Which part of the state a change writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Main chain and every projection folded from it.
    Main,
    /// Log chain, log key and tracked recipients.
    Log,
    /// The unsent audit-log queue. Writes here commute.
    Queue,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Main => "main",
            Domain::Log => "log",
            Domain::Queue => "queue",
        }
    }

    /// Whether concurrent writes to this domain conflict.
    pub fn is_guarded(&self) -> bool {
        !matches!(self, Domain::Queue)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-domain generation counters, bumped by every commit that writes the domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Versions {
    pub main: u64,
    pub log: u64,
    pub queue: u64,
}

impl Versions {
    pub fn get(&self, domain: Domain) -> u64 {
        match domain {
            Domain::Main => self.main,
            Domain::Log => self.log,
            Domain::Queue => self.queue,
        }
    }

    fn bump(&mut self, domain: Domain) {
        match domain {
            Domain::Main => self.main += 1,
            Domain::Log => self.log += 1,
            Domain::Queue => self.queue += 1,
        }
    }
}

/// One buffered mutation.
#[derive(Debug, Clone)]
pub enum Change {
    CreateTeam {
        team: Team,
        creator: Identity,
        block: SignedMessage,
    },
    AppendBlock(SignedMessage),
    SetTeam(Team),
    AddMember(Identity),
    RemoveMember(SignPublicKey),
    AddAdmin(SignPublicKey),
    RemoveAdmin(SignPublicKey),
    AddInvitation(Invitation),
    RemoveDirectInvitations(SignPublicKey),
    RemoveAllInvitations,
    PinHostKey(SshHostKey),
    UnpinHostKey(SshHostKey),
    AppendLogBlock(SignedMessage),
    SetLogEncryptionKey(EncryptionKey),
    SetTrackedWrappedTo(BTreeSet<BoxPublicKey>),
    EnqueueAuditLog { data: Bytes, date: u64 },
    MarkAuditLogSent(Sha256Hash),
    ClearUnsentAuditLogs,
}

impl Change {
    pub fn domain(&self) -> Domain {
        match self {
            Change::CreateTeam { .. }
            | Change::AppendBlock(_)
            | Change::SetTeam(_)
            | Change::AddMember(_)
            | Change::RemoveMember(_)
            | Change::AddAdmin(_)
            | Change::RemoveAdmin(_)
            | Change::AddInvitation(_)
            | Change::RemoveDirectInvitations(_)
            | Change::RemoveAllInvitations
            | Change::PinHostKey(_)
            | Change::UnpinHostKey(_)
            | Change::ClearUnsentAuditLogs => Domain::Main,
            Change::AppendLogBlock(_)
            | Change::SetLogEncryptionKey(_)
            | Change::SetTrackedWrappedTo(_) => Domain::Log,
            Change::EnqueueAuditLog { .. } | Change::MarkAuditLogSent(_) => Domain::Queue,
        }
    }
}

/// Everything a store holds for one team identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    pub(crate) main: Chain,
    pub(crate) log: Chain,
    pub(crate) team: Option<Team>,
    pub(crate) members: BTreeMap<SignPublicKey, Member>,
    pub(crate) removed_members: BTreeMap<SignPublicKey, Identity>,
    pub(crate) invitations: Vec<Invitation>,
    pub(crate) pinned_host_keys: BTreeSet<SshHostKey>,
    pub(crate) log_encryption_key: Option<EncryptionKey>,
    pub(crate) tracked_wrapped_to: BTreeSet<BoxPublicKey>,
    pub(crate) unsent_audit_logs: BTreeMap<u64, UnsentAuditLog>,
    pub(crate) next_audit_seq: u64,
    pub(crate) versions: Versions,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versions(&self) -> Versions {
        self.versions
    }

    // Main chain

    pub fn fetch_team(&self) -> Result<&Team> {
        self.team.as_ref().ok_or(StoreError::NoTeam)
    }

    pub fn main_chain(&self) -> &Chain {
        &self.main
    }

    pub fn main_genesis_block(&self) -> Result<&SignedMessage> {
        self.main.genesis().ok_or(StoreError::NoGenesisBlock)
    }

    pub fn all_blocks(&self) -> Vec<SignedMessage> {
        self.main.iter().cloned().collect()
    }

    pub fn has_block(&self, hash: &BlockHash) -> bool {
        self.main.contains(hash)
    }

    pub fn block(&self, hash: &BlockHash) -> Option<&SignedMessage> {
        self.main.get(hash)
    }

    pub fn blocks_after(&self, hash: &BlockHash, limit: usize) -> Result<Vec<SignedMessage>> {
        self.main.after(hash, limit)
    }

    pub fn last_block_hash(&self) -> Option<BlockHash> {
        self.main.head()
    }

    // Log chain

    pub fn log_chain(&self) -> &Chain {
        &self.log
    }

    pub fn log_genesis_block(&self) -> Result<&SignedMessage> {
        self.log.genesis().ok_or(StoreError::NoLogGenesisBlock)
    }

    pub fn all_log_blocks(&self) -> Vec<SignedMessage> {
        self.log.iter().cloned().collect()
    }

    pub fn has_log_block(&self, hash: &BlockHash) -> bool {
        self.log.contains(hash)
    }

    pub fn log_block(&self, hash: &BlockHash) -> Option<&SignedMessage> {
        self.log.get(hash)
    }

    pub fn log_blocks_after(&self, hash: &BlockHash, limit: usize) -> Result<Vec<SignedMessage>> {
        self.log.after(hash, limit)
    }

    pub fn last_log_block_hash(&self) -> Option<BlockHash> {
        self.log.head()
    }

    pub fn log_encryption_key(&self) -> Option<&EncryptionKey> {
        self.log_encryption_key.as_ref()
    }

    /// Box keys the current log key has been wrapped to.
    pub fn tracked_wrapped_to(&self) -> &BTreeSet<BoxPublicKey> {
        &self.tracked_wrapped_to
    }

    // Members

    pub fn members(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.members.values().map(|m| &m.identity)
    }

    pub fn admins(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.members
            .values()
            .filter(|m| m.is_admin)
            .map(|m| &m.identity)
    }

    pub fn member_identity(&self, public_key: &SignPublicKey) -> Option<&Identity> {
        self.members.get(public_key).map(|m| &m.identity)
    }

    pub fn member_with_email(&self, email: &str) -> Option<&Identity> {
        self.members().find(|identity| identity.email == email)
    }

    pub fn removed_member_identity(&self, public_key: &SignPublicKey) -> Option<&Identity> {
        self.removed_members.get(public_key)
    }

    pub fn is_member(&self, public_key: &SignPublicKey) -> bool {
        self.members.contains_key(public_key)
    }

    pub fn is_admin(&self, public_key: &SignPublicKey) -> bool {
        self.members.get(public_key).is_some_and(|m| m.is_admin)
    }

    // Invitations

    pub fn invitations(&self) -> &[Invitation] {
        &self.invitations
    }

    /// Open invitations acceptable under `public_key`: direct invites for
    /// that key, and indirect invites whose nonce key it is.
    pub fn invitations_for(&self, public_key: &SignPublicKey) -> Vec<&Invitation> {
        self.invitations
            .iter()
            .filter(|invite| invite.public_key() == public_key)
            .collect()
    }

    // Host keys

    pub fn pinned_host_keys(&self) -> impl Iterator<Item = &SshHostKey> + '_ {
        self.pinned_host_keys.iter()
    }

    pub fn is_pinned(&self, host_key: &SshHostKey) -> bool {
        self.pinned_host_keys.contains(host_key)
    }

    /// `Ok(false)` if `host` is not pinned, `Ok(true)` if `public_key` is
    /// one of its pinned keys, [`StoreError::HostMismatch`] otherwise.
    pub fn check_host_key(&self, host: &str, public_key: &[u8]) -> Result<bool> {
        let pinned: Vec<&SshHostKey> = self
            .pinned_host_keys
            .iter()
            .filter(|k| k.host == host)
            .collect();

        if pinned.is_empty() {
            return Ok(false);
        }
        if pinned.iter().any(|k| k.public_key.as_ref() == public_key) {
            return Ok(true);
        }
        Err(StoreError::HostMismatch {
            host: host.to_string(),
            expected: pinned.iter().map(|k| hex_prefix(&k.public_key)).collect(),
        })
    }

    // Audit-log queue

    pub fn next_unsent_audit_log(&self) -> Option<&UnsentAuditLog> {
        self.unsent_audit_logs.values().next()
    }

    pub fn unsent_audit_logs(&self) -> impl Iterator<Item = &UnsentAuditLog> + '_ {
        self.unsent_audit_logs.values()
    }

    // Mutation

    /// Apply one change in place.
    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::CreateTeam {
                team,
                creator,
                block,
            } => {
                if !self.main.is_empty() || self.team.is_some() {
                    return Err(StoreError::TeamAlreadyExists);
                }
                self.main.append(block.clone())?;
                self.team = Some(team.clone());
                self.members.insert(
                    creator.public_key,
                    Member {
                        identity: creator.clone(),
                        is_admin: true,
                    },
                );
            }
            Change::AppendBlock(block) => {
                if self.main.is_empty() {
                    return Err(StoreError::NoGenesisBlock);
                }
                self.main.append(block.clone())?;
            }
            Change::SetTeam(team) => {
                let current = self.team.as_mut().ok_or(StoreError::NoTeam)?;
                *current = team.clone();
            }
            Change::AddMember(identity) => {
                if self.members.contains_key(&identity.public_key) {
                    return Err(StoreError::MemberAlreadyExists);
                }
                self.removed_members.remove(&identity.public_key);
                self.members.insert(
                    identity.public_key,
                    Member {
                        identity: identity.clone(),
                        is_admin: false,
                    },
                );
            }
            Change::RemoveMember(public_key) => {
                let member = self
                    .members
                    .remove(public_key)
                    .ok_or(StoreError::NoSuchMember)?;
                self.removed_members.insert(*public_key, member.identity);
            }
            Change::AddAdmin(public_key) => {
                self.members
                    .get_mut(public_key)
                    .ok_or(StoreError::ProspectiveAdminIsNotMember)?
                    .is_admin = true;
            }
            Change::RemoveAdmin(public_key) => {
                self.members
                    .get_mut(public_key)
                    .ok_or(StoreError::NoSuchMember)?
                    .is_admin = false;
            }
            Change::AddInvitation(invitation) => {
                self.invitations.push(invitation.clone());
            }
            Change::RemoveDirectInvitations(public_key) => {
                self.invitations.retain(|invite| {
                    !matches!(invite, Invitation::Direct { public_key: pk, .. } if pk == public_key)
                });
            }
            Change::RemoveAllInvitations => {
                self.invitations.clear();
            }
            Change::PinHostKey(host_key) => {
                self.pinned_host_keys.insert(host_key.clone());
            }
            Change::UnpinHostKey(host_key) => {
                self.pinned_host_keys.remove(host_key);
            }
            Change::AppendLogBlock(block) => {
                self.log.append(block.clone())?;
            }
            Change::SetLogEncryptionKey(key) => {
                self.log_encryption_key = Some(key.clone());
            }
            Change::SetTrackedWrappedTo(recipients) => {
                self.tracked_wrapped_to = recipients.clone();
            }
            Change::EnqueueAuditLog { data, date } => {
                let seq = self.next_audit_seq;
                self.next_audit_seq += 1;
                self.unsent_audit_logs.insert(
                    seq,
                    UnsentAuditLog {
                        seq,
                        data: data.clone(),
                        date: *date,
                        data_hash: Sha256Hash::hash(data),
                    },
                );
            }
            Change::MarkAuditLogSent(data_hash) => {
                let seq = self
                    .unsent_audit_logs
                    .values()
                    .find(|entry| &entry.data_hash == data_hash)
                    .map(|entry| entry.seq);
                if let Some(seq) = seq {
                    self.unsent_audit_logs.remove(&seq);
                }
            }
            Change::ClearUnsentAuditLogs => {
                self.unsent_audit_logs.clear();
            }
        }
        Ok(())
    }

    /// Fail with [`StoreError::Conflict`] if `changes` write a guarded
    /// domain that moved since `base`.
    pub fn check_versions(&self, base: Versions, changes: &[Change]) -> Result<()> {
        for change in changes {
            let domain = change.domain();
            if domain.is_guarded() && self.versions.get(domain) != base.get(domain) {
                return Err(StoreError::Conflict { domain });
            }
        }
        Ok(())
    }

    /// Apply a committed journal and bump the version of every domain it wrote.
    pub fn apply_journal(&mut self, changes: &[Change]) -> Result<()> {
        for change in changes {
            self.apply(change)?;
        }
        self.bump_versions(changes);
        Ok(())
    }

    pub(crate) fn bump_versions(&mut self, changes: &[Change]) {
        let mut touched = Vec::new();
        for change in changes {
            let domain = change.domain();
            if !touched.contains(&domain) {
                touched.push(domain);
            }
        }
        for domain in touched {
            self.versions.bump(domain);
        }
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    hex.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamchain_core::{
        Body, GenesisBlock, Keypair, LoggingEndpoint, MainChain, Message, TeamInfo,
    };

    fn identity(keypair: &Keypair, email: &str) -> Identity {
        Identity {
            public_key: keypair.public_key(),
            encryption_public_key: BoxPublicKey::from_bytes(keypair.public_key().0),
            email: email.into(),
            ssh_public_key: Bytes::new(),
            pgp_public_key: Bytes::new(),
        }
    }

    fn signed(keypair: &Keypair, time: u64) -> SignedMessage {
        let body = Body::Main(MainChain::Create(GenesisBlock {
            creator: identity(keypair, "a@x.co"),
            team_info: TeamInfo { name: "t".into() },
        }));
        SignedMessage::sign(&Message::at(body, time), keypair).unwrap()
    }

    fn state_with_team() -> (LedgerState, Keypair) {
        let admin = Keypair::from_seed(&[1; 32]);
        let mut state = LedgerState::new();
        state
            .apply(&Change::CreateTeam {
                team: Team::new(TeamInfo { name: "t".into() }),
                creator: identity(&admin, "a@x.co"),
                block: signed(&admin, 0),
            })
            .unwrap();
        (state, admin)
    }

    #[test]
    fn test_chain_links_and_iteration() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let mut chain = Chain::default();
        let blocks: Vec<_> = (0..4).map(|t| signed(&keypair, t)).collect();
        let hashes: Vec<_> = blocks
            .iter()
            .map(|b| chain.append(b.clone()).unwrap())
            .collect();

        assert_eq!(chain.len(), 4);
        assert_eq!(chain.head(), Some(hashes[3]));
        assert_eq!(chain.genesis(), Some(&blocks[0]));
        assert_eq!(chain.iter().cloned().collect::<Vec<_>>(), blocks);
        assert_eq!(chain.link(&hashes[2]).unwrap().previous, Some(hashes[1]));

        let after = chain.after(&hashes[0], 2).unwrap();
        assert_eq!(after, blocks[1..3].to_vec());
        assert!(chain.after(&hashes[3], 10).unwrap().is_empty());
    }

    #[test]
    fn test_chain_rejects_duplicate_and_unknown() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let mut chain = Chain::default();
        let block = signed(&keypair, 0);
        chain.append(block.clone()).unwrap();

        assert!(matches!(
            chain.append(block),
            Err(StoreError::BlockAlreadyExists(_))
        ));
        assert!(matches!(
            chain.after(&BlockHash::from_bytes([9; 32]), 1),
            Err(StoreError::UnknownBlock(_))
        ));
    }

    #[test]
    fn test_create_team_makes_creator_admin() {
        let (state, admin) = state_with_team();
        assert!(state.is_admin(&admin.public_key()));
        assert_eq!(state.fetch_team().unwrap().info.name, "t");
        assert!(state.main_genesis_block().is_ok());
        assert!(matches!(
            state.log_genesis_block(),
            Err(StoreError::NoLogGenesisBlock)
        ));
    }

    #[test]
    fn test_member_lifecycle() {
        let (mut state, _) = state_with_team();
        let bob = Keypair::from_seed(&[2; 32]);
        let bob_identity = identity(&bob, "b@x.co");

        state.apply(&Change::AddMember(bob_identity.clone())).unwrap();
        assert!(matches!(
            state.apply(&Change::AddMember(bob_identity.clone())),
            Err(StoreError::MemberAlreadyExists)
        ));
        assert_eq!(state.member_with_email("b@x.co"), Some(&bob_identity));

        state.apply(&Change::AddAdmin(bob.public_key())).unwrap();
        assert_eq!(state.admins().count(), 2);

        state.apply(&Change::RemoveMember(bob.public_key())).unwrap();
        assert!(!state.is_member(&bob.public_key()));
        assert_eq!(
            state.removed_member_identity(&bob.public_key()),
            Some(&bob_identity)
        );
        assert!(matches!(
            state.apply(&Change::AddAdmin(bob.public_key())),
            Err(StoreError::ProspectiveAdminIsNotMember)
        ));
    }

    #[test]
    fn test_remove_direct_invitations_only() {
        let (mut state, _) = state_with_team();
        let key = SignPublicKey::from_bytes([5; 32]);
        state
            .apply(&Change::AddInvitation(Invitation::Direct {
                public_key: key,
                email: "b@x.co".into(),
            }))
            .unwrap();
        state
            .apply(&Change::AddInvitation(Invitation::Indirect {
                nonce_public_key: key,
                invite_symmetric_key_hash: Sha256Hash::hash(b"k"),
                invite_ciphertext: Bytes::new(),
                restriction: teamchain_core::Restriction::Domain("x.co".into()),
            }))
            .unwrap();
        assert_eq!(state.invitations_for(&key).len(), 2);

        state.apply(&Change::RemoveDirectInvitations(key)).unwrap();
        let left = state.invitations_for(&key);
        assert_eq!(left.len(), 1);
        assert!(matches!(left[0], Invitation::Indirect { .. }));
    }

    #[test]
    fn test_check_host_key() {
        let (mut state, _) = state_with_team();
        state
            .apply(&Change::PinHostKey(SshHostKey {
                host: "git.example.com".into(),
                public_key: Bytes::from_static(b"key-1"),
            }))
            .unwrap();

        assert!(!state.check_host_key("other.example.com", b"key-1").unwrap());
        assert!(state.check_host_key("git.example.com", b"key-1").unwrap());
        match state.check_host_key("git.example.com", b"key-2") {
            Err(StoreError::HostMismatch { host, expected }) => {
                assert_eq!(host, "git.example.com");
                assert_eq!(expected, vec![hex::encode(b"key-1")]);
            }
            other => panic!("expected host mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_audit_queue_is_fifo() {
        let mut state = LedgerState::new();
        for (i, data) in [&b"one"[..], &b"two"[..], &b"one"[..]].iter().enumerate() {
            state
                .apply(&Change::EnqueueAuditLog {
                    data: Bytes::copy_from_slice(data),
                    date: i as u64,
                })
                .unwrap();
        }
        assert_eq!(state.next_unsent_audit_log().unwrap().date, 0);

        // Marks only the oldest entry with that hash
        state
            .apply(&Change::MarkAuditLogSent(Sha256Hash::hash(b"one")))
            .unwrap();
        let dates: Vec<u64> = state.unsent_audit_logs().map(|e| e.date).collect();
        assert_eq!(dates, vec![1, 2]);

        state.apply(&Change::ClearUnsentAuditLogs).unwrap();
        assert!(state.next_unsent_audit_log().is_none());
    }

    #[test]
    fn test_journal_bumps_touched_domains_once() {
        let (mut state, _) = state_with_team();
        let before = state.versions();

        let mut team = state.fetch_team().unwrap().clone();
        team.logging_endpoints.insert(LoggingEndpoint::CommandEncrypted);
        let journal = vec![
            Change::SetTeam(team.clone()),
            Change::SetTeam(team),
            Change::EnqueueAuditLog {
                data: Bytes::from_static(b"x"),
                date: 0,
            },
        ];
        state.apply_journal(&journal).unwrap();

        let after = state.versions();
        assert_eq!(after.main, before.main + 1);
        assert_eq!(after.log, before.log);
        assert_eq!(after.queue, before.queue + 1);
    }

    #[test]
    fn test_check_versions_ignores_queue() {
        let (mut state, _) = state_with_team();
        let base = state.versions();
        state
            .apply_journal(&[Change::EnqueueAuditLog {
                data: Bytes::from_static(b"x"),
                date: 0,
            }])
            .unwrap();

        // A concurrent queue write does not conflict with anything
        state
            .check_versions(base, &[Change::RemoveAllInvitations])
            .unwrap();

        state
            .apply_journal(&[Change::RemoveAllInvitations])
            .unwrap();
        assert!(matches!(
            state.check_versions(base, &[Change::RemoveAllInvitations]),
            Err(StoreError::Conflict {
                domain: Domain::Main
            })
        ));
        state
            .check_versions(base, &[Change::SetTrackedWrappedTo(BTreeSet::new())])
            .unwrap();
    }
}
