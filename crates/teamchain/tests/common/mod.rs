//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use teamchain::core::{Block, Body, Invitation, MainChain, Operation, SignedMessage, TeamInfo};
use teamchain::store::{LedgerState, LedgerStore, MemoryStore};
use teamchain::{ingest_blocks, MemberProfile, Result, TeamIdentity};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A team founded by `admin`, with its blocks in `store`.
pub struct TestTeam<S = MemoryStore> {
    pub admin: TeamIdentity,
    pub store: S,
}

impl TestTeam<MemoryStore> {
    pub fn new(name: &str) -> Self {
        Self::with_store(name, MemoryStore::new())
    }
}

impl<S: LedgerStore> TestTeam<S> {
    pub fn with_store(name: &str, store: S) -> Self {
        let (admin, genesis) = TeamIdentity::new_admin(
            MemberProfile::new("a@x.co"),
            TeamInfo { name: name.into() },
        )
        .unwrap();
        ingest_blocks(&admin.public_key(), &store, &[genesis]).unwrap();
        Self { admin, store }
    }

    pub fn state(&self) -> LedgerState {
        self.store.snapshot().unwrap()
    }

    /// A fresh identity pointed at this team.
    pub fn newcomer(&self, email: &str) -> TeamIdentity {
        TeamIdentity::new_member(
            MemberProfile::new(email),
            self.admin.checkpoint(),
            self.admin.initial_team_public_key(),
        )
    }

    /// Sign `operation` on top of the current head.
    pub fn block(&self, signer: &TeamIdentity, operation: Operation) -> SignedMessage {
        let last_block_hash = self.state().last_block_hash().unwrap();
        signer
            .sign_body(Body::Main(MainChain::Append(Block {
                last_block_hash,
                operation,
            })))
            .unwrap()
    }

    pub fn ingest(&self, block: SignedMessage) -> Result<usize> {
        ingest_blocks(&self.admin.initial_team_public_key(), &self.store, &[block])
    }

    /// Sign and apply, panicking on rejection.
    pub fn apply(&self, signer: &TeamIdentity, operation: Operation) -> SignedMessage {
        let block = self.block(signer, operation);
        self.ingest(block.clone()).unwrap();
        block
    }

    /// Invite `email` directly and accept as a fresh member.
    pub fn add_member(&self, email: &str) -> TeamIdentity {
        let member = self.newcomer(email);
        self.apply(
            &self.admin,
            Operation::Invite(Invitation::Direct {
                public_key: member.public_key(),
                email: email.into(),
            }),
        );
        self.apply(&member, Operation::AcceptInvite(member.identity()));
        member
    }

    pub fn add_admin(&self, email: &str) -> TeamIdentity {
        let member = self.add_member(email);
        self.apply(&self.admin, Operation::Promote(member.public_key()));
        member
    }
}
