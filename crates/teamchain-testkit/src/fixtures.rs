//! Test fixtures and helpers.
//!
//! Common setup code for tests and benchmarks: a founded team in a memory
//! store, plus helpers to grow its chain.

use teamchain::core::{
    Block, Body, Invitation, LoggingEndpoint, MainChain, Operation, SignedMessage, TeamInfo,
};
use teamchain::store::{LedgerState, LedgerStore, MemoryStore, StoreExt};
use crate::generators::MembershipStep;
use teamchain::{
    ingest_blocks, log_chain, next_log_block, verify_and_process_log_block, MemberProfile,
    Result, TeamIdentity,
};

/// A founded team: its first admin and a store holding the chain.
pub struct TeamFixture<S: LedgerStore = MemoryStore> {
    pub admin: TeamIdentity,
    pub store: S,
}

impl TeamFixture<MemoryStore> {
    /// Found a team named `name` in a fresh memory store.
    pub fn new(name: &str) -> Self {
        Self::with_store(name, MemoryStore::new())
    }
}

impl Default for TeamFixture<MemoryStore> {
    fn default() -> Self {
        Self::new("acme")
    }
}

impl<S: LedgerStore> TeamFixture<S> {
    /// Found a team in `store`.
    ///
    /// # Panics
    ///
    /// If the genesis block is rejected, which means `store` already holds
    /// a chain.
    pub fn with_store(name: &str, store: S) -> Self {
        let (admin, genesis) = TeamIdentity::new_admin(
            MemberProfile::new("admin@acme.co"),
            TeamInfo { name: name.into() },
        )
        .expect("generate admin identity");
        ingest_blocks(&admin.public_key(), &store, &[genesis]).expect("apply genesis");
        Self { admin, store }
    }

    pub fn state(&self) -> LedgerState {
        self.store.snapshot().expect("snapshot")
    }

    /// A fresh identity for someone about to join.
    pub fn newcomer(&self, email: &str) -> TeamIdentity {
        TeamIdentity::new_member(
            MemberProfile::new(email),
            self.admin.checkpoint(),
            self.admin.initial_team_public_key(),
        )
    }

    /// Sign `operation` as `signer` on top of the current head.
    pub fn block(&self, signer: &TeamIdentity, operation: Operation) -> SignedMessage {
        let last_block_hash = self.state().last_block_hash().expect("team has a head");
        signer
            .sign_body(Body::Main(MainChain::Append(Block {
                last_block_hash,
                operation,
            })))
            .expect("sign block")
    }

    /// Verify and commit one block.
    pub fn ingest(&self, block: SignedMessage) -> Result<usize> {
        ingest_blocks(&self.admin.initial_team_public_key(), &self.store, &[block])
    }

    /// Sign and apply `operation`, panicking if the verifier rejects it.
    pub fn apply(&self, signer: &TeamIdentity, operation: Operation) -> SignedMessage {
        let block = self.block(signer, operation);
        self.ingest(block.clone()).expect("block accepted");
        block
    }

    /// Invite and accept a new member.
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

    /// Add a member and promote them.
    pub fn add_admin(&self, email: &str) -> TeamIdentity {
        let member = self.add_member(email);
        self.apply(&self.admin, Operation::Promote(member.public_key()));
        member
    }

    pub fn enable_logging(&self) {
        self.apply(
            &self.admin,
            Operation::AddLoggingEndpoint(LoggingEndpoint::CommandEncrypted),
        );
    }

    /// Queue `entry` and publish every pending log block for the admin.
    /// Returns the number of log blocks appended.
    pub fn log(&self, entry: &[u8]) -> Result<usize> {
        let data = entry.to_vec().into();
        self.store
            .with_transaction(|txn| log_chain::write_audit_log(txn, data, 0))?;

        let mut appended = 0;
        loop {
            let mut txn = self.store.begin()?;
            let Some(next) = next_log_block(&self.admin, &mut txn)? else {
                return Ok(appended);
            };
            verify_and_process_log_block(&self.admin, &mut txn, &next.block)?;
            if let Some(entry) = next.consumed {
                txn.mark_audit_log_sent(entry.data_hash)?;
            }
            txn.commit()?;
            appended += 1;
        }
    }
}

impl TeamFixture<MemoryStore> {
    /// Play `script` against the team with the founding admin signing every
    /// step except `Leave`. Steps the verifier rejects are skipped.
    ///
    /// Returns the identity in each of the `pool` slots, `None` for slots
    /// that never joined.
    pub fn play(&self, pool: usize, script: &[MembershipStep]) -> Vec<Option<TeamIdentity>> {
        let mut slots: Vec<Option<TeamIdentity>> = (0..pool).map(|_| None).collect();
        for step in script {
            match *step {
                MembershipStep::Join(i) => {
                    if slots[i].is_none() {
                        slots[i] = self.try_join(&format!("member{}@acme.co", i));
                    }
                }
                MembershipStep::Promote(i) => self.try_admin_op(&slots[i], Operation::Promote),
                MembershipStep::Demote(i) => self.try_admin_op(&slots[i], Operation::Demote),
                MembershipStep::Remove(i) => self.try_admin_op(&slots[i], Operation::Remove),
                MembershipStep::Leave(i) => {
                    if let Some(member) = &slots[i] {
                        let _ = self.ingest(self.block(member, Operation::Leave));
                    }
                }
            }
        }
        slots
    }

    fn try_join(&self, email: &str) -> Option<TeamIdentity> {
        let member = self.newcomer(email);
        let invite = self.block(
            &self.admin,
            Operation::Invite(Invitation::Direct {
                public_key: member.public_key(),
                email: email.into(),
            }),
        );
        self.ingest(invite).ok()?;
        let accept = self.block(&member, Operation::AcceptInvite(member.identity()));
        self.ingest(accept).ok()?;
        Some(member)
    }

    fn try_admin_op(
        &self,
        slot: &Option<TeamIdentity>,
        operation: fn(teamchain::core::SignPublicKey) -> Operation,
    ) {
        if let Some(member) = slot {
            let _ = self.ingest(self.block(&self.admin, operation(member.public_key())));
        }
    }
}

/// The blocks of a team with `members` members, each joined by direct
/// invite, followed by `renames` team-info changes. Used to feed the
/// verifier a realistic chain.
pub fn team_chain(members: usize, renames: usize) -> (TeamFixture, Vec<SignedMessage>) {
    let fixture = TeamFixture::default();
    for i in 0..members {
        fixture.add_member(&format!("member{}@acme.co", i));
    }
    for i in 0..renames {
        fixture.apply(
            &fixture.admin,
            Operation::SetTeamInfo(TeamInfo {
                name: format!("acme-{}", i),
            }),
        );
    }
    let blocks = fixture.state().all_blocks();
    (fixture, blocks)
}
