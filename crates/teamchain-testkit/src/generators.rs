//! Proptest generators for property-based testing.

use proptest::prelude::*;

use teamchain::core::{
    BlockHash, Keypair, Policy, Restriction, SignPublicKey, SshHostKey, TeamInfo,
};

/// Generate a random signing keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random signing public key.
pub fn public_key() -> impl Strategy<Value = SignPublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random block hash.
pub fn block_hash() -> impl Strategy<Value = BlockHash> {
    any::<[u8; 32]>().prop_map(BlockHash::from_bytes)
}

/// Generate a lowercase domain such as `abc.io`.
pub fn domain() -> impl Strategy<Value = String> {
    ("[a-z]{1,10}", prop_oneof![Just("com"), Just("io"), Just("co")])
        .prop_map(|(name, tld)| format!("{}.{}", name, tld))
}

/// Generate an email address.
pub fn email() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9.]{0,11}", domain()).prop_map(|(user, domain)| format!("{}@{}", user, domain))
}

/// Generate an indirect-invite restriction.
pub fn restriction() -> impl Strategy<Value = Restriction> {
    prop_oneof![
        domain().prop_map(Restriction::Domain),
        prop::collection::vec(email(), 1..4).prop_map(Restriction::Emails),
    ]
}

pub fn team_info() -> impl Strategy<Value = TeamInfo> {
    "[A-Za-z0-9 ]{1,24}".prop_map(|name| TeamInfo { name })
}

pub fn policy() -> impl Strategy<Value = Policy> {
    proptest::option::of(0u64..=7 * 86_400).prop_map(|temporary_approval_seconds| Policy {
        temporary_approval_seconds,
    })
}

pub fn host_key() -> impl Strategy<Value = SshHostKey> {
    (domain(), prop::collection::vec(any::<u8>(), 16..64)).prop_map(|(host, key)| SshHostKey {
        host,
        public_key: key.into(),
    })
}

/// One step of a membership script, naming members by index into a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipStep {
    /// Invite and accept.
    Join(usize),
    Promote(usize),
    Demote(usize),
    Remove(usize),
    Leave(usize),
}

/// A script of membership steps over a pool of `pool` members.
pub fn membership_script(
    pool: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<MembershipStep>> {
    let step = prop_oneof![
        2 => (0..pool).prop_map(MembershipStep::Join),
        1 => (0..pool).prop_map(MembershipStep::Promote),
        1 => (0..pool).prop_map(MembershipStep::Demote),
        1 => (0..pool).prop_map(MembershipStep::Remove),
        1 => (0..pool).prop_map(MembershipStep::Leave),
    ];
    prop::collection::vec(step, 0..=max_len)
}
