//! The audit-log chain: producing and verifying a member's log blocks.
//!
//! Each member authors their own log chain. Entries are encrypted under a
//! symmetric key that is wrapped to every current admin and to the author.
//! Before any entry is encrypted the engine makes sure the set of key
//! holders is exactly that: a departed admin forces a rotation, a new admin
//! gets the existing key.

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::{debug, info, warn};

use teamchain_core::{
    Body, BoxPublicKey, EncryptedLog, GenesisLogBlock, LogBlock, LogChain, LogOperation,
    SignedMessage, TeamPointer, WrappedKey, PROTOCOL_VERSION,
};
use teamchain_seal::EncryptionKey;
use teamchain_store::{LedgerState, LedgerStore, StoreExt, Transaction, UnsentAuditLog};

use crate::error::{ChainError, Result};
use crate::identity::TeamIdentity;

/// The next block to post, and the queued entry it encrypts, if any.
#[derive(Debug, Clone)]
pub struct NextLogBlock {
    pub block: SignedMessage,
    /// Mark this entry sent once `block` is accepted.
    pub consumed: Option<UnsentAuditLog>,
}

/// Decide and sign the next log block.
///
/// Returns `None` when nothing is queued. Key changes (a fresh key, the
/// updated recipient set) are recorded in `txn`; the block itself is
/// appended only once it comes back through
/// [`verify_and_process_log_block`].
pub fn next_log_block(
    identity: &TeamIdentity,
    txn: &mut Transaction<'_>,
) -> Result<Option<NextLogBlock>> {
    let Some(pending) = txn.next_unsent_audit_log().cloned() else {
        return Ok(None);
    };

    let admins_and_me = admins_and_me(identity, txn);

    let Some(last_block_hash) = txn.last_log_block_hash() else {
        let key = EncryptionKey::generate();
        let wrapped_keys = identity.wrap_log_key(&key, &admins_and_me)?;
        txn.set_log_encryption_key(key)?;
        txn.set_tracked_wrapped_to(admins_and_me.clone())?;

        let block = identity.sign_body(Body::Log(LogChain::Create(GenesisLogBlock {
            team_pointer: TeamPointer::PublicKey(identity.initial_team_public_key()),
            wrapped_keys,
        })))?;
        info!(recipients = admins_and_me.len(), "starting log chain");
        return Ok(Some(NextLogBlock {
            block,
            consumed: None,
        }));
    };

    let wrapped_to = txn.tracked_wrapped_to().clone();
    let current_key = txn.log_encryption_key().cloned();

    let (operation, consumed) = match current_key {
        Some(key) if wrapped_to.is_subset(&admins_and_me) => {
            let missing: Vec<BoxPublicKey> =
                admins_and_me.difference(&wrapped_to).copied().collect();
            if missing.is_empty() {
                let ciphertext = key.seal(&pending.data)?;
                (
                    LogOperation::EncryptLog(EncryptedLog {
                        ciphertext: Bytes::from(ciphertext),
                    }),
                    Some(pending),
                )
            } else {
                let wrapped_keys = identity.wrap_log_key(&key, &missing)?;
                txn.set_tracked_wrapped_to(&wrapped_to | &admins_and_me)?;
                debug!(added = missing.len(), "wrapping log key to new admins");
                (LogOperation::AddWrappedKeys(wrapped_keys), None)
            }
        }
        _ => {
            let key = EncryptionKey::generate();
            let wrapped_keys = identity.wrap_log_key(&key, &admins_and_me)?;
            txn.set_log_encryption_key(key)?;
            txn.set_tracked_wrapped_to(admins_and_me.clone())?;
            info!(
                recipients = admins_and_me.len(),
                dropped = wrapped_to.difference(&admins_and_me).count(),
                "rotating log key"
            );
            (LogOperation::RotateKey(wrapped_keys), None)
        }
    };

    let block = identity.sign_body(Body::Log(LogChain::Append(LogBlock {
        last_block_hash,
        operation,
    })))?;
    Ok(Some(NextLogBlock { block, consumed }))
}

/// Current admins' box keys plus the author's own.
fn admins_and_me(identity: &TeamIdentity, state: &LedgerState) -> BTreeSet<BoxPublicKey> {
    state
        .admins()
        .map(|admin| admin.encryption_public_key)
        .chain(std::iter::once(identity.box_public_key()))
        .collect()
}

/// Verify one of this identity's own log blocks and apply it to `txn`.
pub fn verify_and_process_log_block(
    identity: &TeamIdentity,
    txn: &mut Transaction<'_>,
    block: &SignedMessage,
) -> Result<()> {
    let message = block.decode()?;
    let version = message.header.protocol_version;
    if version.is_major_upgrade_from(&PROTOCOL_VERSION) {
        return Err(ChainError::MajorVersionIncompatible(version));
    }

    let Body::Log(log_chain) = message.body else {
        return Err(ChainError::NotLogChainBlock);
    };
    if block.public_key != identity.public_key() {
        return Err(ChainError::SignerNotLogChainAuthor);
    }
    block
        .verify_with(&identity.public_key())
        .map_err(|_| ChainError::BadSignature)?;

    match (txn.last_log_block_hash(), log_chain) {
        (None, LogChain::Create(genesis)) => {
            check_team_pointer(identity, txn, &genesis.team_pointer)?;
            if let Some(key) = own_wrapped_key(identity, &genesis.wrapped_keys)? {
                txn.set_log_encryption_key(key)?;
            }
            txn.set_tracked_wrapped_to(recipients(&genesis.wrapped_keys))?;
            info!(block = %block.hash(), "accepted log chain genesis");
        }
        (None, _) => return Err(ChainError::ExpectedLogChainGenesis),
        (Some(head), LogChain::Append(append)) => {
            if append.last_block_hash != head {
                return Err(ChainError::BadLogBlockHash);
            }
            match &append.operation {
                LogOperation::AddWrappedKeys(wrapped_keys) => {
                    if let Some(key) = own_wrapped_key(identity, wrapped_keys)? {
                        txn.set_log_encryption_key(key)?;
                    }
                    let tracked = txn.tracked_wrapped_to() | &recipients(wrapped_keys);
                    txn.set_tracked_wrapped_to(tracked)?;
                }
                LogOperation::RotateKey(wrapped_keys) => {
                    let key = own_wrapped_key(identity, wrapped_keys)?
                        .ok_or(ChainError::MissingLogChainWrappedKey)?;
                    txn.set_log_encryption_key(key)?;
                    txn.set_tracked_wrapped_to(recipients(wrapped_keys))?;
                }
                LogOperation::EncryptLog(_) => {}
            }
            debug!(
                op = append.operation.name(),
                block = %block.hash(),
                "accepted log block"
            );
        }
        (Some(_), _) => return Err(ChainError::ExpectedLogChainAppend),
    }

    txn.append_log_block(block.clone())?;
    Ok(())
}

/// Verify `blocks` one by one and commit them in one transaction.
///
/// Like [`crate::verifier::ingest_blocks`], the verified prefix is
/// committed even when a later block fails.
pub fn ingest_log_blocks(
    identity: &TeamIdentity,
    store: &dyn LedgerStore,
    blocks: &[SignedMessage],
) -> Result<usize> {
    let mut txn = store.begin()?;
    let mut result = Ok(blocks.len());
    for block in blocks {
        let savepoint = txn.savepoint();
        if let Err(e) = verify_and_process_log_block(identity, &mut txn, block) {
            warn!(block = %block.hash(), error = %e, "rejected log block");
            txn.rollback_to(savepoint)?;
            result = Err(e);
            break;
        }
    }
    txn.commit()?;
    result
}

fn check_team_pointer(
    identity: &TeamIdentity,
    state: &LedgerState,
    pointer: &TeamPointer,
) -> Result<()> {
    let known = match pointer {
        TeamPointer::PublicKey(public_key) => *public_key == identity.initial_team_public_key(),
        TeamPointer::LastBlockHash(hash) => state.has_block(hash),
    };
    if known {
        Ok(())
    } else {
        Err(ChainError::MissingTeamPointerBlockHash)
    }
}

fn own_wrapped_key(
    identity: &TeamIdentity,
    wrapped_keys: &[WrappedKey],
) -> Result<Option<EncryptionKey>> {
    let me = identity.box_public_key();
    wrapped_keys
        .iter()
        .find(|wrapped| wrapped.recipient_public_key == me)
        .map(|wrapped| identity.open_wrapped_log_key(wrapped))
        .transpose()
}

fn recipients(wrapped_keys: &[WrappedKey]) -> BTreeSet<BoxPublicKey> {
    wrapped_keys
        .iter()
        .map(|wrapped| wrapped.recipient_public_key)
        .collect()
}

/// Queue an audit-log entry, if the team has command logging enabled.
pub fn write_audit_log(txn: &mut Transaction<'_>, data: Bytes, now: u64) -> Result<()> {
    if !txn.fetch_team()?.command_encrypted_logging_enabled() {
        return Err(ChainError::LoggingDisabled);
    }
    txn.enqueue_audit_log(data, now)?;
    Ok(())
}

/// Decrypt an `encrypt_log` ciphertext with a key holder's copy of the key.
pub fn decrypt_log_entry(key: &EncryptionKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    Ok(key.open(ciphertext)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamchain_core::{Block, Keypair, LoggingEndpoint, MainChain, Operation, TeamInfo};
    use teamchain_store::MemoryStore;

    use crate::identity::MemberProfile;
    use crate::verifier::ingest_blocks;

    fn logging_team() -> (TeamIdentity, MemoryStore) {
        let (admin, genesis) = TeamIdentity::new_admin(
            MemberProfile::new("a@x.co"),
            TeamInfo {
                name: "acme".into(),
            },
        )
        .unwrap();
        let store = MemoryStore::new();
        ingest_blocks(&admin.public_key(), &store, &[genesis.clone()]).unwrap();

        let enable = admin
            .sign_body(Body::Main(MainChain::Append(Block {
                last_block_hash: genesis.hash(),
                operation: Operation::AddLoggingEndpoint(LoggingEndpoint::CommandEncrypted),
            })))
            .unwrap();
        ingest_blocks(&admin.public_key(), &store, &[enable]).unwrap();
        (admin, store)
    }

    fn queue(store: &MemoryStore, data: &'static [u8]) {
        store
            .with_transaction(|txn| write_audit_log(txn, Bytes::from_static(data), 1))
            .unwrap();
    }

    /// Produce, verify and commit one block, as the service does.
    fn step(identity: &TeamIdentity, store: &MemoryStore) -> Option<LogOperation> {
        let mut txn = store.begin().unwrap();
        let next = next_log_block(identity, &mut txn).unwrap()?;
        verify_and_process_log_block(identity, &mut txn, &next.block).unwrap();
        if let Some(entry) = &next.consumed {
            txn.mark_audit_log_sent(entry.data_hash).unwrap();
        }
        txn.commit().unwrap();

        match next.block.decode().unwrap().body {
            Body::Log(LogChain::Append(append)) => Some(append.operation),
            Body::Log(LogChain::Create(_)) => None,
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_nothing_queued_produces_nothing() {
        let (admin, store) = logging_team();
        let mut txn = store.begin().unwrap();
        assert!(next_log_block(&admin, &mut txn).unwrap().is_none());
    }

    #[test]
    fn test_write_requires_logging_endpoint() {
        let (admin, genesis) = TeamIdentity::new_admin(
            MemberProfile::new("a@x.co"),
            TeamInfo { name: "t".into() },
        )
        .unwrap();
        let store = MemoryStore::new();
        ingest_blocks(&admin.public_key(), &store, &[genesis]).unwrap();

        let result = store.with_transaction(|txn| write_audit_log(txn, Bytes::from_static(b"ls"), 1));
        assert!(matches!(result, Err(ChainError::LoggingDisabled)));
    }

    #[test]
    fn test_genesis_then_encrypt() {
        let (admin, store) = logging_team();
        queue(&store, b"ssh git.x.co");

        assert!(step(&admin, &store).is_none());
        let state = store.snapshot().unwrap();
        assert_eq!(state.log_chain().len(), 1);
        assert_eq!(
            state.tracked_wrapped_to(),
            &BTreeSet::from([admin.box_public_key()])
        );
        assert!(state.next_unsent_audit_log().is_some());

        let op = step(&admin, &store).unwrap();
        let LogOperation::EncryptLog(entry) = op else {
            panic!("expected encrypt_log, got {op:?}");
        };
        let state = store.snapshot().unwrap();
        assert!(state.next_unsent_audit_log().is_none());

        let key = state.log_encryption_key().unwrap();
        assert_eq!(
            decrypt_log_entry(key, &entry.ciphertext).unwrap(),
            b"ssh git.x.co".to_vec()
        );
        assert_eq!(state.log_chain().len(), 2);
        assert!(step(&admin, &store).is_none());
    }

    fn main_append(admin: &TeamIdentity, store: &MemoryStore, operation: Operation) {
        let last_block_hash = store.snapshot().unwrap().last_block_hash().unwrap();
        let block = admin
            .sign_body(Body::Main(MainChain::Append(Block {
                last_block_hash,
                operation,
            })))
            .unwrap();
        ingest_blocks(&admin.initial_team_public_key(), store, &[block]).unwrap();
    }

    #[test]
    fn test_key_follows_admin_set() {
        let (admin, store) = logging_team();
        queue(&store, b"a");
        step(&admin, &store);

        let bob = TeamIdentity::new_member(
            MemberProfile::new("b@x.co"),
            admin.checkpoint(),
            admin.public_key(),
        );
        main_append(
            &admin,
            &store,
            Operation::Invite(teamchain_core::Invitation::Direct {
                public_key: bob.public_key(),
                email: "b@x.co".into(),
            }),
        );
        let head = store.snapshot().unwrap().last_block_hash().unwrap();
        let accept = bob
            .sign_body(Body::Main(MainChain::Append(Block {
                last_block_hash: head,
                operation: Operation::AcceptInvite(bob.identity()),
            })))
            .unwrap();
        ingest_blocks(&admin.public_key(), &store, &[accept]).unwrap();
        main_append(&admin, &store, Operation::Promote(bob.public_key()));

        let Some(LogOperation::AddWrappedKeys(added)) = step(&admin, &store) else {
            panic!("expected add_wrapped_keys");
        };
        assert_eq!(recipients(&added), BTreeSet::from([bob.box_public_key()]));
        let both = BTreeSet::from([admin.box_public_key(), bob.box_public_key()]);
        assert_eq!(store.snapshot().unwrap().tracked_wrapped_to(), &both);
        let key_before = store.snapshot().unwrap().log_encryption_key().cloned();

        main_append(&admin, &store, Operation::Demote(bob.public_key()));
        assert!(matches!(step(&admin, &store), Some(LogOperation::RotateKey(_))));
        let state = store.snapshot().unwrap();
        assert_eq!(
            state.tracked_wrapped_to(),
            &BTreeSet::from([admin.box_public_key()])
        );
        assert_ne!(state.log_encryption_key().cloned(), key_before);

        assert!(matches!(step(&admin, &store), Some(LogOperation::EncryptLog(_))));
    }

    #[test]
    fn test_rejects_foreign_and_misplaced_blocks() {
        let (admin, store) = logging_team();
        let (other, _) = TeamIdentity::new_admin(
            MemberProfile::new("o@x.co"),
            TeamInfo { name: "o".into() },
        )
        .unwrap();
        queue(&store, b"a");

        let mut txn = store.begin().unwrap();
        let next = next_log_block(&other, &mut txn).unwrap().unwrap();
        assert!(matches!(
            verify_and_process_log_block(&admin, &mut txn, &next.block),
            Err(ChainError::SignerNotLogChainAuthor)
        ));

        let main = store.snapshot().unwrap().main_genesis_block().unwrap().clone();
        let result = verify_and_process_log_block(&admin, &mut txn, &main);
        assert!(matches!(result, Err(ChainError::NotLogChainBlock)));
        txn.rollback();

        // An append before any genesis.
        let append = admin
            .sign_body(Body::Log(LogChain::Append(LogBlock {
                last_block_hash: main.hash(),
                operation: LogOperation::EncryptLog(EncryptedLog {
                    ciphertext: Bytes::new(),
                }),
            })))
            .unwrap();
        let mut txn = store.begin().unwrap();
        assert!(matches!(
            verify_and_process_log_block(&admin, &mut txn, &append),
            Err(ChainError::ExpectedLogChainGenesis)
        ));
        txn.rollback();

        step(&admin, &store);
        let mut txn = store.begin().unwrap();
        assert!(matches!(
            verify_and_process_log_block(&admin, &mut txn, &append),
            Err(ChainError::BadLogBlockHash)
        ));
    }

    #[test]
    fn test_genesis_must_point_at_known_team() {
        let (admin, store) = logging_team();
        let genesis = admin
            .sign_body(Body::Log(LogChain::Create(GenesisLogBlock {
                team_pointer: TeamPointer::LastBlockHash(teamchain_core::BlockHash::from_bytes(
                    [3; 32],
                )),
                wrapped_keys: vec![],
            })))
            .unwrap();
        let mut txn = store.begin().unwrap();
        assert!(matches!(
            verify_and_process_log_block(&admin, &mut txn, &genesis),
            Err(ChainError::MissingTeamPointerBlockHash)
        ));
    }

    #[test]
    fn test_genesis_key_pointer_needs_no_main_chain() {
        let (admin, _) = logging_team();
        let genesis = admin
            .sign_body(Body::Log(LogChain::Create(GenesisLogBlock {
                team_pointer: TeamPointer::PublicKey(admin.initial_team_public_key()),
                wrapped_keys: vec![],
            })))
            .unwrap();

        // A store that has not seen the main chain yet.
        let empty = MemoryStore::new();
        let mut txn = empty.begin().unwrap();
        verify_and_process_log_block(&admin, &mut txn, &genesis).unwrap();
        assert_eq!(txn.last_log_block_hash(), Some(genesis.hash()));

        let stranger = Keypair::from_seed(&[5; 32]);
        let foreign = admin
            .sign_body(Body::Log(LogChain::Create(GenesisLogBlock {
                team_pointer: TeamPointer::PublicKey(stranger.public_key()),
                wrapped_keys: vec![],
            })))
            .unwrap();
        let mut txn = empty.begin().unwrap();
        assert!(matches!(
            verify_and_process_log_block(&admin, &mut txn, &foreign),
            Err(ChainError::MissingTeamPointerBlockHash)
        ));
    }

    #[test]
    fn test_rotation_without_own_key_is_fatal() {
        let (admin, store) = logging_team();
        queue(&store, b"a");
        step(&admin, &store);

        let head = store.snapshot().unwrap().last_log_block_hash().unwrap();
        let rotate = admin
            .sign_body(Body::Log(LogChain::Append(LogBlock {
                last_block_hash: head,
                operation: LogOperation::RotateKey(vec![]),
            })))
            .unwrap();
        let mut txn = store.begin().unwrap();
        assert!(matches!(
            verify_and_process_log_block(&admin, &mut txn, &rotate),
            Err(ChainError::MissingLogChainWrappedKey)
        ));
    }
}
