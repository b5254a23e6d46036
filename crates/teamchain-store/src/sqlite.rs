//! SQLite implementation of the LedgerStore trait.
//!
//! This is the primary storage backend. It keeps an in-memory mirror of the
//! committed state so snapshots never re-read the database. The commit
//! counters live in the database too; when they differ from the mirror's
//! (another connection committed to the same file) the mirror is reloaded
//! before snapshotting or checking for conflicts.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use teamchain_core::{
    from_canonical_bytes, to_canonical_bytes, BoxPublicKey, Identity, Invitation, Sha256Hash,
    SignPublicKey, SignedMessage, Signature, SshHostKey, Team,
};
use teamchain_seal::EncryptionKey;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::state::{Chain, Change, LedgerState, Member, UnsentAuditLog, Versions};
use crate::traits::LedgerStore;

const MAIN_BLOCKS: &str = "main_blocks";
const LOG_BLOCKS: &str = "log_blocks";

/// SQLite-based store implementation.
///
/// Thread-safe via an internal Mutex around the connection. Commits run in
/// an IMMEDIATE transaction, so concurrent writers to one file serialize
/// and the second sees the first's counters.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    mirror: RwLock<LedgerState>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        let state = load_state(&conn)?;
        debug!(
            main_blocks = state.main_chain().len(),
            log_blocks = state.log_chain().len(),
            "opened sqlite store"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            mirror: RwLock::new(state),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Reload the mirror if the database moved underneath it.
    fn refresh(&self, conn: &Connection) -> Result<()> {
        let on_disk = read_versions(conn)?;
        let mut mirror = self.mirror.write().map_err(|_| StoreError::LockPoisoned)?;
        if mirror.versions() != on_disk {
            debug!(?on_disk, cached = ?mirror.versions(), "reloading sqlite mirror");
            *mirror = load_state(conn)?;
        }
        Ok(())
    }
}

impl LedgerStore for SqliteStore {
    fn snapshot(&self) -> Result<LedgerState> {
        let conn = self.lock_conn()?;
        self.refresh(&conn)?;
        let mirror = self.mirror.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(mirror.clone())
    }

    fn commit(&self, base: Versions, changes: &[Change]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        self.refresh(&tx)?;

        let mut next = {
            let mirror = self.mirror.read().map_err(|_| StoreError::LockPoisoned)?;
            mirror.check_versions(base, changes)?;
            mirror.clone()
        };

        for change in changes {
            next.apply(change)?;
            write_change(&tx, change, &next)?;
        }
        next.bump_versions(changes);
        write_meta(&tx, &next)?;
        tx.commit()?;

        debug!(changes = changes.len(), versions = ?next.versions(), "sqlite store commit");
        let mut mirror = self.mirror.write().map_err(|_| StoreError::LockPoisoned)?;
        *mirror = next;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────────────

fn write_change(conn: &Connection, change: &Change, state: &LedgerState) -> Result<()> {
    match change {
        Change::CreateTeam {
            team,
            creator,
            block,
        } => {
            insert_block(conn, MAIN_BLOCKS, block, state.main_chain())?;
            write_team(conn, team)?;
            upsert_member(conn, creator, true)?;
        }
        Change::AppendBlock(block) => insert_block(conn, MAIN_BLOCKS, block, state.main_chain())?,
        Change::SetTeam(team) => write_team(conn, team)?,
        Change::AddMember(identity) => upsert_member(conn, identity, false)?,
        Change::RemoveMember(public_key) => {
            conn.execute(
                "UPDATE members SET removed = 1, is_admin = 0 WHERE public_key = ?1",
                params![&public_key.as_bytes()[..]],
            )?;
        }
        Change::AddAdmin(public_key) | Change::RemoveAdmin(public_key) => {
            let is_admin = matches!(change, Change::AddAdmin(_));
            conn.execute(
                "UPDATE members SET is_admin = ?1 WHERE public_key = ?2",
                params![is_admin, &public_key.as_bytes()[..]],
            )?;
        }
        Change::AddInvitation(invitation) => {
            let kind = match invitation {
                Invitation::Direct { .. } => "direct",
                Invitation::Indirect { .. } => "indirect",
            };
            let blob = to_canonical_bytes(invitation)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            conn.execute(
                "INSERT INTO invitations (kind, public_key, invitation) VALUES (?1, ?2, ?3)",
                params![kind, &invitation.public_key().as_bytes()[..], blob],
            )?;
        }
        Change::RemoveDirectInvitations(public_key) => {
            conn.execute(
                "DELETE FROM invitations WHERE kind = 'direct' AND public_key = ?1",
                params![&public_key.as_bytes()[..]],
            )?;
        }
        Change::RemoveAllInvitations => {
            conn.execute("DELETE FROM invitations", [])?;
        }
        Change::PinHostKey(host_key) => {
            conn.execute(
                "INSERT OR IGNORE INTO pinned_host_keys (host, public_key) VALUES (?1, ?2)",
                params![host_key.host, &host_key.public_key[..]],
            )?;
        }
        Change::UnpinHostKey(host_key) => {
            conn.execute(
                "DELETE FROM pinned_host_keys WHERE host = ?1 AND public_key = ?2",
                params![host_key.host, &host_key.public_key[..]],
            )?;
        }
        Change::AppendLogBlock(block) => insert_block(conn, LOG_BLOCKS, block, state.log_chain())?,
        Change::SetLogEncryptionKey(key) => {
            conn.execute(
                "INSERT OR REPLACE INTO log_key (id, encryption_key) VALUES (1, ?1)",
                params![&key.as_bytes()[..]],
            )?;
        }
        Change::SetTrackedWrappedTo(recipients) => {
            conn.execute("DELETE FROM log_wrapped_to", [])?;
            let mut stmt = conn.prepare("INSERT INTO log_wrapped_to (box_public_key) VALUES (?1)")?;
            for recipient in recipients {
                stmt.execute(params![&recipient.as_bytes()[..]])?;
            }
        }
        Change::EnqueueAuditLog { .. } => {
            let entry = state
                .unsent_audit_logs
                .values()
                .next_back()
                .ok_or_else(|| StoreError::InvalidData("enqueued audit log missing".into()))?;
            conn.execute(
                "INSERT INTO unsent_audit_logs (seq, data, date, data_hash) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.seq as i64,
                    &entry.data[..],
                    entry.date as i64,
                    &entry.data_hash.as_bytes()[..]
                ],
            )?;
        }
        Change::MarkAuditLogSent(data_hash) => {
            conn.execute(
                "DELETE FROM unsent_audit_logs WHERE seq =
                    (SELECT MIN(seq) FROM unsent_audit_logs WHERE data_hash = ?1)",
                params![&data_hash.as_bytes()[..]],
            )?;
        }
        Change::ClearUnsentAuditLogs => {
            conn.execute("DELETE FROM unsent_audit_logs", [])?;
        }
    }
    Ok(())
}

/// Insert the block the chain just linked in as its head.
fn insert_block(conn: &Connection, table: &str, block: &SignedMessage, chain: &Chain) -> Result<()> {
    let hash = block.hash();
    let previous = chain.link(&hash).and_then(|link| link.previous);
    let position = chain.len() as i64 - 1;

    conn.execute(
        &format!(
            "INSERT INTO {} (hash, position, previous_hash, public_key, message, signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table
        ),
        params![
            &hash.as_bytes()[..],
            position,
            previous.map(|p| p.as_bytes().to_vec()),
            &block.public_key.as_bytes()[..],
            &block.message[..],
            &block.signature.as_bytes()[..],
        ],
    )?;
    Ok(())
}

fn write_team(conn: &Connection, team: &Team) -> Result<()> {
    let json = serde_json::to_string(team).map_err(|e| StoreError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO team (id, team_json) VALUES (1, ?1)",
        params![json],
    )?;
    Ok(())
}

fn upsert_member(conn: &Connection, identity: &Identity, is_admin: bool) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO members
            (public_key, encryption_public_key, email, ssh_public_key, pgp_public_key, is_admin, removed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            &identity.public_key.as_bytes()[..],
            &identity.encryption_public_key.as_bytes()[..],
            identity.email,
            &identity.ssh_public_key[..],
            &identity.pgp_public_key[..],
            is_admin,
        ],
    )?;
    Ok(())
}

fn write_meta(conn: &Connection, state: &LedgerState) -> Result<()> {
    let versions = state.versions();
    let mut stmt = conn.prepare("INSERT OR REPLACE INTO store_meta (key, value) VALUES (?1, ?2)")?;
    for (key, value) in [
        ("main_version", versions.main),
        ("log_version", versions.log),
        ("queue_version", versions.queue),
        ("next_audit_seq", state.next_audit_seq),
    ] {
        stmt.execute(params![key, value as i64])?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

fn read_meta(conn: &Connection, key: &str) -> Result<u64> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0) as u64)
}

fn read_versions(conn: &Connection) -> Result<Versions> {
    Ok(Versions {
        main: read_meta(conn, "main_version")?,
        log: read_meta(conn, "log_version")?,
        queue: read_meta(conn, "queue_version")?,
    })
}

fn fixed<const N: usize>(bytes: Vec<u8>, column: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|b: Vec<u8>| {
        StoreError::InvalidData(format!("{}: expected {} bytes, got {}", column, N, b.len()))
    })
}

fn read_chain(conn: &Connection, table: &str) -> Result<Chain> {
    let mut stmt = conn.prepare(&format!(
        "SELECT public_key, message, signature FROM {} ORDER BY position",
        table
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut chain = Chain::default();
    for (public_key, message, signature) in rows {
        chain.append(SignedMessage {
            public_key: SignPublicKey(fixed(public_key, "public_key")?),
            message: Bytes::from(message),
            signature: Signature(fixed(signature, "signature")?),
        })?;
    }
    Ok(chain)
}

fn load_state(conn: &Connection) -> Result<LedgerState> {
    let mut state = LedgerState::new();
    state.main = read_chain(conn, MAIN_BLOCKS)?;
    state.log = read_chain(conn, LOG_BLOCKS)?;

    let team_json: Option<String> = conn
        .query_row("SELECT team_json FROM team WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    state.team = team_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut stmt = conn.prepare(
        "SELECT public_key, encryption_public_key, email, ssh_public_key, pgp_public_key,
                is_admin, removed
         FROM members",
    )?;
    let members = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (public_key, encryption_public_key, email, ssh, pgp, is_admin, removed) in members {
        let identity = Identity {
            public_key: SignPublicKey(fixed(public_key, "public_key")?),
            encryption_public_key: BoxPublicKey(fixed(
                encryption_public_key,
                "encryption_public_key",
            )?),
            email,
            ssh_public_key: Bytes::from(ssh),
            pgp_public_key: Bytes::from(pgp),
        };
        if removed {
            state.removed_members.insert(identity.public_key, identity);
        } else {
            state
                .members
                .insert(identity.public_key, Member { identity, is_admin });
        }
    }

    let mut stmt = conn.prepare("SELECT invitation FROM invitations ORDER BY id")?;
    let blobs = stmt
        .query_map([], |row| row.get::<_, Vec<u8>>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for blob in blobs {
        let invitation: Invitation =
            from_canonical_bytes(&blob).map_err(|e| StoreError::Serialization(e.to_string()))?;
        state.invitations.push(invitation);
    }

    let mut stmt = conn.prepare("SELECT host, public_key FROM pinned_host_keys")?;
    let host_keys = stmt
        .query_map([], |row| {
            Ok(SshHostKey {
                host: row.get(0)?,
                public_key: Bytes::from(row.get::<_, Vec<u8>>(1)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    state.pinned_host_keys = host_keys.into_iter().collect();

    let key: Option<Vec<u8>> = conn
        .query_row("SELECT encryption_key FROM log_key WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    state.log_encryption_key = key
        .map(|k| fixed(k, "encryption_key").map(EncryptionKey::from_bytes))
        .transpose()?;

    let mut stmt = conn.prepare("SELECT box_public_key FROM log_wrapped_to")?;
    let recipients = stmt
        .query_map([], |row| row.get::<_, Vec<u8>>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for recipient in recipients {
        state
            .tracked_wrapped_to
            .insert(BoxPublicKey(fixed(recipient, "box_public_key")?));
    }

    let mut stmt =
        conn.prepare("SELECT seq, data, date, data_hash FROM unsent_audit_logs ORDER BY seq")?;
    let entries = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (seq, data, date, data_hash) in entries {
        let seq = seq as u64;
        state.unsent_audit_logs.insert(
            seq,
            UnsentAuditLog {
                seq,
                data: Bytes::from(data),
                date: date as u64,
                data_hash: Sha256Hash(fixed(data_hash, "data_hash")?),
            },
        );
    }

    state.next_audit_seq = read_meta(conn, "next_audit_seq")?;
    state.versions = read_versions(conn)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use teamchain_core::{
        BlockHash, Body, GenesisBlock, Keypair, LoggingEndpoint, MainChain, Message, Restriction,
        TeamInfo,
    };

    fn creator(keypair: &Keypair) -> Identity {
        Identity {
            public_key: keypair.public_key(),
            encryption_public_key: BoxPublicKey::from_bytes([3; 32]),
            email: "a@x.co".into(),
            ssh_public_key: Bytes::from_static(b"ssh-ed25519 AAAA"),
            pgp_public_key: Bytes::new(),
        }
    }

    fn block_at(keypair: &Keypair, time: u64) -> SignedMessage {
        let body = Body::Main(MainChain::Create(GenesisBlock {
            creator: creator(keypair),
            team_info: TeamInfo { name: "t".into() },
        }));
        SignedMessage::sign(&Message::at(body, time), keypair).unwrap()
    }

    /// Hash of the current main-chain head, straight from the database.
    fn head_on_disk(conn: &Connection) -> Result<Option<BlockHash>> {
        let hash: Option<Vec<u8>> = conn
            .query_row(
                "SELECT hash FROM main_blocks ORDER BY position DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        hash.map(|h| fixed(h, "hash").map(BlockHash)).transpose()
    }

    fn populate(store: &SqliteStore) {
        let admin = Keypair::from_seed(&[1; 32]);
        let bob = Keypair::from_seed(&[2; 32]);
        let mut bob_identity = creator(&bob);
        bob_identity.email = "b@x.co".into();

        store
            .with_transaction(|txn| {
                let mut team = Team::new(TeamInfo { name: "t".into() });
                txn.create_team(team.clone(), creator(&admin), block_at(&admin, 0))?;
                txn.append_block(block_at(&admin, 1))?;
                txn.add_member(bob_identity.clone())?;
                txn.add_admin(bob.public_key())?;
                txn.add_invitation(Invitation::Indirect {
                    nonce_public_key: SignPublicKey::from_bytes([8; 32]),
                    invite_symmetric_key_hash: Sha256Hash::hash(b"k"),
                    invite_ciphertext: Bytes::from_static(b"ct"),
                    restriction: Restriction::Emails(vec!["c@x.co".into()]),
                })?;
                txn.pin_host_key(SshHostKey {
                    host: "git.example.com".into(),
                    public_key: Bytes::from_static(b"hk"),
                })?;
                team.logging_endpoints.insert(LoggingEndpoint::CommandEncrypted);
                txn.set_team(team)?;
                txn.append_log_block(block_at(&admin, 2))?;
                txn.set_log_encryption_key(EncryptionKey::from_bytes([4; 32]))?;
                txn.set_tracked_wrapped_to([BoxPublicKey::from_bytes([3; 32])].into())?;
                txn.enqueue_audit_log(Bytes::from_static(b"first"), 10)?;
                txn.enqueue_audit_log(Bytes::from_static(b"second"), 11)?;
                txn.mark_audit_log_sent(Sha256Hash::hash(b"first"))
            })
            .unwrap();
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.db");

        let before = {
            let store = SqliteStore::open(&path).unwrap();
            populate(&store);
            store.snapshot().unwrap()
        };

        let reopened = SqliteStore::open(&path).unwrap();
        let after = reopened.snapshot().unwrap();
        assert_eq!(after, before);
        assert_eq!(after.main_chain().len(), 2);
        assert_eq!(after.admins().count(), 2);
        assert_eq!(after.next_unsent_audit_log().unwrap().data, Bytes::from_static(b"second"));
        assert!(after.fetch_team().unwrap().command_encrypted_logging_enabled());
    }

    #[test]
    fn test_removed_member_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.db");
        let bob = Keypair::from_seed(&[2; 32]);
        {
            let store = SqliteStore::open(&path).unwrap();
            populate(&store);
            store
                .with_transaction(|txn| txn.remove_member(bob.public_key()))
                .unwrap();
        }

        let state = SqliteStore::open(&path).unwrap().snapshot().unwrap();
        assert!(!state.is_member(&bob.public_key()));
        assert!(state.removed_member_identity(&bob.public_key()).is_some());
    }

    #[test]
    fn test_second_committer_conflicts() {
        let store = SqliteStore::open_memory().unwrap();
        populate(&store);
        let admin = Keypair::from_seed(&[1; 32]);

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        first.append_block(block_at(&admin, 20)).unwrap();
        second.append_block(block_at(&admin, 21)).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(StoreError::Conflict { .. })));

        let conn = store.lock_conn().unwrap();
        assert_eq!(head_on_disk(&conn).unwrap(), Some(block_at(&admin, 20).hash()));
    }

    #[test]
    fn test_two_handles_on_one_file_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.db");
        let a = SqliteStore::open(&path).unwrap();
        let b = SqliteStore::open(&path).unwrap();
        populate(&a);

        // b's mirror is stale until it notices the counters moved
        let seen = b.snapshot().unwrap();
        assert_eq!(seen.main_chain().len(), 2);

        let admin = Keypair::from_seed(&[1; 32]);
        let mut from_a = a.begin().unwrap();
        let mut from_b = b.begin().unwrap();
        from_a.append_block(block_at(&admin, 30)).unwrap();
        from_b.append_block(block_at(&admin, 31)).unwrap();
        from_b.commit().unwrap();
        assert!(matches!(from_a.commit(), Err(StoreError::Conflict { .. })));
    }
}
