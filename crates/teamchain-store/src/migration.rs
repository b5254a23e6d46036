//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema {} is newer than supported {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Commit counters and sequence allocation
        CREATE TABLE store_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        -- Main chain, one row per block in chain order
        CREATE TABLE main_blocks (
            hash BLOB PRIMARY KEY,            -- 32 bytes, SHA-256 chain hash
            position INTEGER NOT NULL UNIQUE, -- 0 for genesis
            previous_hash BLOB,               -- NULL for genesis
            public_key BLOB NOT NULL,         -- 32 bytes, Ed25519 signer
            message BLOB NOT NULL,            -- canonical message bytes as signed
            signature BLOB NOT NULL           -- 64 bytes
        );

        -- Log chain, same layout
        CREATE TABLE log_blocks (
            hash BLOB PRIMARY KEY,
            position INTEGER NOT NULL UNIQUE,
            previous_hash BLOB,
            public_key BLOB NOT NULL,
            message BLOB NOT NULL,
            signature BLOB NOT NULL
        );

        -- Folded team projection (JSON)
        CREATE TABLE team (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            team_json TEXT NOT NULL
        );

        -- Current and removed members
        CREATE TABLE members (
            public_key BLOB PRIMARY KEY,
            encryption_public_key BLOB NOT NULL,
            email TEXT NOT NULL,
            ssh_public_key BLOB NOT NULL,
            pgp_public_key BLOB NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0,
            removed INTEGER NOT NULL DEFAULT 0
        );

        -- Open invitations in insertion order
        CREATE TABLE invitations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,               -- 'direct' or 'indirect'
            public_key BLOB NOT NULL,         -- invitee key or nonce key
            invitation BLOB NOT NULL          -- canonical CBOR
        );

        CREATE TABLE pinned_host_keys (
            host TEXT NOT NULL,
            public_key BLOB NOT NULL,
            PRIMARY KEY (host, public_key)
        );

        CREATE TABLE log_key (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            encryption_key BLOB NOT NULL
        );

        -- Box keys the current log key is wrapped to
        CREATE TABLE log_wrapped_to (
            box_public_key BLOB PRIMARY KEY
        );

        CREATE TABLE unsent_audit_logs (
            seq INTEGER PRIMARY KEY,
            data BLOB NOT NULL,
            date INTEGER NOT NULL,            -- Unix seconds
            data_hash BLOB NOT NULL           -- SHA-256 of data
        );

        CREATE INDEX idx_members_email ON members(email);
        CREATE INDEX idx_invitations_public_key ON invitations(public_key);
        CREATE INDEX idx_unsent_audit_logs_hash ON unsent_audit_logs(data_hash);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "main_blocks",
            "log_blocks",
            "team",
            "members",
            "invitations",
            "pinned_host_keys",
            "log_key",
            "log_wrapped_to",
            "unsent_audit_logs",
            "store_meta",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
