//! Configuration: where identities and databases live, and how much to
//! fetch at a time.

use std::fs;
use std::path::PathBuf;

use teamchain_store::SqliteStore;

use crate::error::Result;

/// Which of an identity's local databases to open.
///
/// The app and a companion process (e.g. a notification extension) each
/// keep their own copy, reconciled with [`crate::sync::sync_stores`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseRole {
    Main,
    Companion,
}

impl DatabaseRole {
    fn suffix(&self) -> &'static str {
        match self {
            DatabaseRole::Main => "",
            DatabaseRole::Companion => "_companion",
        }
    }
}

/// Configuration for a team identity's local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamConfig {
    /// Directory holding identity files and SQLite databases.
    pub data_dir: PathBuf,
    /// Prefix for join-team links.
    pub app_url_scheme: String,
    /// Blocks requested per transport read and per sync batch.
    pub read_batch_limit: usize,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("teamchain"),
            app_url_scheme: "krypton://".to_string(),
            read_batch_limit: 100,
        }
    }
}

impl TeamConfig {
    /// A default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self, identity_id: &str, role: DatabaseRole) -> PathBuf {
        self.data_dir
            .join(format!("{}{}.db", identity_id, role.suffix()))
    }

    pub fn identity_path(&self, identity_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.identity.json", identity_id))
    }

    /// Open (creating if needed) one of an identity's databases.
    pub fn open_store(&self, identity_id: &str, role: DatabaseRole) -> Result<SqliteStore> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(SqliteStore::open(self.database_path(identity_id, role))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamchain_store::LedgerStore;

    #[test]
    fn test_default_config() {
        let config = TeamConfig::default();
        assert_eq!(config.app_url_scheme, "krypton://");
        assert!(config.read_batch_limit > 0);
    }

    #[test]
    fn test_companion_database_is_separate() {
        let config = TeamConfig::with_data_dir("/data");
        let main = config.database_path("abc", DatabaseRole::Main);
        let companion = config.database_path("abc", DatabaseRole::Companion);

        assert_eq!(main, PathBuf::from("/data/abc.db"));
        assert_eq!(companion, PathBuf::from("/data/abc_companion.db"));
        assert_eq!(
            config.identity_path("abc"),
            PathBuf::from("/data/abc.identity.json")
        );
    }

    #[test]
    fn test_open_store_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = TeamConfig::with_data_dir(dir.path().join("nested"));

        let store = config.open_store("abc", DatabaseRole::Companion).unwrap();
        assert!(store.snapshot().unwrap().last_block_hash().is_none());
        assert!(config.database_path("abc", DatabaseRole::Companion).exists());
    }
}
