use duckdb::{AccessMode, Config, Connection, Result as DuckResult};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where the relational store lives and how queries may touch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    /// Path to the DuckDB database file
    pub database: PathBuf,

    /// Open query connections read-only
    pub read_only: bool,
}

impl StoreDescriptor {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            read_only: true,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn path(&self) -> &Path {
        &self.database
    }

    /// Connection used for materialization and introspection
    pub(crate) fn open_read_write(&self) -> DuckResult<Connection> {
        if let Some(parent) = self.database.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "cannot create store directory");
                }
            }
        }
        Connection::open(&self.database)
    }

    /// Connection used to run a synthesized statement
    pub(crate) fn open_for_query(&self) -> DuckResult<Connection> {
        if self.read_only {
            let config = Config::default().access_mode(AccessMode::ReadOnly)?;
            Connection::open_with_flags(&self.database, config)
        } else {
            Connection::open(&self.database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreDescriptor::new(dir.path().join("nested/deeper/s.duckdb"));

        let conn = store.open_read_write().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        drop(conn);

        assert!(store.path().exists());
    }

    #[test]
    fn test_blocked_parent_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "plain file").unwrap();

        let store = StoreDescriptor::new(blocker.join("s.duckdb"));
        assert!(store.open_read_write().is_err());
    }

    #[test]
    fn test_query_connections_are_read_only_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreDescriptor::new(dir.path().join("s.duckdb"));
        store
            .open_read_write()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();

        let conn = store.open_for_query().unwrap();
        assert!(conn.execute_batch("INSERT INTO t VALUES (1)").is_err());
        drop(conn);

        let writable = store.clone().with_read_only(false);
        writable
            .open_for_query()
            .unwrap()
            .execute_batch("INSERT INTO t VALUES (1)")
            .unwrap();
    }
}
