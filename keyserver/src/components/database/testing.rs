//! Test utilities for database operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::{Database, DbHandle, connection, migrate};
use crate::error::Error;

/// A test database wrapper that owns a temporary database file.
///
/// SQLite's shared-cache in-memory databases report table-level locking conflicts as
/// `SQLITE_LOCKED` without consulting the busy handler, so tests that exercise
/// concurrent transactions use a real file instead.
pub(crate) struct TestDatabase {
    db: Database,
    // Dropped last, after the pool has released the file.
    dir: TempDir,
}

impl TestDatabase {
    /// Creates a new test database with migrations applied.
    pub(crate) async fn new() -> Result<Self, Error> {
        Self::with_lock_timeout(Duration::from_secs(5)).await
    }

    /// Creates a new test database whose connections wait at most `lock_timeout` for a
    /// competing write lock.
    pub(crate) async fn with_lock_timeout(lock_timeout: Duration) -> Result<Self, Error> {
        let dir = tempfile::tempdir().map_err(|e| crate::error::ErrorKind::Init.context(e))?;
        let path = dir.path().join("keyserver.db");
        let pool = connection::pool(
            &path,
            connection::PoolConfig {
                max_size: 4,
                lock_timeout,
            },
        )?;
        let db = Database {
            path: Arc::new(path),
            pool,
        };
        db.handle().await?.with_raw_mut(migrate)?;
        Ok(Self { db, dir })
    }

    /// Gets a database handle from the pool.
    pub(crate) async fn handle(&self) -> Result<DbHandle, Error> {
        self.db.handle().await
    }

    /// Returns a [`Database`] sharing this test database's pool.
    pub(crate) fn database(&self) -> Database {
        self.db.clone()
    }

    /// Returns the path of the underlying database file.
    pub(crate) fn path(&self) -> PathBuf {
        self.dir.path().join("keyserver.db")
    }
}
