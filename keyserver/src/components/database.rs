use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use schemerz::Migrator;
use schemerz_rusqlite::RusqliteAdapter;
use time::OffsetDateTime;
use tokio::fs;

use crate::{
    config::KeyServerConfig,
    error::{Error, ErrorKind},
    prelude::*,
};

mod connection;

pub(crate) mod migrations;
pub(crate) mod schema;

#[cfg(test)]
pub(crate) mod testing;


pub(crate) type DbHandle = deadpool::managed::Object<connection::KeyServerManager>;

/// The name of the table in which applied migrations are recorded.
const MIGRATIONS_TABLE: &str = "schemer_migrations";

/// A pool of connections to the keyserver database.
#[derive(Clone)]
pub struct Database {
    path: Arc<PathBuf>,
    pool: connection::KeyServerPool,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens the configured database, creating it if necessary, and brings its schema up
    /// to date.
    pub async fn open(config: &KeyServerConfig) -> Result<Self, Error> {
        let path = config.database_path();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ErrorKind::Init.context(e))?;
        }

        let db_exists = fs::try_exists(&path)
            .await
            .map_err(|e| ErrorKind::Init.context(e))?;

        let pool = connection::pool(
            &path,
            connection::PoolConfig {
                max_size: config.database.pool_size(),
                lock_timeout: config.database.lock_timeout(),
            },
        )?;

        let db = Database {
            path: Arc::new(path),
            pool,
        };

        if db_exists {
            info!("Applying latest database migrations");
        } else {
            info!("Creating empty database");
        }
        db.handle().await?.with_raw_mut(migrate)?;

        Ok(db)
    }

    pub(crate) async fn handle(&self) -> Result<DbHandle, Error> {
        self.pool
            .get()
            .await
            .map_err(|e| ErrorKind::Store.context(e).into())
    }
}

/// Applies every embedded migration that has not yet been applied to `conn`.
pub(crate) fn migrate(conn: &mut rusqlite::Connection) -> Result<(), Error> {
    let adapter = RusqliteAdapter::new(conn, Some(MIGRATIONS_TABLE.into()));
    adapter.init().map_err(|e| ErrorKind::Init.context(e))?;

    let mut migrator = Migrator::new(adapter);
    migrator
        .register_multiple(migrations::all())
        .map_err(|e| ErrorKind::Init.context(e))?;
    migrator.up(None).map_err(|e| ErrorKind::Init.context(e))?;

    Ok(())
}

/// Encodes a timestamp for storage.
pub(crate) fn to_timestamp(t: OffsetDateTime) -> i64 {
    t.unix_timestamp()
}

/// Decodes a stored timestamp.
pub(crate) fn from_timestamp(secs: i64) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| ErrorKind::Store.context(e).into())
}
