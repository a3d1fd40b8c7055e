use std::path::Path;
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// Options for the connection pool.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PoolConfig {
    pub(crate) max_size: usize,
    pub(crate) lock_timeout: Duration,
}

pub(super) fn pool(path: impl AsRef<Path>, config: PoolConfig) -> Result<KeyServerPool, Error> {
    let sqlite_config = deadpool_sqlite::Config::new(path.as_ref());
    let manager = KeyServerManager::from_config(&sqlite_config, config.lock_timeout);
    KeyServerPool::builder(manager)
        .config(deadpool::managed::PoolConfig::new(config.max_size))
        .build()
        .map_err(|e| ErrorKind::Init.context(e).into())
}

pub(crate) type KeyServerPool = deadpool::managed::Pool<KeyServerManager>;

pub(crate) struct KeyServerManager {
    inner: deadpool_sqlite::Manager,
    /// How long SQLite's busy handler waits for a competing transaction to release the
    /// database write lock before returning `SQLITE_BUSY`.
    lock_timeout: Duration,
}

impl KeyServerManager {
    /// Creates a new [`KeyServerManager`] using the given [`deadpool_sqlite::Config`]
    /// backed by the Tokio runtime.
    #[must_use]
    pub fn from_config(config: &deadpool_sqlite::Config, lock_timeout: Duration) -> Self {
        Self {
            inner: deadpool_sqlite::Manager::from_config(config, deadpool_sqlite::Runtime::Tokio1),
            lock_timeout,
        }
    }
}

impl deadpool::managed::Manager for KeyServerManager {
    type Type = DbConnection;
    type Error = rusqlite::Error;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let inner = deadpool::managed::Manager::create(&self.inner).await?;
        let lock_timeout = self.lock_timeout;
        inner
            .interact(move |conn| conn.busy_timeout(lock_timeout))
            .await
            .map_err(|_| rusqlite::Error::UnwindingPanic)??;
        Ok(DbConnection { inner })
    }

    async fn recycle(
        &self,
        obj: &mut Self::Type,
        metrics: &deadpool::managed::Metrics,
    ) -> deadpool::managed::RecycleResult<Self::Error> {
        deadpool::managed::Manager::recycle(&self.inner, &mut obj.inner, metrics).await
    }
}

/// A pooled connection to the keyserver database.
///
/// SQLite calls block, so every access runs on a thread where blocking is acceptable.
/// Callers must therefore be on a multi-threaded Tokio runtime.
pub(crate) struct DbConnection {
    inner: deadpool_sync::SyncWrapper<rusqlite::Connection>,
}

impl DbConnection {
    pub(crate) fn with_raw<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        tokio::task::block_in_place(|| {
            let guard = self
                .inner
                .lock()
                .map_err(|_| ErrorKind::Generic.context("database connection mutex poisoned"))?;
            f(guard.as_ref())
        })
    }

    pub(crate) fn with_raw_mut<T>(
        &self,
        f: impl FnOnce(&mut rusqlite::Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        tokio::task::block_in_place(|| {
            let mut guard = self
                .inner
                .lock()
                .map_err(|_| ErrorKind::Generic.context("database connection mutex poisoned"))?;
            f(guard.as_mut())
        })
    }
}
