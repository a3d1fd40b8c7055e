//! The keyserver's encryption key store.
//!
//! # Design
//!
//! Every device that wants to upload diagnosis keys is first issued a one-time code by a
//! health authority portal. The keyserver generates a server key pair for the code and
//! stores it in `encryption_keys`. When the device presents the code along with its own
//! public key, the code is redeemed ([`KeyStore::claim_one_time_code`]) and the device
//! receives the server public key. Later uploads are sealed to that key, and the upload
//! handler looks up the matching private key ([`KeyStore::private_key_for_public_key`]).
//!
//! ```text
//!   issue code             claim code               retention
//!  ───────────▶ Pending ─────────────▶ Claimed ──────────────────▶ (deleted)
//!                  │
//!                  │ code expires unclaimed, or re-paired via hash_id
//!                  ▼
//!              (deleted)
//! ```
//!
//! A portal may supply a deterministic hash of the device's identity, so that a device
//! can be re-issued a code if it never claimed the first one
//! ([`KeyStore::register_encryption_key`]). Once any pairing for the hash has been
//! claimed, the hash can never be used again.
//!
//! All state lives in the database. Multi-step protocols run inside a single
//! `BEGIN IMMEDIATE` transaction, which takes SQLite's write lock up front and so
//! serializes them against each other; the key store itself holds no locks.

use std::fmt;

use rusqlite::{OptionalExtension, named_params};
use secrecy::SecretVec;
use time::{Duration, OffsetDateTime};
use tracing::{Dispatch, debug};

use crate::{
    clock::{Clock, SharedClock},
    components::database::{self, Database},
    config::{KeyServerConfig, KeysSection},
    error::Error,
};

mod claim;
mod error;
mod keys;
mod pairing;

pub use error::KeystoreError;
pub use keys::KeyPair;

#[cfg(test)]
pub(crate) mod testing;


/// Stores server encryption key pairs and the one-time codes that bind them to devices.
#[derive(Clone)]
pub struct KeyStore {
    db: Database,
    clock: SharedClock,

    /// Where the key store's events are sent.
    ///
    /// This is captured when the key store is constructed, rather than looked up per
    /// call, so that events from request handlers land with the subscriber that owns the
    /// key store.
    log: Dispatch,

    encryption_key_validity_days: u32,
    one_time_code_expiry_minutes: u32,
    initial_remaining_keys: u32,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Creates a key store over `db` using the configured key lifetimes.
    pub fn new(config: &KeyServerConfig, db: Database) -> Self {
        Self::from_section(&config.keys, db)
    }

    fn from_section(keys: &KeysSection, db: Database) -> Self {
        Self {
            db,
            clock: SharedClock::default(),
            log: tracing::dispatcher::get_default(Dispatch::clone),
            encryption_key_validity_days: keys.encryption_key_validity_days(),
            one_time_code_expiry_minutes: keys.one_time_code_expiry_minutes(),
            initial_remaining_keys: keys.initial_remaining_keys(),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = SharedClock::new(clock);
        self
    }

    /// Replaces the dispatcher that receives the key store's events.
    pub fn with_log(mut self, log: Dispatch) -> Self {
        self.log = log;
        self
    }

    async fn with_db<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.db.handle().await?.with_raw(f)
    }

    async fn with_db_mut<T>(
        &self,
        f: impl FnOnce(&mut rusqlite::Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.db.handle().await?.with_raw_mut(f)
    }

    /// Runs `f` with the key store's dispatcher as the default.
    fn log<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.log, f)
    }

    /// Server key pairs older than this can no longer be used to decrypt uploads.
    fn validity_threshold(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - Duration::days(self.encryption_key_validity_days.into())
    }

    /// One-time codes issued before this can no longer be claimed.
    fn one_time_code_threshold(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - Duration::minutes(self.one_time_code_expiry_minutes.into())
    }

    /// Stores a new pending pairing without any device-hash checks.
    pub async fn insert_encryption_key(
        &self,
        region: &str,
        originator: &str,
        hash_id: &str,
        key_pair: &KeyPair,
        one_time_code: &str,
    ) -> Result<(), Error> {
        let row = NewEncryptionKey {
            region,
            originator,
            hash_id,
            key_pair,
            one_time_code,
        };
        let issued_at = self.clock.now();
        self.with_db(|conn| self.insert_row(conn, &row, issued_at))
            .await
    }

    fn insert_row(
        &self,
        conn: &rusqlite::Connection,
        row: &NewEncryptionKey<'_>,
        issued_at: OffsetDateTime,
    ) -> Result<(), Error> {
        conn.execute(
            "INSERT INTO encryption_keys (
                region, originator, hash_id, server_private_key, server_public_key,
                one_time_code, issued_at, remaining_keys
            )
            VALUES (
                :region, :originator, :hash_id, :server_private_key, :server_public_key,
                :one_time_code, :issued_at, :remaining_keys
            )",
            named_params! {
                ":region": row.region,
                ":originator": row.originator,
                ":hash_id": row.hash_id,
                ":server_private_key": row.key_pair.private_key(),
                ":server_public_key": row.key_pair.public_key(),
                ":one_time_code": row.one_time_code,
                ":issued_at": database::to_timestamp(issued_at),
                ":remaining_keys": self.initial_remaining_keys,
            },
        )?;
        self.log(|| debug!(region = row.region, "Issued one-time code"));
        Ok(())
    }

    /// Looks up the private key matching a server public key that is still within its
    /// validity window.
    pub async fn private_key_for_public_key(
        &self,
        server_public_key: &[u8],
    ) -> Result<Option<SecretVec<u8>>, Error> {
        let threshold = self.validity_threshold(self.clock.now());
        self.with_db(|conn| {
            let private_key = conn
                .query_row(
                    "SELECT server_private_key
                    FROM encryption_keys
                    WHERE server_public_key = :server_public_key
                    AND COALESCE(valid_from, issued_at) > :threshold
                    ORDER BY COALESCE(valid_from, issued_at) DESC
                    LIMIT 1",
                    named_params! {
                        ":server_public_key": server_public_key,
                        ":threshold": database::to_timestamp(threshold),
                    },
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(private_key.map(SecretVec::new))
        })
        .await
    }

    /// Deletes every pairing that can no longer be used: past its validity window,
    /// unclaimed past its one-time code's expiry, or with no upload quota left.
    ///
    /// Returns the number of pairings deleted.
    pub async fn delete_expired_encryption_keys(&self) -> Result<usize, Error> {
        let now = self.clock.now();
        let validity_threshold = self.validity_threshold(now);
        let code_threshold = self.one_time_code_threshold(now);
        let deleted = self
            .with_db(|conn| {
                conn.execute(
                    "DELETE FROM encryption_keys
                    WHERE COALESCE(valid_from, issued_at) < :validity_threshold
                    OR (issued_at < :code_threshold AND app_public_key IS NULL)
                    OR remaining_keys = 0",
                    named_params! {
                        ":validity_threshold": database::to_timestamp(validity_threshold),
                        ":code_threshold": database::to_timestamp(code_threshold),
                    },
                )
                .map_err(Error::from)
            })
            .await?;
        self.log(|| debug!(deleted, "Deleted expired encryption keys"));
        Ok(deleted)
    }

    /// Returns every pairing registered under a device hash, oldest first.
    pub async fn pairings_for_hash_id(
        &self,
        hash_id: &str,
    ) -> Result<Vec<EncryptionKeyRecord>, Error> {
        self.with_db(|conn| {
            let mut stmt = conn.prepare(
                "SELECT region, originator, hash_id, server_public_key, app_public_key,
                    one_time_code, issued_at, valid_from, remaining_keys
                FROM encryption_keys
                WHERE hash_id = :hash_id
                ORDER BY issued_at, rowid",
            )?;
            let mut rows = stmt.query(named_params! { ":hash_id": hash_id })?;
            let mut records = vec![];
            while let Some(row) = rows.next()? {
                records.push(EncryptionKeyRecord {
                    region: row.get("region")?,
                    originator: row.get("originator")?,
                    hash_id: row.get("hash_id")?,
                    server_public_key: row.get("server_public_key")?,
                    app_public_key: row.get("app_public_key")?,
                    one_time_code: row.get("one_time_code")?,
                    issued_at: database::from_timestamp(row.get("issued_at")?)?,
                    valid_from: row
                        .get::<_, Option<i64>>("valid_from")?
                        .map(database::from_timestamp)
                        .transpose()?,
                    remaining_keys: row.get("remaining_keys")?,
                });
            }
            Ok(records)
        })
        .await
    }
}

/// The columns of a pairing supplied by its issuer.
struct NewEncryptionKey<'a> {
    region: &'a str,
    originator: &'a str,
    hash_id: &'a str,
    key_pair: &'a KeyPair,
    one_time_code: &'a str,
}

/// Where a pairing is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    /// The one-time code has been issued and not yet claimed.
    Pending,
    /// The one-time code has been exchanged for an application public key.
    Claimed,
    /// Neither a one-time code nor an application public key is present. The pairing
    /// can never be claimed.
    Abandoned,
}

/// A row of `encryption_keys`, without its private key.
pub struct EncryptionKeyRecord {
    /// The tenant that issued the one-time code.
    pub region: String,
    /// The issuing portal user or system.
    pub originator: String,
    /// The device hash, or the empty string.
    pub hash_id: String,
    /// The raw server public key.
    pub server_public_key: Vec<u8>,
    /// The device's public key, once claimed.
    pub app_public_key: Option<Vec<u8>>,
    /// The one-time code, until claimed.
    pub one_time_code: Option<String>,
    /// When the one-time code was issued.
    pub issued_at: OffsetDateTime,
    /// Midnight UTC of the day the code was issued, once claimed.
    pub valid_from: Option<OffsetDateTime>,
    /// How many more diagnosis keys the device may upload.
    pub remaining_keys: u32,
}

impl EncryptionKeyRecord {
    /// Returns where this pairing is in its lifecycle.
    pub fn state(&self) -> PairingState {
        match (&self.one_time_code, &self.app_public_key) {
            (Some(_), _) => PairingState::Pending,
            (None, Some(_)) => PairingState::Claimed,
            (None, None) => PairingState::Abandoned,
        }
    }
}

impl fmt::Debug for EncryptionKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyRecord")
            .field("region", &self.region)
            .field("originator", &self.originator)
            .field("hash_id", &self.hash_id)
            .field("server_public_key", &hex::encode(&self.server_public_key))
            .field("app_public_key", &self.app_public_key.as_ref().map(hex::encode))
            .field("one_time_code", &self.one_time_code)
            .field("issued_at", &self.issued_at)
            .field("valid_from", &self.valid_from)
            .field("remaining_keys", &self.remaining_keys)
            .finish()
    }
}
