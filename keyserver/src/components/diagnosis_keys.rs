//! Storage for uploaded diagnosis keys.
//!
//! Diagnosis keys are bucketed by the hour in which the server received them. Export
//! builders read one region's keys for a range of hours, filtered to keys that are still
//! epidemiologically relevant, and retention deletes whole days of buckets.

use std::fmt;

use rusqlite::{OptionalExtension, TransactionBehavior, named_params};
use time::Duration;
use tracing::{Dispatch, debug};

use crate::{
    clock::{Clock, SharedClock},
    components::{database::Database, keystore::KeystoreError},
    config::KeyServerConfig,
    error::Error,
    timemath::{
        DIAGNOSIS_KEY_VALIDITY_DAYS, date_number, hour_number, hour_number_at_start_of_date,
        rolling_start_interval_number_plus_days,
    },
};

use super::database;

#[cfg(test)]
mod tests;

/// A temporary exposure key as uploaded by a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemporaryExposureKey {
    /// The opaque key material.
    pub key_data: Vec<u8>,
    /// The 10-minute interval in which the key became active.
    pub rolling_start_interval_number: u32,
    /// How many 10-minute intervals the key was active for.
    pub rolling_period: u32,
    /// The risk level assigned by the device.
    pub transmission_risk_level: u8,
}

/// A row of `diagnosis_keys`.
#[derive(Clone, PartialEq, Eq)]
pub struct DiagnosisKeyRecord {
    /// The region of the key pair the key was uploaded under.
    pub region: String,
    /// The opaque key material.
    pub key_data: Vec<u8>,
    /// The 10-minute interval in which the key became active.
    pub rolling_start_interval_number: u32,
    /// How many 10-minute intervals the key was active for.
    pub rolling_period: u32,
    /// The risk level assigned by the device.
    pub transmission_risk_level: u8,
    /// The hour (since the Unix epoch) in which the key was received.
    pub hour_of_submission: u32,
}

impl fmt::Debug for DiagnosisKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisKeyRecord")
            .field("region", &self.region)
            .field("key_data", &hex::encode(&self.key_data))
            .field(
                "rolling_start_interval_number",
                &self.rolling_start_interval_number,
            )
            .field("rolling_period", &self.rolling_period)
            .field("transmission_risk_level", &self.transmission_risk_level)
            .field("hour_of_submission", &self.hour_of_submission)
            .finish()
    }
}

/// A cursor over the results of [`DiagnosisKeyStore::with_keys_for_hour_range`].
///
/// Rows are decoded one at a time as the cursor is advanced. The cursor borrows the
/// underlying statement, and cannot outlive the visitor it was handed to.
pub struct DiagnosisKeys<'stmt> {
    rows: rusqlite::Rows<'stmt>,
    failed: bool,
}

impl Iterator for DiagnosisKeys<'_> {
    type Item = Result<DiagnosisKeyRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let record = match self.rows.next() {
            Ok(Some(row)) => read_record(row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match record {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e.into()))
            }
        }
    }
}

fn read_record(row: &rusqlite::Row<'_>) -> Result<DiagnosisKeyRecord, rusqlite::Error> {
    Ok(DiagnosisKeyRecord {
        region: row.get("region")?,
        key_data: row.get("key_data")?,
        rolling_start_interval_number: row.get("rolling_start_interval_number")?,
        rolling_period: row.get("rolling_period")?,
        transmission_risk_level: row.get("transmission_risk_level")?,
        hour_of_submission: row.get("hour_of_submission")?,
    })
}

/// Stores diagnosis keys uploaded by paired devices.
#[derive(Clone)]
pub struct DiagnosisKeyStore {
    db: Database,
    clock: SharedClock,
    log: Dispatch,
    encryption_key_validity_days: u32,
}

impl fmt::Debug for DiagnosisKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisKeyStore")
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl DiagnosisKeyStore {
    /// Creates a diagnosis key store over `db`.
    pub fn new(config: &KeyServerConfig, db: Database) -> Self {
        Self {
            db,
            clock: SharedClock::default(),
            log: tracing::dispatcher::get_default(Dispatch::clone),
            encryption_key_validity_days: config.keys.encryption_key_validity_days(),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = SharedClock::new(clock);
        self
    }

    /// Replaces the dispatcher that receives the store's events.
    pub fn with_log(mut self, log: Dispatch) -> Self {
        self.log = log;
        self
    }

    fn log<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.log, f)
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

    /// Visits the diagnosis keys for `region` that were submitted in the hours
    /// `[start_hour, end_hour)`, in ascending order of key data.
    ///
    /// Keys that became active 14 days or more before `current_rsin` are skipped,
    /// whenever they were submitted.
    pub async fn with_keys_for_hour_range<T>(
        &self,
        region: &str,
        start_hour: u32,
        end_hour: u32,
        current_rsin: u32,
        f: impl FnOnce(DiagnosisKeys<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let min_rsin =
            rolling_start_interval_number_plus_days(current_rsin, -DIAGNOSIS_KEY_VALIDITY_DAYS);
        self.with_db(|conn| {
            let mut stmt = conn.prepare(
                "SELECT region, key_data, rolling_start_interval_number, rolling_period,
                    transmission_risk_level, hour_of_submission
                FROM diagnosis_keys
                WHERE hour_of_submission >= :start_hour
                AND hour_of_submission < :end_hour
                AND rolling_start_interval_number > :min_rsin
                AND region = :region
                ORDER BY key_data",
            )?;
            let rows = stmt.query(named_params! {
                ":start_hour": start_hour,
                ":end_hour": end_hour,
                ":min_rsin": min_rsin,
                ":region": region,
            })?;
            f(DiagnosisKeys {
                rows,
                failed: false,
            })
        })
        .await
    }

    /// Deletes diagnosis keys submitted before midnight UTC `max_retention_days` days
    /// ago.
    ///
    /// Returns the number of keys deleted.
    pub async fn delete_expired_diagnosis_keys(
        &self,
        max_retention_days: u32,
    ) -> Result<usize, Error> {
        let date = date_number(self.clock.now()).saturating_sub(max_retention_days);
        let min_hour = hour_number_at_start_of_date(date);
        let deleted = self
            .with_db(|conn| {
                conn.execute(
                    "DELETE FROM diagnosis_keys WHERE hour_of_submission < :min_hour",
                    named_params! { ":min_hour": min_hour },
                )
                .map_err(Error::from)
            })
            .await?;
        self.log(|| debug!(deleted, "Deleted expired diagnosis keys"));
        Ok(deleted)
    }

    /// Stores diagnosis keys uploaded by the device bound to `app_public_key`, charging
    /// them against its upload quota.
    ///
    /// Keys whose data has already been stored are skipped, but still count towards the
    /// quota.
    pub async fn store_diagnosis_keys(
        &self,
        app_public_key: &[u8],
        keys: &[TemporaryExposureKey],
    ) -> Result<(), Error> {
        let now = self.clock.now();
        let validity_threshold = now - Duration::days(self.encryption_key_validity_days.into());
        let hour_of_submission = hour_number(now);

        self.with_db_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let (region, remaining_keys) = tx
                .query_row(
                    "SELECT region, remaining_keys
                    FROM encryption_keys
                    WHERE app_public_key = :app_public_key
                    AND COALESCE(valid_from, issued_at) > :validity_threshold",
                    named_params! {
                        ":app_public_key": app_public_key,
                        ":validity_threshold": database::to_timestamp(validity_threshold),
                    },
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
                )
                .optional()?
                .ok_or(KeystoreError::UnknownAppPublicKey)?;

            if remaining_keys == 0 {
                return Err(KeystoreError::KeysConsumed.into());
            }
            let count = u32::try_from(keys.len()).map_err(|_| KeystoreError::TooManyKeys)?;
            if remaining_keys < count {
                return Err(KeystoreError::TooManyKeys.into());
            }

            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO diagnosis_keys (
                        region, key_data, rolling_start_interval_number, rolling_period,
                        transmission_risk_level, hour_of_submission
                    )
                    VALUES (
                        :region, :key_data, :rolling_start_interval_number, :rolling_period,
                        :transmission_risk_level, :hour_of_submission
                    )",
                )?;
                for key in keys {
                    inserted += stmt.execute(named_params! {
                        ":region": region,
                        ":key_data": key.key_data,
                        ":rolling_start_interval_number": key.rolling_start_interval_number,
                        ":rolling_period": key.rolling_period,
                        ":transmission_risk_level": key.transmission_risk_level,
                        ":hour_of_submission": hour_of_submission,
                    })?;
                }
            }

            tx.execute(
                "UPDATE encryption_keys
                SET remaining_keys = remaining_keys - :count
                WHERE app_public_key = :app_public_key",
                named_params! {
                    ":count": count,
                    ":app_public_key": app_public_key,
                },
            )?;

            tx.commit()?;
            self.log(|| {
                debug!(
                    region = %region,
                    inserted,
                    duplicates = keys.len() - inserted,
                    "Stored diagnosis keys"
                )
            });
            Ok(())
        })
        .await
    }
}
