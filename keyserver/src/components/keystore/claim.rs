use rusqlite::{TransactionBehavior, named_params};
use tracing::{debug, error};

use super::{KeyStore, KeystoreError};
use crate::{components::database, error::Error, timemath::most_recent_utc_midnight};

impl KeyStore {
    /// Redeems a one-time code for `app_public_key`, returning the server public key the
    /// device should seal its uploads to.
    ///
    /// Each code can be claimed at most once, and each application public key can be
    /// bound to at most one pairing. On success the pairing's validity window restarts at
    /// midnight UTC of the day the code was issued.
    pub async fn claim_one_time_code(
        &self,
        one_time_code: &str,
        app_public_key: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let code_threshold = self.one_time_code_threshold(self.clock.now());

        self.with_db_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let bound: i64 = tx.query_row(
                "SELECT COUNT(*)
                FROM encryption_keys
                WHERE app_public_key = :app_public_key",
                named_params! { ":app_public_key": app_public_key },
                |row| row.get(0),
            )?;
            if bound > 0 {
                return Err(KeystoreError::DuplicateKey.into());
            }

            let issued = {
                let mut stmt = tx.prepare(
                    "SELECT issued_at
                    FROM encryption_keys
                    WHERE one_time_code = :one_time_code",
                )?;
                let rows = stmt.query_map(named_params! { ":one_time_code": one_time_code }, |row| {
                    row.get::<_, i64>(0)
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let issued_at = match issued.as_slice() {
                [] => return Err(KeystoreError::InvalidOneTimeCode.into()),
                [issued_at] => database::from_timestamp(*issued_at)?,
                _ => {
                    let pairings = issued.len();
                    self.log(|| error!(pairings, "One-time code matched multiple pairings"));
                    return Err(KeystoreError::InvalidOneTimeCode.into());
                }
            };

            if issued_at <= code_threshold {
                return Err(KeystoreError::InvalidOneTimeCode.into());
            }

            let claimed = tx.execute(
                "UPDATE encryption_keys
                SET one_time_code = NULL,
                    app_public_key = :app_public_key,
                    valid_from = :valid_from
                WHERE one_time_code = :one_time_code
                AND issued_at > :code_threshold",
                named_params! {
                    ":app_public_key": app_public_key,
                    ":valid_from": database::to_timestamp(most_recent_utc_midnight(issued_at)),
                    ":one_time_code": one_time_code,
                    ":code_threshold": database::to_timestamp(code_threshold),
                },
            )?;
            if claimed != 1 {
                return Err(KeystoreError::InvalidOneTimeCode.into());
            }

            let server_public_key: Vec<u8> = tx.query_row(
                "SELECT server_public_key
                FROM encryption_keys
                WHERE app_public_key = :app_public_key",
                named_params! { ":app_public_key": app_public_key },
                |row| row.get(0),
            )?;

            tx.commit()?;
            self.log(|| debug!("Claimed one-time code"));
            Ok(server_public_key)
        })
        .await
    }
}
