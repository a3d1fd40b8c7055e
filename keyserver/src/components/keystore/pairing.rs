use rusqlite::{TransactionBehavior, named_params};
use tracing::{debug, error};

use super::{KeyPair, KeyStore, KeystoreError, NewEncryptionKey};
use crate::error::Error;

impl KeyStore {
    /// Stores a new pending pairing for a device, replacing any earlier pairings for the
    /// same device hash that were never claimed.
    ///
    /// An empty `hash_id` disables the device-hash checks. Otherwise, if any pairing for
    /// `hash_id` has already been claimed, this fails with [`KeystoreError::UsedHashId`]
    /// and nothing is written.
    pub async fn register_encryption_key(
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

        self.with_db_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| self.lock_failed(e))?;

            if !hash_id.is_empty() {
                let codes = {
                    let mut stmt = tx
                        .prepare(
                            "SELECT one_time_code
                            FROM encryption_keys
                            WHERE hash_id = :hash_id",
                        )
                        .map_err(|e| self.lock_failed(e))?;
                    stmt.query_map(named_params! { ":hash_id": hash_id }, |row| {
                        row.get::<_, Option<String>>(0)
                    })
                    .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
                    .map_err(|e| self.lock_failed(e))?
                };

                if codes.iter().any(Option::is_none) {
                    return Err(KeystoreError::UsedHashId.into());
                }

                if !codes.is_empty() {
                    let replaced = tx.execute(
                        "DELETE FROM encryption_keys
                        WHERE hash_id = :hash_id
                        AND one_time_code IS NOT NULL",
                        named_params! { ":hash_id": hash_id },
                    )?;
                    self.log(|| debug!(replaced, "Replaced unclaimed pairings for device"));
                }
            }

            self.insert_row(&tx, &row, issued_at)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Reports a failure to take or use the write lock for a device-hash check.
    fn lock_failed(&self, e: rusqlite::Error) -> Error {
        self.log(|| error!("{e}"));
        e.into()
    }
}
