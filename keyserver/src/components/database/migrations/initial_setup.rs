use std::collections::HashSet;

use schemerz_rusqlite::RusqliteMigration;
use uuid::Uuid;

pub(super) const MIGRATION_ID: Uuid = Uuid::from_u128(0x5b1e_2c4a_8f03_4d7e_a9c2_61f0_3e8d_47b5);

pub(super) struct Migration;

impl schemerz::Migration<Uuid> for Migration {
    fn id(&self) -> Uuid {
        MIGRATION_ID
    }

    fn dependencies(&self) -> HashSet<Uuid> {
        HashSet::new()
    }

    fn description(&self) -> &'static str {
        "Creates the encryption key and diagnosis key tables."
    }
}

impl RusqliteMigration for Migration {
    type Error = rusqlite::Error;

    fn up(&self, transaction: &rusqlite::Transaction<'_>) -> Result<(), Self::Error> {
        transaction.execute_batch(
            "CREATE TABLE encryption_keys (
                region TEXT NOT NULL,
                originator TEXT NOT NULL,
                hash_id TEXT NOT NULL DEFAULT '',
                server_private_key BLOB NOT NULL,
                server_public_key BLOB NOT NULL,
                app_public_key BLOB UNIQUE,
                one_time_code TEXT,
                issued_at INTEGER NOT NULL,
                valid_from INTEGER,
                remaining_keys INTEGER NOT NULL
            );
            CREATE INDEX encryption_keys_hash_id ON encryption_keys (hash_id);
            CREATE INDEX encryption_keys_one_time_code ON encryption_keys (one_time_code);
            CREATE INDEX encryption_keys_server_public_key ON encryption_keys (server_public_key);
            CREATE TABLE diagnosis_keys (
                region TEXT NOT NULL,
                key_data BLOB NOT NULL UNIQUE,
                rolling_start_interval_number INTEGER NOT NULL,
                rolling_period INTEGER NOT NULL,
                transmission_risk_level INTEGER NOT NULL,
                hour_of_submission INTEGER NOT NULL
            );
            CREATE INDEX diagnosis_keys_region_hour ON diagnosis_keys (region, hour_of_submission);",
        )?;
        Ok(())
    }

    fn down(&self, transaction: &rusqlite::Transaction<'_>) -> Result<(), Self::Error> {
        transaction.execute_batch(
            "DROP TABLE diagnosis_keys;
            DROP TABLE encryption_keys;",
        )
    }
}
