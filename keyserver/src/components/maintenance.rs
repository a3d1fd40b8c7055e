//! Scheduled retention sweeps.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

use super::{TaskHandle, diagnosis_keys::DiagnosisKeyStore, keystore::KeyStore};
use crate::{components::database::Database, config::KeyServerConfig, error::Error};

/// The number of rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Swept {
    pub(crate) encryption_keys: usize,
    pub(crate) diagnosis_keys: usize,
}

#[derive(Debug)]
pub(crate) struct Maintenance {
    keystore: KeyStore,
    diagnosis_keys: DiagnosisKeyStore,
    max_retention_days: u32,
    interval: Duration,
}

impl Maintenance {
    pub(crate) fn new(config: &KeyServerConfig, db: Database) -> Self {
        Self::from_stores(
            KeyStore::new(config, db.clone()),
            DiagnosisKeyStore::new(config, db),
            config,
        )
    }

    fn from_stores(
        keystore: KeyStore,
        diagnosis_keys: DiagnosisKeyStore,
        config: &KeyServerConfig,
    ) -> Self {
        Self {
            keystore,
            diagnosis_keys,
            max_retention_days: config.diagnosis_keys.max_retention_days(),
            interval: config.maintenance.interval(),
        }
    }

    /// Deletes every expired encryption key and diagnosis key.
    pub(crate) async fn sweep(&self) -> Result<Swept, Error> {
        let swept = Swept {
            encryption_keys: self.keystore.delete_expired_encryption_keys().await?,
            diagnosis_keys: self
                .diagnosis_keys
                .delete_expired_diagnosis_keys(self.max_retention_days)
                .await?,
        };
        info!(
            encryption_keys = swept.encryption_keys,
            diagnosis_keys = swept.diagnosis_keys,
            "Deleted expired keys",
        );
        Ok(swept)
    }

    /// Spawns a task that sweeps once per configured interval, starting immediately.
    pub(crate) fn spawn(self) -> TaskHandle {
        crate::spawn!("Maintenance", self.run())
    }

    /// A failed sweep is logged and retried at the next interval.
    async fn run(self) -> Result<(), Error> {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                error!("Retention sweep failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::{Maintenance, Swept};
    use crate::{
        components::{
            database::testing::TestDatabase,
            diagnosis_keys::DiagnosisKeyStore,
            keystore::{KeyPair, testing::test_keystore},
        },
        config::KeyServerConfig,
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_deletes_from_both_tables() {
        let db = TestDatabase::new().await.unwrap();
        let config = KeyServerConfig::default();
        let (keystore, clock, _) = test_keystore(db.database());
        let diagnosis_keys =
            DiagnosisKeyStore::new(&config, db.database()).with_clock(clock.clone());
        let maintenance = Maintenance::from_stores(keystore.clone(), diagnosis_keys, &config);

        keystore
            .insert_encryption_key("302", "portal-user", "", &KeyPair::generate(), "80311300")
            .await
            .unwrap();
        assert_eq!(maintenance.sweep().await.unwrap(), Swept::default());

        clock.advance(Duration::days(2));
        assert_eq!(
            maintenance.sweep().await.unwrap(),
            Swept {
                encryption_keys: 1,
                diagnosis_keys: 0,
            }
        );
    }
}
