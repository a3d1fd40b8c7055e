use rusqlite::named_params;
use time::Duration;
use tracing::Level;

use super::{DiagnosisKeyStore, TemporaryExposureKey};
use crate::{
    clock::{Clock, testing::MockClock},
    components::{
        database::testing::TestDatabase,
        keystore::{
            KeyPair, KeyStore, KeystoreError,
            testing::{CapturedEvents, START, capture_events, test_keystore},
        },
    },
    config::KeyServerConfig,
    error::Error,
    timemath::{ROLLING_INTERVALS_PER_DAY, date_number, hour_number, rolling_start_interval_number},
};

const REGION: &str = "302";
const CODE: &str = "80311300";
const APP_KEY: [u8; 32] = [7; 32];

struct Fixture {
    db: TestDatabase,
    keystore: KeyStore,
    clock: MockClock,
    store: DiagnosisKeyStore,
    events: CapturedEvents,
}

impl Fixture {
    async fn new() -> Self {
        let db = TestDatabase::new().await.unwrap();
        let (keystore, clock, _) = test_keystore(db.database());
        let (log, events) = capture_events();
        let store = DiagnosisKeyStore::new(&KeyServerConfig::default(), db.database())
            .with_clock(clock.clone())
            .with_log(log);
        Fixture {
            db,
            keystore,
            clock,
            store,
            events,
        }
    }

    /// Pairs [`APP_KEY`] with a fresh server key pair.
    async fn claim(&self) {
        self.keystore
            .insert_encryption_key(REGION, "portal-user", "", &KeyPair::generate(), CODE)
            .await
            .unwrap();
        self.keystore
            .claim_one_time_code(CODE, &APP_KEY)
            .await
            .unwrap();
    }

    /// Inserts a diagnosis key directly, bypassing quota checks.
    async fn insert(&self, region: &str, key_data: &[u8], rsin: u32, hour: u32) {
        self.db
            .handle()
            .await
            .unwrap()
            .with_raw(|conn| {
                conn.execute(
                    "INSERT INTO diagnosis_keys (
                        region, key_data, rolling_start_interval_number, rolling_period,
                        transmission_risk_level, hour_of_submission
                    )
                    VALUES (:region, :key_data, :rsin, 144, 4, :hour)",
                    named_params! {
                        ":region": region,
                        ":key_data": key_data,
                        ":rsin": rsin,
                        ":hour": hour,
                    },
                )
                .map_err(Error::from)
            })
            .unwrap();
    }

    async fn count(&self) -> i64 {
        self.db
            .handle()
            .await
            .unwrap()
            .with_raw(|conn| {
                conn.query_row("SELECT COUNT(*) FROM diagnosis_keys", [], |row| row.get(0))
                    .map_err(Error::from)
            })
            .unwrap()
    }

    async fn remaining_keys(&self) -> u32 {
        self.keystore
            .pairings_for_hash_id("")
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.app_public_key.as_deref() == Some(APP_KEY.as_slice()))
            .map(|p| p.remaining_keys)
            .unwrap()
    }

    async fn key_data_for_hours(&self, region: &str, start: u32, end: u32) -> Vec<Vec<u8>> {
        let current_rsin = rolling_start_interval_number(self.clock.now());
        self.store
            .with_keys_for_hour_range(region, start, end, current_rsin, |keys| {
                keys.map(|key| key.map(|key| key.key_data)).collect()
            })
            .await
            .unwrap()
    }
}

fn tek(key_data: &[u8]) -> TemporaryExposureKey {
    TemporaryExposureKey {
        key_data: key_data.to_vec(),
        rolling_start_interval_number: rolling_start_interval_number(START) - 144,
        rolling_period: 144,
        transmission_risk_level: 4,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn keys_are_returned_in_key_data_order() {
    let f = Fixture::new().await;
    let rsin = rolling_start_interval_number(START);
    let hour = hour_number(START);

    f.insert(REGION, b"ccc", rsin, hour).await;
    f.insert(REGION, b"aaa", rsin, hour - 1).await;
    f.insert(REGION, b"bbb", rsin, hour).await;

    assert_eq!(
        f.key_data_for_hours(REGION, hour - 1, hour + 1).await,
        vec![b"aaa".to_vec(), b"bbb".to_vec(), b"ccc".to_vec()],
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn hour_range_is_half_open_and_region_exact() {
    let f = Fixture::new().await;
    let rsin = rolling_start_interval_number(START);
    let hour = hour_number(START);

    f.insert(REGION, b"before", rsin, hour - 1).await;
    f.insert(REGION, b"start", rsin, hour).await;
    f.insert(REGION, b"end", rsin, hour + 1).await;
    f.insert("3020", b"other-region", rsin, hour).await;

    assert_eq!(
        f.key_data_for_hours(REGION, hour, hour + 1).await,
        vec![b"start".to_vec()],
    );
    assert!(f.key_data_for_hours(REGION, hour, hour).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn keys_older_than_fourteen_days_are_skipped() {
    let f = Fixture::new().await;
    let current_rsin = rolling_start_interval_number(START);
    let floor = current_rsin - 14 * ROLLING_INTERVALS_PER_DAY as u32;
    let hour = hour_number(START);

    // Submitted today, but active too long ago to be relevant.
    f.insert(REGION, b"at-floor", floor, hour).await;
    f.insert(REGION, b"above-floor", floor + 1, hour).await;

    assert_eq!(
        f.key_data_for_hours(REGION, hour, hour + 1).await,
        vec![b"above-floor".to_vec()],
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn visitor_can_stop_early() {
    let f = Fixture::new().await;
    let rsin = rolling_start_interval_number(START);
    let hour = hour_number(START);
    for key in [b"k1", b"k2", b"k3"] {
        f.insert(REGION, key, rsin, hour).await;
    }

    let first = f
        .store
        .with_keys_for_hour_range(REGION, hour, hour + 1, rsin, |mut keys| {
            keys.next().transpose()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.key_data, b"k1");
    assert_eq!(first.region, REGION);
    assert_eq!(first.rolling_period, 144);
    assert_eq!(first.transmission_risk_level, 4);
    assert_eq!(first.hour_of_submission, hour);

    // The cursor was released, so writers are not blocked.
    f.insert(REGION, b"k4", rsin, hour).await;
    assert_eq!(f.key_data_for_hours(REGION, hour, hour + 1).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_diagnosis_keys_are_deleted() {
    let f = Fixture::new().await;
    let rsin = rolling_start_interval_number(START);
    let cutoff = (date_number(START) - 14) * 24;

    f.insert(REGION, b"old", rsin, cutoff - 1).await;
    f.insert(REGION, b"kept", rsin, cutoff).await;
    f.insert(REGION, b"new", rsin, hour_number(START)).await;

    assert_eq!(f.store.delete_expired_diagnosis_keys(14).await.unwrap(), 1);
    assert_eq!(f.count().await, 2);

    // Retention is counted in whole dates, so the cutoff moves at midnight.
    f.clock.advance(Duration::hours(11));
    assert_eq!(f.store.delete_expired_diagnosis_keys(14).await.unwrap(), 0);
    f.clock.advance(Duration::hours(1));
    assert_eq!(f.store.delete_expired_diagnosis_keys(14).await.unwrap(), 1);
    assert_eq!(f.count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stored_keys_are_charged_to_quota() {
    let f = Fixture::new().await;
    f.claim().await;

    f.store
        .store_diagnosis_keys(&APP_KEY, &[tek(b"a"), tek(b"b")])
        .await
        .unwrap();
    assert_eq!(f.remaining_keys().await, 26);

    // Re-uploading a key is not an error, and still costs quota.
    f.store
        .store_diagnosis_keys(&APP_KEY, &[tek(b"b"), tek(b"c")])
        .await
        .unwrap();
    assert_eq!(f.remaining_keys().await, 24);
    assert_eq!(f.count().await, 3);
    assert_eq!(
        f.events.at(Level::DEBUG),
        vec!["Stored diagnosis keys".to_owned(); 2],
    );

    let hour = hour_number(START);
    let keys = f.key_data_for_hours(REGION, hour, hour + 1).await;
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_limits_uploads() {
    let f = Fixture::new().await;
    f.claim().await;

    let keys = (0..29u8).map(|i| tek(&[i])).collect::<Vec<_>>();
    let err = f
        .store
        .store_diagnosis_keys(&APP_KEY, &keys)
        .await
        .unwrap_err();
    assert_eq!(err.keystore_error(), Some(&KeystoreError::TooManyKeys));
    assert_eq!(f.count().await, 0);
    assert_eq!(f.remaining_keys().await, 28);

    f.store
        .store_diagnosis_keys(&APP_KEY, &keys[..28])
        .await
        .unwrap();
    assert_eq!(f.remaining_keys().await, 0);

    let err = f
        .store
        .store_diagnosis_keys(&APP_KEY, &keys[28..])
        .await
        .unwrap_err();
    assert_eq!(err.keystore_error(), Some(&KeystoreError::KeysConsumed));
}

#[tokio::test(flavor = "multi_thread")]
async fn uploads_require_a_valid_claimed_pairing() {
    let f = Fixture::new().await;

    let err = f
        .store
        .store_diagnosis_keys(&APP_KEY, &[tek(b"a")])
        .await
        .unwrap_err();
    assert_eq!(err.keystore_error(), Some(&KeystoreError::UnknownAppPublicKey));

    f.claim().await;
    f.clock.advance(Duration::days(15));
    let err = f
        .store
        .store_diagnosis_keys(&APP_KEY, &[tek(b"a")])
        .await
        .unwrap_err();
    assert_eq!(err.keystore_error(), Some(&KeystoreError::UnknownAppPublicKey));
    assert_eq!(f.count().await, 0);
}
