//! Documentation about the keyserver database structure.
//!
//! The database structure is managed by [`Database::open`], which applies migrations
//! (defined in [`migrations`]) that produce the current structure.
//!
//! The SQL code in this module's constants encodes the current database structure, as
//! represented internally by SQLite. We do not use these constants at runtime; instead we
//! check the output of the migrations in a test, to pin the expected database structure.
//!
//! Timestamps are stored as integer seconds since the Unix epoch.
//!
//! [`Database::open`]: super::Database::open
//! [`migrations`]: super::migrations

// The constants in this module are only used in tests, but `#[cfg(test)]` prevents them
// from showing up in `cargo doc --document-private-items`.
#![allow(dead_code)]

/// Stores server encryption key pairs, and the one-time codes that bind them to devices.
///
/// A row is *pending* while `one_time_code` is set, *claimed* once the code has been
/// exchanged for an `app_public_key`, and *abandoned* if neither is set.
///
/// ### Columns
///
/// - `region`: The tenant that issued the one-time code.
/// - `originator`: The identifier of the issuing portal user or system.
/// - `hash_id`: A deterministic hash identifying the device being paired, or the empty
///   string if the issuer did not supply one.
/// - `server_private_key`: The raw private key of the server key pair.
/// - `server_public_key`: The raw public key of the server key pair.
/// - `app_public_key`: The device's public key, set exactly once when the one-time code
///   is claimed.
/// - `one_time_code`: The code that the device presents to claim this key pair, cleared
///   on claim.
/// - `issued_at`: The time at which the one-time code was issued.
/// - `valid_from`: Midnight UTC of the day `issued_at` falls in, set on claim. Validity
///   of the server key pair is counted from `COALESCE(valid_from, issued_at)`.
/// - `remaining_keys`: How many more diagnosis keys the device may upload.
pub(crate) const TABLE_ENCRYPTION_KEYS: &str = r#"
CREATE TABLE encryption_keys (
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
)
"#;

pub(crate) const INDEX_ENCRYPTION_KEYS_HASH_ID: &str = r#"
CREATE INDEX encryption_keys_hash_id ON encryption_keys (hash_id)
"#;

pub(crate) const INDEX_ENCRYPTION_KEYS_ONE_TIME_CODE: &str = r#"
CREATE INDEX encryption_keys_one_time_code ON encryption_keys (one_time_code)
"#;

pub(crate) const INDEX_ENCRYPTION_KEYS_SERVER_PUBLIC_KEY: &str = r#"
CREATE INDEX encryption_keys_server_public_key ON encryption_keys (server_public_key)
"#;

/// Stores temporary exposure keys uploaded by devices after a positive diagnosis.
///
/// Rows are never modified after insertion; they are removed only by retention
/// deletion.
///
/// ### Columns
///
/// - `region`: The region of the encryption key under which the key was uploaded.
/// - `key_data`: The opaque temporary exposure key.
/// - `rolling_start_interval_number`: The 10-minute interval in which the key became
///   active.
/// - `rolling_period`: How many 10-minute intervals the key was active for.
/// - `transmission_risk_level`: The risk level assigned to the key by the device.
/// - `hour_of_submission`: The hour (since the Unix epoch) in which the server received
///   the key.
pub(crate) const TABLE_DIAGNOSIS_KEYS: &str = r#"
CREATE TABLE diagnosis_keys (
    region TEXT NOT NULL,
    key_data BLOB NOT NULL UNIQUE,
    rolling_start_interval_number INTEGER NOT NULL,
    rolling_period INTEGER NOT NULL,
    transmission_risk_level INTEGER NOT NULL,
    hour_of_submission INTEGER NOT NULL
)
"#;

pub(crate) const INDEX_DIAGNOSIS_KEYS_REGION_HOUR: &str = r#"
CREATE INDEX diagnosis_keys_region_hour ON diagnosis_keys (region, hour_of_submission)
"#;
