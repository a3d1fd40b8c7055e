//! Date, hour, and rolling-interval arithmetic.
//!
//! The exposure notification protocol identifies when a temporary exposure key became
//! active by its rolling start interval number: the count of 10-minute intervals since
//! the Unix epoch. Diagnosis keys are bucketed on ingestion by hour number (hours since
//! the epoch), and retention is computed on date numbers (days since the epoch). All
//! three are measured in UTC.

use time::{OffsetDateTime, Time, UtcOffset};

/// The length of one rolling interval, in seconds.
pub const ROLLING_INTERVAL_SECONDS: i64 = 10 * 60;

/// The number of rolling intervals in one day.
pub const ROLLING_INTERVALS_PER_DAY: i64 = 24 * 60 * 60 / ROLLING_INTERVAL_SECONDS;

/// How many days a temporary exposure key stays epidemiologically relevant.
pub const DIAGNOSIS_KEY_VALIDITY_DAYS: i32 = 14;

const SECONDS_PER_HOUR: i64 = 60 * 60;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;

fn saturate(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

/// Returns the number of whole days between the Unix epoch and `t`.
pub fn date_number(t: OffsetDateTime) -> u32 {
    saturate(t.unix_timestamp().div_euclid(SECONDS_PER_DAY))
}

/// Returns the number of whole hours between the Unix epoch and `t`.
pub fn hour_number(t: OffsetDateTime) -> u32 {
    saturate(t.unix_timestamp().div_euclid(SECONDS_PER_HOUR))
}

/// Returns the hour number of midnight UTC at the start of the given date number.
pub fn hour_number_at_start_of_date(date_number: u32) -> u32 {
    saturate(i64::from(date_number) * 24)
}

/// Returns the rolling interval number containing `t`.
pub fn rolling_start_interval_number(t: OffsetDateTime) -> u32 {
    saturate(t.unix_timestamp().div_euclid(ROLLING_INTERVAL_SECONDS))
}

/// Shifts a rolling interval number by a whole number of days (which may be negative).
pub fn rolling_start_interval_number_plus_days(rsin: u32, days: i32) -> u32 {
    saturate(i64::from(rsin) + i64::from(days) * ROLLING_INTERVALS_PER_DAY)
}

/// Returns midnight UTC at the start of the day containing `t`.
pub fn most_recent_utc_midnight(t: OffsetDateTime) -> OffsetDateTime {
    t.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT)
}
