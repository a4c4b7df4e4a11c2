//! Rotation-time planning.
//!
//! Time-based rotation fires on multiples of the configured interval,
//! aligned to the collector's local timezone so that e.g. a daily interval
//! rolls files at local midnight rather than at a UTC-shifted hour.

use chrono::{DateTime, Local, TimeZone};

/// The next multiple of `age_minutes` (in the local timezone) strictly
/// greater than `now`. Returns `None` when time-based rotation is
/// disabled.
pub fn next_rotation_time(now: i64, age_minutes: i64) -> Option<i64> {
    if age_minutes <= 0 {
        return None;
    }
    let interval = age_minutes * 60;
    let offset = local_utc_offset(now);
    let mut t = now + offset;
    t -= t.rem_euclid(interval);
    t += interval;
    Some(t - offset)
}

fn local_utc_offset(now: i64) -> i64 {
    match Local.timestamp_opt(now, 0) {
        chrono::offset::LocalResult::Single(dt) => offset_secs(&dt),
        chrono::offset::LocalResult::Ambiguous(dt, _) => offset_secs(&dt),
        chrono::offset::LocalResult::None => 0,
    }
}

fn offset_secs(dt: &DateTime<Local>) -> i64 {
    dt.offset().local_minus_utc() as i64
}
