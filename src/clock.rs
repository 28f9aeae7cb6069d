//! Logical day calendar
//!
//! A GitPoor day does not roll over at UTC midnight. Every instant is shifted
//! forward by [`DAY_OFFSET_HOURS`] before taking its calendar date, so a day
//! runs from 05:00 KST (20:00 UTC the evening before) to 04:59 KST the next
//! morning.
//!
//! Every place that needs "today", "yesterday" or the day a commit belongs to
//! goes through this module.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Hours added to a UTC instant before its date is read.
pub const DAY_OFFSET_HOURS: i64 = 4;

/// Map an instant to the logical day it belongs to.
pub fn logical_day(instant: DateTime<Utc>) -> NaiveDate {
    (instant + Duration::hours(DAY_OFFSET_HOURS)).date_naive()
}

/// The logical day immediately before `day`.
pub fn previous_day(day: NaiveDate) -> NaiveDate {
    day.pred_opt().unwrap_or(NaiveDate::MIN)
}

/// First instant that maps to `day`.
pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc() - Duration::hours(DAY_OFFSET_HOURS))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `YYYY-MM-DD`, the wire and storage form of a logical day.
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}
