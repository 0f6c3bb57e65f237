//! Query window calculation
//!
//! Availability is always requested for a rental that starts at the next
//! half-hour boundary after "now" and lasts `RENTAL_DURATION_HOURS`.

use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Timelike};

/// Length of the rental the upstream API is asked about
pub const RENTAL_DURATION_HOURS: i64 = 3;

const HALF_HOUR_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<FixedOffset>,
    pub to: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn starting_at(from: DateTime<FixedOffset>) -> Self {
        Self {
            from,
            to: from + Duration::hours(RENTAL_DURATION_HOURS),
        }
    }

    /// Window starting at the next half-hour boundary strictly after `now`
    pub fn next_after<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self::starting_at(round_to_next_half_hour(now).fixed_offset())
    }

    /// `from` as ISO-8601 with milliseconds, e.g. `2025-01-14T15:00:00.000+01:00`
    pub fn from_iso(&self) -> String {
        self.from.to_rfc3339_opts(SecondsFormat::Millis, false)
    }

    pub fn to_iso(&self) -> String {
        self.to.to_rfc3339_opts(SecondsFormat::Millis, false)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from_iso(), self.to_iso())
    }
}

/// Next half-hour boundary strictly after `dt`, in the same timezone.
///
/// A boundary that does not exist locally (DST gap) moves forward to the
/// first one that does; an ambiguous one resolves to the earlier instant.
pub fn round_to_next_half_hour<Tz: TimeZone>(dt: &DateTime<Tz>) -> DateTime<Tz> {
    let timezone = dt.timezone();
    let mut naive = next_half_hour_naive(dt.naive_local());

    loop {
        match timezone.from_local_datetime(&naive) {
            LocalResult::Single(rounded) => return rounded,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => naive += Duration::minutes(i64::from(HALF_HOUR_MINUTES)),
        }
    }
}

/// Wall-clock rounding: index of the next half-hour block since midnight,
/// converted back to a time. Block 48 is midnight of the following day.
pub fn next_half_hour_naive(dt: NaiveDateTime) -> NaiveDateTime {
    let total_minutes = dt.hour() * 60 + dt.minute();
    let next_block = total_minutes / HALF_HOUR_MINUTES + 1;
    let new_total_minutes = next_block * HALF_HOUR_MINUTES;

    let midnight = dt.date().and_time(NaiveTime::MIN);
    midnight + Duration::minutes(i64::from(new_total_minutes))
}
