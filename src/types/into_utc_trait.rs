//! Normalization of caller-supplied instants to UTC.
//!
//! Callers may hand in any timezone-aware instant, or a naive wall-clock time which is then
//! read as local time (the machine's timezone), matching how people usually think of
//! "tomorrow at 14:00".

use chrono::{
    DateTime, FixedOffset, Local, LocalResult, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc,
};

pub trait IntoUtcDateTime {
    fn into_utc(self) -> DateTime<Utc>;
}

impl IntoUtcDateTime for NaiveDateTime {
    fn into_utc(self) -> DateTime<Utc> {
        wall_clock_to_utc(&Local, self)
    }
}

/// Reads `naive` as wall-clock time in `tz`.
///
/// A time in the repeated hour when clocks go back resolves to its first occurrence. A time
/// in the skipped hour when clocks go forward is read with the offset in force before the
/// skip, so 02:30 on a night that jumps from 02:00 to 03:00 becomes 03:30 after the jump.
fn wall_clock_to_utc<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => local.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Offset changes are months apart, a day earlier is before the skip.
            let before = tz
                .offset_from_utc_datetime(&(naive - TimeDelta::days(1)))
                .fix();
            let utc = naive - TimeDelta::seconds(i64::from(before.local_minus_utc()));
            Utc.from_utc_datetime(&utc)
        }
    }
}

impl IntoUtcDateTime for DateTime<Local> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

impl IntoUtcDateTime for DateTime<Utc> {
    fn into_utc(self) -> DateTime<Utc> {
        self
    }
}

impl IntoUtcDateTime for DateTime<FixedOffset> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}
