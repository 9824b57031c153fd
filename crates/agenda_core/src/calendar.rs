use chrono::{DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DateError;

/// All current sources publish in peninsular Spanish time.
pub const REFERENCE_TZ: Tz = chrono_tz::Europe::Madrid;

/// A Gregorian calendar day, independent of any timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Result<Self, DateError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(CalendarDate)
            .ok_or(DateError::InvalidComponents { year, month, day })
    }

    /// Compile-time constructor for dates known to be valid.
    pub const fn from_ymd(year: i32, month: u32, day: u32) -> Self {
        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => CalendarDate(date),
            None => panic!("invalid calendar date literal"),
        }
    }

    /// Parses the `yyyy-MM-dd` form used on the command line.
    pub fn parse(value: &str) -> Result<Self, DateError> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(CalendarDate)
            .map_err(|_| DateError::Malformed(value.to_string()))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    /// Days since 0001-01-01 (day 1).
    pub fn day_number(&self) -> i64 {
        i64::from(self.0.num_days_from_ce())
    }

    pub fn succ(&self) -> Option<Self> {
        self.0.succ_opt().map(CalendarDate)
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// ISO form, e.g. `2019-07-01`.
    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// `dd/mm/yyyy`, the form the regional search forms expect.
    pub fn dmy(&self) -> String {
        self.0.format("%d/%m/%Y").to_string()
    }

    /// Local midnight of this day in the reference timezone.
    pub fn midnight(&self) -> DateTime<FixedOffset> {
        at_local_time(*self, 0, 0)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iso())
    }
}

impl FromStr for CalendarDate {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CalendarDate::parse(s)
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(value: NaiveDate) -> Self {
        CalendarDate(value)
    }
}

/// Today's date in the reference timezone.
pub fn today() -> CalendarDate {
    CalendarDate(Utc::now().with_timezone(&REFERENCE_TZ).date_naive())
}

/// Builds the instant for `hour:minute` on `date` in the reference timezone.
///
/// Out-of-range clock values fall back to midnight. A wall time skipped by a
/// DST transition is moved forward by one hour; an ambiguous one resolves to
/// the earlier instant.
pub fn at_local_time(date: CalendarDate, hour: u32, minute: u32) -> DateTime<FixedOffset> {
    let naive = date
        .0
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| date.0.and_time(chrono::NaiveTime::MIN));
    resolve_local(naive).fixed_offset()
}

fn resolve_local(naive: NaiveDateTime) -> DateTime<Tz> {
    match REFERENCE_TZ.from_local_datetime(&naive) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match REFERENCE_TZ.from_local_datetime(&shifted) {
                LocalResult::Single(instant) | LocalResult::Ambiguous(instant, _) => instant,
                LocalResult::None => REFERENCE_TZ.from_utc_datetime(&naive),
            }
        }
    }
}

/// Inclusive, ascending run of calendar days.
///
/// The range is a plain value: cloning it yields an independent cursor, and
/// calling [`range`] twice with the same bounds yields identical sequences.
#[derive(Debug, Clone)]
pub struct DateRange {
    next: Option<CalendarDate>,
    end: CalendarDate,
}

pub fn range(start: CalendarDate, end: CalendarDate) -> DateRange {
    DateRange {
        next: (start <= end).then_some(start),
        end,
    }
}

impl DateRange {
    pub fn remaining(&self) -> usize {
        match self.next {
            Some(next) => (self.end.day_number() - next.day_number() + 1) as usize,
            None => 0,
        }
    }
}

impl Iterator for DateRange {
    type Item = CalendarDate;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.succ().filter(|succ| *succ <= self.end);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for DateRange {}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> CalendarDate {
        CalendarDate::parse(s).unwrap()
    }

    #[test]
    fn range_is_inclusive_and_ascending() {
        let start = d("2020-02-27");
        let end = d("2020-03-02");
        let dates: Vec<_> = range(start, end).collect();

        assert_eq!(dates.len() as i64, end.day_number() - start.day_number() + 1);
        assert_eq!(dates.first(), Some(&start));
        assert_eq!(dates.last(), Some(&end));
        assert!(dates.iter().any(|date| date.iso() == "2020-02-29"));
        for pair in dates.windows(2) {
            assert_eq!(pair[1].day_number() - pair[0].day_number(), 1);
        }
    }

    #[test]
    fn range_with_start_after_end_is_empty() {
        assert_eq!(range(d("2020-01-02"), d("2020-01-01")).count(), 0);
    }

    #[test]
    fn single_day_range() {
        let day = d("2019-07-01");
        assert_eq!(range(day, day).collect::<Vec<_>>(), vec![day]);
    }

    #[test]
    fn range_steps_days_across_dst_changes() {
        let dates: Vec<_> = range(d("2019-03-30"), d("2019-04-01")).map(|d| d.iso()).collect();
        assert_eq!(dates, vec!["2019-03-30", "2019-03-31", "2019-04-01"]);
    }

    #[test]
    fn ranges_are_restartable() {
        let r = range(d("2019-01-01"), d("2019-01-10"));
        let mut first = r.clone();
        first.next();
        first.next();
        assert_eq!(r.count(), 10);
        assert_eq!(first.len(), 8);
    }

    #[test]
    fn rejects_invalid_components() {
        assert_eq!(
            CalendarDate::new(2019, 2, 29),
            Err(DateError::InvalidComponents { year: 2019, month: 2, day: 29 })
        );
        assert!(CalendarDate::new(2020, 2, 29).is_ok());
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(CalendarDate::parse("01/07/2019"), Err(DateError::Malformed(_))));
        assert!(matches!(CalendarDate::parse("2019-13-01"), Err(DateError::Malformed(_))));
    }

    #[test]
    fn midnight_uses_madrid_offsets() {
        assert_eq!(d("2019-07-01").midnight().to_rfc3339(), "2019-07-01T00:00:00+02:00");
        assert_eq!(d("2019-01-15").midnight().to_rfc3339(), "2019-01-15T00:00:00+01:00");
    }

    #[test]
    fn skipped_wall_time_moves_forward() {
        let instant = at_local_time(d("2019-03-31"), 2, 30);
        assert_eq!(instant.to_rfc3339(), "2019-03-31T03:30:00+02:00");
    }

    #[test]
    fn out_of_range_clock_falls_back_to_midnight() {
        assert_eq!(at_local_time(d("2019-07-01"), 25, 0), d("2019-07-01").midnight());
    }
}
