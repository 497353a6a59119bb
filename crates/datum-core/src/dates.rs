//! Calendar helpers.
//!
//! All arithmetic is in calendar days on [`NaiveDate`]; leap seconds and
//! time zones other than UTC never enter the picture.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::ConfigError;

/// An inclusive window of days, `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DayWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if end < start {
            return Err(ConfigError::invalid(
                "END_DATE",
                end.to_string(),
                format!("must not precede START_DATE {start}"),
            ));
        }
        Ok(Self { start, end })
    }

    /// A window covering a single day.
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of days in the window.
    pub fn len(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every day in the window, oldest first.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Parse an ISO-8601 day (`YYYY-MM-DD`).
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Parse a UTC timestamp in any of the shapes found in location and
/// calibration records: RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.f]`
/// (read as UTC), or a bare day (read as midnight).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    parse_day(raw).map(midnight)
}

/// UTC midnight at the start of `day`.
pub fn midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// `day` shifted by `offset` calendar days, saturating at the calendar edges.
pub fn shift(day: NaiveDate, offset: i64) -> NaiveDate {
    let magnitude = Days::new(offset.unsigned_abs());
    let shifted = if offset >= 0 {
        day.checked_add_days(magnitude)
    } else {
        day.checked_sub_days(magnitude)
    };
    shifted.unwrap_or(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn day(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    #[test]
    fn test_window_days_inclusive() {
        let window = DayWindow::new(day("2020-01-05"), day("2020-01-07")).unwrap();
        let days: Vec<_> = window.days().collect();
        assert_eq!(days, vec![day("2020-01-05"), day("2020-01-06"), day("2020-01-07")]);
        assert_eq!(window.len(), 3);
        assert!(window.contains(day("2020-01-07")));
        assert!(!window.contains(day("2020-01-08")));
    }

    #[test]
    fn test_window_rejects_reversed_bounds() {
        assert!(DayWindow::new(day("2020-01-07"), day("2020-01-05")).is_err());
        assert_eq!(DayWindow::single(day("2020-01-05")).len(), 1);
    }

    #[test]
    fn test_window_crosses_year_boundary() {
        let window = DayWindow::new(day("2019-12-30"), day("2020-01-02")).unwrap();
        let days: Vec<_> = window.days().map(|d| d.to_string()).collect();
        assert_eq!(days, vec!["2019-12-30", "2019-12-31", "2020-01-01", "2020-01-02"]);
    }

    #[test]
    fn test_parse_timestamp_shapes() {
        let rfc = parse_timestamp("2020-01-05T12:30:00Z").unwrap();
        assert_eq!(rfc.hour(), 12);

        let naive = parse_timestamp("2020-01-05T00:00:00.000").unwrap();
        assert_eq!(naive, midnight(day("2020-01-05")));

        let bare = parse_timestamp("2020-01-05").unwrap();
        assert_eq!(bare, midnight(day("2020-01-05")));

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_shift_handles_month_and_leap_year() {
        assert_eq!(shift(day("2020-03-01"), -1), day("2020-02-29"));
        assert_eq!(shift(day("2020-01-31"), 1), day("2020-02-01"));
        assert_eq!(shift(day("2020-01-06"), 0), day("2020-01-06"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: a window holds exactly `span + 1` consecutive days.
            #[test]
            fn prop_window_days_are_consecutive(offset in 0i64..20_000, span in 0i64..400) {
                let start = shift(day("1990-01-01"), offset);
                let window = DayWindow::new(start, shift(start, span)).unwrap();
                let days: Vec<_> = window.days().collect();

                prop_assert_eq!(days.len(), window.len());
                prop_assert_eq!(days.len() as i64, span + 1);
                for pair in days.windows(2) {
                    prop_assert_eq!(shift(pair[0], 1), pair[1]);
                }
            }

            /// Property: shifting forward then back is the identity.
            #[test]
            fn prop_shift_inverts(offset in 0i64..20_000, delta in -1_000i64..1_000) {
                let start = shift(day("1990-01-01"), offset);
                prop_assert_eq!(shift(shift(start, delta), -delta), start);
            }
        }
    }
}
