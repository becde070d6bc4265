use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::mask::FieldMask;

/// The five compiled bitmask fields of a standard cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet {
    pub minute: FieldMask,
    pub hour: FieldMask,
    pub dom: FieldMask,
    pub month: FieldMask,
    pub dow: FieldMask,
}

/// A compiled schedule: either a standard five-field cron, or a fixed
/// `@every <duration>` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedSchedule {
    Standard(FieldSet),
    Interval(Duration),
}

/// Search horizon for the standard-form search before giving up.
const SEARCH_HORIZON_YEARS: i32 = 4;

impl ParsedSchedule {
    /// The smallest instant strictly greater than `after` that matches this
    /// schedule, with seconds and nanoseconds zeroed. `None` is the "never
    /// fires within the horizon" sentinel for standard-form schedules.
    pub fn next(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ParsedSchedule::Interval(dur) => {
                let truncated = truncate_to_minute(after);
                Some(truncated + *dur)
            }
            ParsedSchedule::Standard(fields) => next_standard(fields, after),
        }
    }
}

fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    let naive = dt.naive_utc();
    let date = naive.date();
    let time = NaiveTime::from_hms_opt(naive.hour(), naive.minute(), 0).unwrap();
    DateTime::<Utc>::from_naive_utc_and_offset(NaiveDateTime::new(date, time), Utc)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    let first_of_this = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    (first_of_next - first_of_this).num_days() as u32
}

/// Advances `(year, month, day, hour, minute)` field-by-field (not a
/// minute-by-minute brute-force scan) until every field matches, or the
/// search horizon is exceeded.
fn next_standard(fields: &FieldSet, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let start = truncate_to_minute(after) + Duration::minutes(1);

    let mut year = start.year();
    let mut month = start.month();
    let mut day = start.day();
    let mut hour = start.hour();
    let mut minute = start.minute();

    let limit_year = year + SEARCH_HORIZON_YEARS;

    loop {
        if year > limit_year {
            return None;
        }

        if !fields.month.contains(month) {
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
            day = 1;
            hour = 0;
            minute = 0;
            continue;
        }

        let dim = days_in_month(year, month);
        if day > dim {
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
            day = 1;
            hour = 0;
            minute = 0;
            continue;
        }

        let date = NaiveDate::from_ymd_opt(year, month, day).expect("validated above");
        let weekday = date.weekday().num_days_from_sunday();

        // Day-of-month and day-of-week are ANDed: both must match.
        if !fields.dom.contains(day) || !fields.dow.contains(weekday) {
            day += 1;
            hour = 0;
            minute = 0;
            if day > dim {
                day = 1;
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
            continue;
        }

        if !fields.hour.contains(hour) {
            hour += 1;
            minute = 0;
            if hour > 23 {
                hour = 0;
                day += 1;
                if day > dim {
                    day = 1;
                    month += 1;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                }
            }
            continue;
        }

        if !fields.minute.contains(minute) {
            minute += 1;
            if minute > 59 {
                minute = 0;
                hour += 1;
                if hour > 23 {
                    hour = 0;
                    day += 1;
                    if day > dim {
                        day = 1;
                        month += 1;
                        if month > 12 {
                            month = 1;
                            year += 1;
                        }
                    }
                }
            }
            continue;
        }

        let naive_date = NaiveDate::from_ymd_opt(year, month, day)?;
        let naive_time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        return Some(DateTime::<Utc>::from_naive_utc_and_offset(
            NaiveDateTime::new(naive_date, naive_time),
            Utc,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn s1_weekday_range_skips_to_monday() {
        let parsed = parse("30 8 * * 1-5").unwrap();
        let after = utc(2026, 1, 3, 9, 0, 0); // Saturday
        let next = parsed.next(after).unwrap();
        assert_eq!(next, utc(2026, 1, 5, 8, 30, 0)); // Monday
    }

    #[test]
    fn s2_step_field() {
        let parsed = parse("*/15 * * * *").unwrap();
        let after = utc(2026, 1, 1, 0, 10, 0);
        let next = parsed.next(after).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 0, 15, 0));
    }

    #[test]
    fn s3_every_truncates_then_adds() {
        let parsed = parse("@every 5m").unwrap();
        let after = utc(2026, 1, 1, 0, 0, 30);
        let next = parsed.next(after).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 0, 5, 0));
    }

    #[test]
    fn p1_next_is_strictly_after_and_monotonic() {
        let parsed = parse("30 8 * * 1-5").unwrap();
        let t1 = utc(2026, 1, 3, 9, 0, 0);
        let t2 = utc(2026, 1, 4, 9, 0, 0);
        let n1 = parsed.next(t1).unwrap();
        let n2 = parsed.next(t2).unwrap();
        assert!(n1 > t1);
        assert!(n2 > t2);
        assert!(n2 >= n1);
    }

    #[test]
    fn hourly_alias_fires_on_the_hour() {
        let parsed = parse("@hourly").unwrap();
        let next = parsed.next(utc(2026, 3, 1, 10, 30, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 11, 0, 0));
    }

    #[test]
    fn daily_alias_fires_at_midnight() {
        let parsed = parse("@daily").unwrap();
        let next = parsed.next(utc(2026, 3, 1, 10, 30, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 0, 0, 0));
    }

    #[test]
    fn weekly_alias_fires_on_sunday() {
        let parsed = parse("@weekly").unwrap();
        let next = parsed.next(utc(2026, 3, 2, 0, 0, 0)).unwrap(); // Monday
        assert_eq!(next.weekday().num_days_from_sunday(), 0);
        assert!(next > utc(2026, 3, 2, 0, 0, 0));
    }

    #[test]
    fn monthly_alias_fires_on_first() {
        let parsed = parse("@monthly").unwrap();
        let next = parsed.next(utc(2026, 3, 15, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 4, 1, 0, 0, 0));
    }

    #[test]
    fn month_boundary_is_respected() {
        let parsed = parse("0 0 1 * *").unwrap();
        let next = parsed.next(utc(2026, 2, 15, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 0, 0, 0));
    }

    #[test]
    fn february_leap_year_is_handled() {
        let parsed = parse("0 0 29 2 *").unwrap();
        let next = parsed.next(utc(2026, 1, 1, 0, 0, 0)).unwrap();
        // 2026 is not a leap year; next Feb 29 is 2028.
        assert_eq!(next.year(), 2028);
        assert_eq!(next.month(), 2);
        assert_eq!(next.day(), 29);
    }

    #[test]
    fn every_is_unaffected_by_calendar_fields() {
        let parsed = parse("@every 1h30m").unwrap();
        let after = utc(2026, 1, 1, 0, 0, 0);
        let next = parsed.next(after).unwrap();
        assert_eq!(next, utc(2026, 1, 1, 1, 30, 0));
    }
}
