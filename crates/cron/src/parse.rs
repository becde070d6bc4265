use chrono::Duration;

use crate::error::{CronError, Result};
use crate::mask::FieldMask;
use crate::schedule::{FieldSet, ParsedSchedule};

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DOM: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DOW: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 6 };

/// Parse a cron expression (five-field form, a named alias, or `@every <dur>`).
pub fn parse(expr: &str) -> Result<ParsedSchedule> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(CronError::Empty);
    }

    if let Some(rest) = trimmed.strip_prefix("@every") {
        let raw = rest.trim();
        let dur = parse_duration(raw)?;
        if dur < Duration::minutes(1) {
            return Err(CronError::DurationTooShort { raw: raw.to_string() });
        }
        return Ok(ParsedSchedule::Interval(dur));
    }

    let expanded = match trimmed {
        "@hourly" => "0 * * * *",
        "@daily" => "0 0 * * *",
        "@weekly" => "0 0 * * 0",
        "@monthly" => "0 0 1 * *",
        other if other.starts_with('@') => return Err(CronError::UnknownAlias(other.to_string())),
        other => other,
    };

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(CronError::WrongFieldCount {
            expr: expanded.to_string(),
            found: fields.len(),
        });
    }

    let minute = parse_field(fields[0], &MINUTE)?;
    let hour = parse_field(fields[1], &HOUR)?;
    let dom = parse_field(fields[2], &DOM)?;
    let month = parse_field(fields[3], &MONTH)?;
    let dow = parse_field(fields[4], &DOW)?;

    Ok(ParsedSchedule::Standard(FieldSet {
        minute,
        hour,
        dom,
        month,
        dow,
    }))
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<FieldMask> {
    let mut mask = FieldMask::empty();
    for part in field.split(',') {
        fill_mask_for_part(&mut mask, part, spec)?;
    }
    Ok(mask)
}

fn fill_mask_for_part(mask: &mut FieldMask, part: &str, spec: &FieldSpec) -> Result<()> {
    let (base, step) = match part.split_once('/') {
        Some((base, step_str)) => {
            let step: i64 = step_str.parse().map_err(|_| CronError::NotAnInteger {
                field: spec.name,
                token: step_str.to_string(),
            })?;
            if step <= 0 {
                return Err(CronError::ZeroStep { field: spec.name, step });
            }
            (base, Some(step as u32))
        }
        None => (part, None),
    };

    if base == "*" {
        let step = step.unwrap_or(1);
        let mut v = spec.min;
        while v <= spec.max {
            mask.set(v);
            v += step;
        }
        return Ok(());
    }

    if let Some((start_s, end_s)) = base.split_once('-') {
        let start = parse_int(start_s, spec)?;
        let end = parse_int(end_s, spec)?;
        if start > end {
            return Err(CronError::InvertedRange {
                field: spec.name,
                start: start as i64,
                end: end as i64,
            });
        }
        validate_bounds(start, spec)?;
        validate_bounds(end, spec)?;
        let step = step.unwrap_or(1);
        let mut v = start;
        while v <= end {
            mask.set(v);
            v += step;
        }
        return Ok(());
    }

    // Single value, optionally with a step: `v/n` means `v, v+n, ... <= max`.
    let value = parse_int(base, spec)?;
    validate_bounds(value, spec)?;
    match step {
        Some(step) => {
            let mut v = value;
            while v <= spec.max {
                mask.set(v);
                v += step;
            }
        }
        None => mask.set(value),
    }
    Ok(())
}

fn parse_int(token: &str, spec: &FieldSpec) -> Result<u32> {
    token.parse::<u32>().map_err(|_| CronError::NotAnInteger {
        field: spec.name,
        token: token.to_string(),
    })
}

fn validate_bounds(value: u32, spec: &FieldSpec) -> Result<()> {
    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value: value as i64,
            min: spec.min as i64,
            max: spec.max as i64,
        });
    }
    Ok(())
}

/// Parse a Go-`time.ParseDuration`-flavored string (`"5m"`, `"1h30m"`, `"90s"`)
/// into a `chrono::Duration`. No external unit beyond `h`/`m`/`s` is accepted.
fn parse_duration(raw: &str) -> Result<Duration> {
    if raw.is_empty() {
        return Err(CronError::InvalidDuration {
            raw: raw.to_string(),
            reason: "duration is empty".into(),
        });
    }

    let mut total_seconds: f64 = 0.0;
    let mut num_buf = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() || c == '.' {
            num_buf.push(c);
        } else if c == 'h' || c == 'm' || c == 's' {
            if num_buf.is_empty() {
                return Err(CronError::InvalidDuration {
                    raw: raw.to_string(),
                    reason: format!("unit {c:?} with no preceding number"),
                });
            }
            let n: f64 = num_buf.parse().map_err(|_| CronError::InvalidDuration {
                raw: raw.to_string(),
                reason: format!("invalid number {num_buf:?}"),
            })?;
            num_buf.clear();
            let mult = match c {
                'h' => 3600.0,
                'm' => 60.0,
                's' => 1.0,
                _ => unreachable!(),
            };
            total_seconds += n * mult;
        } else {
            return Err(CronError::InvalidDuration {
                raw: raw.to_string(),
                reason: format!("unexpected character {c:?}"),
            });
        }
    }
    if !num_buf.is_empty() {
        return Err(CronError::InvalidDuration {
            raw: raw.to_string(),
            reason: format!("trailing number {num_buf:?} with no unit"),
        });
    }

    Ok(Duration::milliseconds((total_seconds * 1000.0).round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(parse(""), Err(CronError::Empty));
        assert_eq!(parse("   "), Err(CronError::Empty));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            parse("* * * *"),
            Err(CronError::WrongFieldCount { found: 4, .. })
        ));
        assert!(matches!(
            parse("* * * * * *"),
            Err(CronError::WrongFieldCount { found: 6, .. })
        ));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(parse("60 * * * *"), Err(CronError::OutOfRange { .. })));
        assert!(matches!(parse("* 24 * * *"), Err(CronError::OutOfRange { .. })));
        assert!(matches!(parse("* * 32 * *"), Err(CronError::OutOfRange { .. })));
        assert!(matches!(parse("* * * 13 *"), Err(CronError::OutOfRange { .. })));
        assert!(matches!(parse("* * * * 7"), Err(CronError::OutOfRange { .. })));
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(matches!(
            parse("10-5 * * * *"),
            Err(CronError::InvertedRange { .. })
        ));
    }

    #[test]
    fn rejects_non_integer_token() {
        assert!(matches!(
            parse("abc * * * *"),
            Err(CronError::NotAnInteger { .. })
        ));
    }

    #[test]
    fn rejects_unknown_alias() {
        assert!(matches!(
            parse("@yearly"),
            Err(CronError::UnknownAlias(_))
        ));
    }

    #[test]
    fn accepts_aliases() {
        assert!(parse("@hourly").is_ok());
        assert!(parse("@daily").is_ok());
        assert!(parse("@weekly").is_ok());
        assert!(parse("@monthly").is_ok());
    }

    #[test]
    fn accepts_every_with_sufficient_duration() {
        assert!(parse("@every 5m").is_ok());
        assert!(parse("@every 1h30m").is_ok());
    }

    #[test]
    fn rejects_every_under_one_minute() {
        assert!(matches!(
            parse("@every 30s"),
            Err(CronError::DurationTooShort { .. })
        ));
    }

    #[test]
    fn rejects_malformed_duration() {
        assert!(parse("@every").is_err());
        assert!(parse("@every 5x").is_err());
    }

    #[test]
    fn parses_step_and_list_fields() {
        assert!(parse("*/15 * * * *").is_ok());
        assert!(parse("0,15,30,45 * * * *").is_ok());
        assert!(parse("10-20/5 * * * *").is_ok());
        assert!(parse("5/10 * * * *").is_ok());
    }

    #[test]
    fn rejects_zero_step() {
        assert!(matches!(
            parse("*/0 * * * *"),
            Err(CronError::ZeroStep { .. })
        ));
    }
}
