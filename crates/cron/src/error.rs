use thiserror::Error;

/// Errors produced while parsing a cron expression.
///
/// Every variant names the offending field/value so callers can surface a
/// human-readable message without re-deriving context from a bare string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression is empty")]
    Empty,

    #[error("unknown alias {0:?}")]
    UnknownAlias(String),

    #[error("expected 5 fields, got {found} in {expr:?}")]
    WrongFieldCount { expr: String, found: usize },

    #[error("field {field:?} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("field {field:?} has an inverted range {start}-{end}")]
    InvertedRange {
        field: &'static str,
        start: i64,
        end: i64,
    },

    #[error("field {field:?} token {token:?} is not a valid integer")]
    NotAnInteger { field: &'static str, token: String },

    #[error("field {field:?} step must be greater than zero, got {step}")]
    ZeroStep { field: &'static str, step: i64 },

    #[error("@every duration {raw:?} is invalid: {reason}")]
    InvalidDuration { raw: String, reason: String },

    #[error("@every duration {raw:?} must be at least 1 minute")]
    DurationTooShort { raw: String },
}

pub type Result<T> = std::result::Result<T, CronError>;
