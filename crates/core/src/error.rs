//! Domain error model.

use thiserror::Error;

/// Result type used for configuration and parsing in the job domain.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic configuration failures (bad recurrence rule, bad time
/// expression, bad identifier). Storage failures belong to the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A repeat interval is neither a cron expression nor a human duration.
    #[error("invalid repeat interval: {0}")]
    InvalidInterval(String),

    /// A time expression (schedule / repeat-at) could not be understood.
    #[error("invalid time expression: {0}")]
    InvalidTime(String),

    /// A timezone name is not a known IANA zone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_interval(msg: impl Into<String>) -> Self {
        Self::InvalidInterval(msg.into())
    }

    pub fn invalid_time(msg: impl Into<String>) -> Self {
        Self::InvalidTime(msg.into())
    }

    pub fn invalid_timezone(msg: impl Into<String>) -> Self {
        Self::InvalidTimezone(msg.into())
    }
}
