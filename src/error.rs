//! Error types for the tollgate crate.

use thiserror::Error;

use crate::config::Strategy;
use crate::interval::IntervalParseError;

/// Main error type for tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A required configuration field is absent.
    #[error("Missing required configuration field `{0}`")]
    MissingField(String),

    /// A configuration field holds a value of the wrong type.
    #[error("Configuration field `{field}` must be {expected}, got {found}")]
    InvalidType {
        /// Name of the offending field.
        field: String,
        /// What the schema expects there.
        expected: &'static str,
        /// What the raw map actually held.
        found: &'static str,
    },

    /// A configuration field has the right type but an unacceptable value.
    #[error("Configuration field `{field}` is invalid: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// An interval expression in the configuration failed to parse.
    #[error("Configuration field `{field}`: {source}")]
    Interval {
        /// Name of the field carrying the expression.
        field: String,
        /// The underlying parser failure.
        source: IntervalParseError,
    },

    /// The raw configuration text could not be parsed at all.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A strategy reached dispatch without the parameters it needs.
    ///
    /// Unreachable for configurations that went through
    /// [`LimiterConfig::resolve`](crate::config::LimiterConfig::resolve).
    #[error("Limiter strategy `{strategy}` is not fully configured: `{missing}` is not set")]
    UnconfiguredStrategy {
        /// The strategy that was selected.
        strategy: Strategy,
        /// The parameter it is missing.
        missing: &'static str,
    },

    /// A storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
