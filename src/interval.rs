//! Relative-interval parsing.
//!
//! Turns human-readable relative time expressions such as `"5 minutes"`,
//! `"1 day"` or `"1 hour 30 minutes"` into exact [`Duration`]s. Calendar
//! units (months, years) are resolved by advancing a fixed reference
//! instant, the Unix epoch (1970-01-01T00:00:00Z), so every expression
//! maps to the same duration on every run, in every time zone.

use std::time::Duration;

use chrono::{Days, Months, NaiveDateTime};
use thiserror::Error;

/// Unit words accepted by [`parse`], quoted in error messages.
const SUPPORTED_UNITS: &str = "seconds, minutes, hours, days, weeks, months, years";

/// Errors produced when an interval expression cannot be parsed.
#[derive(Debug, Error)]
pub enum IntervalParseError {
    /// The expression was empty or all whitespace.
    #[error("Cannot parse an empty interval, use \"<count> <unit>\" with units {}", SUPPORTED_UNITS)]
    Empty,

    /// A fragment of the expression did not match `<count> <unit>`.
    #[error("Cannot parse interval \"{fragment}\", use \"<count> <unit>\" with units {}", SUPPORTED_UNITS)]
    Unparseable {
        /// The sub-expression that failed to parse.
        fragment: String,
    },

    /// A unit word was not one of the supported units.
    #[error("Unknown interval unit \"{unit}\", use one of: {}", SUPPORTED_UNITS)]
    UnknownUnit {
        /// The word that was not recognized.
        unit: String,
    },

    /// The expression describes a span too large to represent.
    #[error("Interval \"{expression}\" is too large to represent")]
    Overflow {
        /// The expression that overflowed.
        expression: String,
    },
}

/// Per-unit totals accumulated while scanning an expression.
#[derive(Debug, Default, Clone, Copy)]
struct Span {
    months: u64,
    days: u64,
    seconds: u64,
}

impl Span {
    fn add(&mut self, magnitude: u64, unit: Unit) -> Option<()> {
        let (slot, per) = match unit {
            Unit::Second => (&mut self.seconds, 1),
            Unit::Minute => (&mut self.seconds, 60),
            Unit::Hour => (&mut self.seconds, 3_600),
            Unit::Day => (&mut self.days, 1),
            Unit::Week => (&mut self.days, 7),
            Unit::Month => (&mut self.months, 1),
            Unit::Year => (&mut self.months, 12),
        };
        *slot = magnitude.checked_mul(per)?.checked_add(*slot)?;
        Some(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "second" | "seconds" | "sec" | "secs" => Some(Unit::Second),
            "minute" | "minutes" | "min" | "mins" => Some(Unit::Minute),
            "hour" | "hours" | "hr" | "hrs" => Some(Unit::Hour),
            "day" | "days" => Some(Unit::Day),
            "week" | "weeks" => Some(Unit::Week),
            "month" | "months" => Some(Unit::Month),
            "year" | "years" => Some(Unit::Year),
            _ => None,
        }
    }
}

/// Parse a relative-time expression into an exact duration.
///
/// The grammar is an optional leading `+` followed by one or more
/// whitespace-separated `<count> <unit>` groups (`"90 seconds"`,
/// `"+1 hour 30 minutes"`). Unit words are case-insensitive and accept
/// singular and plural forms. The result is computed by advancing the Unix
/// epoch by the parsed expression (months first, then days and weeks, then
/// fixed-length time) and taking the difference, so `"1 month"` is always
/// 31 days and `"1 year"` always 365 days.
pub fn parse(expression: &str) -> Result<Duration, IntervalParseError> {
    let trimmed = expression.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed).trim_start();
    if trimmed.is_empty() {
        return Err(IntervalParseError::Empty);
    }

    let mut span = Span::default();
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(IntervalParseError::Unparseable {
                fragment: rest.to_string(),
            });
        }
        let magnitude: u64 =
            rest[..digits_end]
                .parse()
                .map_err(|_| IntervalParseError::Overflow {
                    expression: expression.trim().to_string(),
                })?;

        let after_magnitude = rest[digits_end..].trim_start();
        let unit_end = after_magnitude
            .find(char::is_whitespace)
            .unwrap_or(after_magnitude.len());
        let unit_word = &after_magnitude[..unit_end];
        if unit_word.is_empty() {
            return Err(IntervalParseError::Unparseable {
                fragment: rest.to_string(),
            });
        }

        let unit = Unit::from_word(unit_word).ok_or_else(|| IntervalParseError::UnknownUnit {
            unit: unit_word.to_string(),
        })?;
        span.add(magnitude, unit)
            .ok_or_else(|| IntervalParseError::Overflow {
                expression: expression.trim().to_string(),
            })?;

        rest = after_magnitude[unit_end..].trim_start();
    }

    resolve_span(span).ok_or_else(|| IntervalParseError::Overflow {
        expression: expression.trim().to_string(),
    })
}

/// Advance the epoch by the accumulated span and return the difference.
fn resolve_span(span: Span) -> Option<Duration> {
    let reference = NaiveDateTime::UNIX_EPOCH;
    let advanced = reference
        .checked_add_months(Months::new(u32::try_from(span.months).ok()?))?
        .checked_add_days(Days::new(span.days))?
        .checked_add_signed(chrono::Duration::try_seconds(i64::try_from(span.seconds).ok()?)?)?;
    (advanced - reference).to_std().ok()
}
