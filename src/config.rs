//! Limiter configuration resolution.
//!
//! A raw, loosely-typed configuration map is validated against the fixed
//! limiter schema and normalized into an immutable [`LimiterConfig`].
//! Resolution is pure and synchronous: it either returns a fully valid
//! config or an error naming the offending field, never a partial config.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, TollgateError};
use crate::interval;

/// Keys the top-level configuration map may carry.
const TOP_LEVEL_KEYS: [&str; 5] = ["id", "strategy", "limit", "interval", "rate"];
/// Keys the `rate` sub-map may carry.
const RATE_KEYS: [&str; 2] = ["amount", "interval"];

/// Admission strategy selected by a limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Capacity drained per request, restored over time by a refill rate.
    TokenBucket,
    /// At most `limit` admissions per fixed-length time window.
    FixedWindow,
}

impl Strategy {
    /// The tag used for this strategy in raw configuration maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::TokenBucket => "token_bucket",
            Strategy::FixedWindow => "fixed_window",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "token_bucket" => Ok(Strategy::TokenBucket),
            "fixed_window" => Ok(Strategy::FixedWindow),
            other => Err(TollgateError::InvalidValue {
                field: "strategy".to_string(),
                reason: format!(
                    "\"{other}\" is not a limiter strategy, accepted values are \
                     \"token_bucket\" and \"fixed_window\""
                ),
            }),
        }
    }
}

/// Token refill rate: `amount` tokens restored every `interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rate {
    /// Tokens restored per interval.
    pub amount: u64,
    /// Time between refills.
    pub interval: Duration,
}

/// A resolved, immutable limiter configuration.
///
/// Produced once by [`LimiterConfig::resolve`] and shared read-only by
/// every limiter a factory creates from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Logical namespace for all limiters produced from this config.
    pub id: String,
    /// Selected admission strategy.
    pub strategy: Strategy,
    /// Bucket capacity or per-window admission cap.
    pub limit: u64,
    /// Window length. Required for the fixed-window strategy; normalized
    /// whenever the raw map carries it.
    pub interval: Option<Duration>,
    /// Token refill rate. `None` unless the raw `rate` sub-map carried an
    /// explicit `interval`; a bare `amount` is not enough to form a rate.
    pub rate: Option<Rate>,
}

impl LimiterConfig {
    /// Validate a raw configuration map and normalize it into a config.
    ///
    /// Validation order: unknown keys, then presence and type of each
    /// field, then interval normalization, then `rate` normalization.
    pub fn resolve(raw: &Value) -> Result<Self> {
        let map = match raw {
            Value::Object(map) => map,
            other => {
                return Err(TollgateError::InvalidType {
                    field: "configuration".to_string(),
                    expected: "a map",
                    found: type_name(other),
                })
            }
        };

        for key in map.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                return Err(TollgateError::InvalidValue {
                    field: key.clone(),
                    reason: "unknown configuration key, expected one of: \
                             id, strategy, limit, interval, rate"
                        .to_string(),
                });
            }
        }

        let id = required_string(map, "id")?;
        if id.is_empty() {
            return Err(TollgateError::InvalidValue {
                field: "id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let strategy = Strategy::from_str(&required_string(map, "strategy")?)?;
        let limit = positive_integer(map.get("limit"), "limit")?
            .ok_or_else(|| TollgateError::MissingField("limit".to_string()))?;

        let interval = match map.get("interval") {
            Some(value) => Some(parse_interval_field(value, "interval")?),
            None if strategy == Strategy::FixedWindow => {
                return Err(TollgateError::MissingField("interval".to_string()))
            }
            None => None,
        };

        let rate = match map.get("rate") {
            Some(Value::Object(sub)) => resolve_rate(sub)?,
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(TollgateError::InvalidType {
                    field: "rate".to_string(),
                    expected: "a map",
                    found: type_name(other),
                })
            }
        };

        let config = LimiterConfig {
            id,
            strategy,
            limit,
            interval,
            rate,
        };
        debug!(
            id = %config.id,
            strategy = %config.strategy,
            limit = config.limit,
            "Resolved limiter configuration"
        );
        Ok(config)
    }

    /// Resolve a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: Value =
            serde_json::from_str(text).map_err(|e| TollgateError::Parse(e.to_string()))?;
        Self::resolve(&raw)
    }

    /// Resolve a configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: Value =
            serde_yaml::from_str(text).map_err(|e| TollgateError::Parse(e.to_string()))?;
        Self::resolve(&raw)
    }

    /// Resolve a configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// Normalize the `rate` sub-map.
///
/// `amount` is validated before the interval check so a malformed amount
/// is always reported, but an absent `rate.interval` resolves the whole
/// rate to `None` even when an amount was supplied: an amount alone says
/// nothing about when tokens come back.
fn resolve_rate(sub: &serde_json::Map<String, Value>) -> Result<Option<Rate>> {
    for key in sub.keys() {
        if !RATE_KEYS.contains(&key.as_str()) {
            return Err(TollgateError::InvalidValue {
                field: format!("rate.{key}"),
                reason: "unknown configuration key, expected one of: amount, interval".to_string(),
            });
        }
    }

    let amount = positive_integer(sub.get("amount"), "rate.amount")?.unwrap_or(1);

    match sub.get("interval") {
        Some(value) => {
            let interval = parse_interval_field(value, "rate.interval")?;
            Ok(Some(Rate { amount, interval }))
        }
        None => Ok(None),
    }
}

/// Extract a required string field.
fn required_string(map: &serde_json::Map<String, Value>, field: &str) -> Result<String> {
    match map.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(TollgateError::InvalidType {
            field: field.to_string(),
            expected: "a string",
            found: type_name(other),
        }),
        None => Err(TollgateError::MissingField(field.to_string())),
    }
}

/// Extract an optional positive integer field.
fn positive_integer(value: Option<&Value>, field: &str) -> Result<Option<u64>> {
    let Some(value) = value else { return Ok(None) };
    let number = match value {
        Value::Number(number) => number,
        other => {
            return Err(TollgateError::InvalidType {
                field: field.to_string(),
                expected: "an integer",
                found: type_name(other),
            })
        }
    };
    match number.as_u64() {
        Some(0) | None if number.is_f64() => Err(TollgateError::InvalidType {
            field: field.to_string(),
            expected: "an integer",
            found: "a float",
        }),
        Some(0) | None => Err(TollgateError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be a positive integer, got {number}"),
        }),
        Some(parsed) => Ok(Some(parsed)),
    }
}

/// Parse and bounds-check an interval expression field.
fn parse_interval_field(value: &Value, field: &str) -> Result<Duration> {
    let expression = match value {
        Value::String(s) => s,
        other => {
            return Err(TollgateError::InvalidType {
                field: field.to_string(),
                expected: "a string",
                found: type_name(other),
            })
        }
    };
    let parsed = interval::parse(expression).map_err(|source| TollgateError::Interval {
        field: field.to_string(),
        source,
    })?;
    if parsed.is_zero() {
        return Err(TollgateError::InvalidValue {
            field: field.to_string(),
            reason: format!("\"{expression}\" is a zero-length duration"),
        });
    }
    Ok(parsed)
}

/// Human name for a raw value's type, used in type errors.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a float",
        Value::Number(_) => "an integer",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
