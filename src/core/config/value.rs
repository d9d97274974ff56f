//! core::config::value
//!
//! Dynamically typed configuration values and their coercions.
//!
//! # Coercion
//!
//! Values arrive from several places (TOML files, environment variables,
//! command-line flags, explicit `set` calls) and are read back through typed
//! getters. Every getter coerces:
//!
//! - strings are parsed (`"true"`, `"42"`, `"1m30s"`)
//! - integers convert to durations as whole seconds
//! - a failed coercion yields `None`, which the store turns into the zero
//!   value of the requested type
//!
//! Durations use the compact unit notation common to deployment tooling:
//! `300ms`, `1s`, `1h30m`, `2.5s`. Units are `ns`, `us`/`µs`, `ms`, `s`, `m`
//! and `h`.

use std::fmt;
use std::time::Duration;

/// A single configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Free-form text.
    String(String),
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Time span.
    Duration(Duration),
}

impl ConfigValue {
    /// Coerce to a string.
    pub fn as_string(&self) -> String {
        match self {
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Float(f) => f.to_string(),
            ConfigValue::Duration(d) => format_duration(*d),
        }
    }

    /// Coerce to a boolean.
    ///
    /// Accepts `1`, `t`, `true`, `0`, `f`, `false` in any case.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Int(i) => Some(*i != 0),
            ConfigValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "t" | "true" => Some(true),
                "0" | "f" | "false" => Some(false),
                _ => None,
            },
            ConfigValue::Float(_) | ConfigValue::Duration(_) => None,
        }
    }

    /// Coerce to an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Bool(b) => Some(i64::from(*b)),
            ConfigValue::Float(f) => Some(*f as i64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            ConfigValue::Duration(_) => None,
        }
    }

    /// Coerce to a duration.
    ///
    /// Bare integers are interpreted as seconds.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            ConfigValue::Duration(d) => Some(*d),
            ConfigValue::Int(i) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
            ConfigValue::String(s) => parse_duration(s),
            _ => None,
        }
    }

    /// Convert a parsed TOML value.
    ///
    /// Tables are not representable and return `None`; the loader flattens
    /// them into dotted keys before calling this. Arrays are joined with
    /// commas.
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::String(s) => Some(ConfigValue::String(s.clone())),
            toml::Value::Integer(i) => Some(ConfigValue::Int(*i)),
            toml::Value::Float(f) => Some(ConfigValue::Float(*f)),
            toml::Value::Boolean(b) => Some(ConfigValue::Bool(*b)),
            toml::Value::Datetime(d) => Some(ConfigValue::String(d.to_string())),
            toml::Value::Array(items) => {
                let joined = items
                    .iter()
                    .filter_map(ConfigValue::from_toml)
                    .map(|v| v.as_string())
                    .collect::<Vec<_>>()
                    .join(",");
                Some(ConfigValue::String(joined))
            }
            toml::Value::Table(_) => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<Duration> for ConfigValue {
    fn from(value: Duration) -> Self {
        ConfigValue::Duration(value)
    }
}

/// Parse a duration such as `1h30m`, `250ms` or `2.5s`.
///
/// A bare `0` is accepted; any other number needs a unit. Returns `None`
/// for malformed or negative input.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format a duration in the notation accepted by [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    let nanos = duration.subsec_nanos();
    let secs = duration.as_secs();
    if secs == 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{}ns", nanos)
        };
    }

    let mut out = String::new();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if nanos > 0 {
        let frac = format!("{:09}", nanos);
        out.push_str(&format!("{}.{}s", seconds, frac.trim_end_matches('0')));
    } else if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    out
}
