//! Unit-suffixed literals used by descriptors.
//!
//! Sizes use binary multiples (`K` = 1024 bytes). Durations accept `ms`, `s`,
//! `m` and `h`. A bare integer is bytes for sizes and milliseconds for
//! durations. Anything else is rejected when the descriptor is loaded.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

const MILLIS_PER_SECOND: u64 = 1000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;

/// A byte count parsed from literals such as `"500M"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * MIB)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse `<digits>[K|M|G][B]`, case-insensitive.
    pub fn parse(literal: &str) -> Result<Self, String> {
        let (value, suffix) = split_number(literal)?;
        let multiplier = match suffix.to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" => KIB,
            "M" | "MB" => MIB,
            "G" | "GB" => GIB,
            _ => {
                return Err(format!(
                    "unrecognized size suffix '{}' in '{}' (expected K, M or G)",
                    suffix, literal
                ))
            }
        };

        value
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| format!("size '{}' is too large", literal))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes != 0 && bytes % GIB == 0 {
            write!(f, "{}G", bytes / GIB)
        } else if bytes != 0 && bytes % MIB == 0 {
            write!(f, "{}M", bytes / MIB)
        } else if bytes != 0 && bytes % KIB == 0 {
            write!(f, "{}K", bytes / KIB)
        } else {
            write!(f, "{}", bytes)
        }
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match UnitLiteral::deserialize(deserializer)? {
            UnitLiteral::Integer(n) => non_negative(n).map(ByteSize),
            UnitLiteral::Float(_) => Err("fractional sizes are not supported".to_string()),
            UnitLiteral::Text(s) => ByteSize::parse(&s),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// Parse `<digits>(ms|s|m|h)`; a bare integer is milliseconds.
pub fn parse_duration(literal: &str) -> Result<Duration, String> {
    let (value, suffix) = split_number(literal)?;
    let millis_per_unit = match suffix {
        "" | "ms" => 1,
        "s" => MILLIS_PER_SECOND,
        "m" => MILLIS_PER_MINUTE,
        "h" => MILLIS_PER_HOUR,
        _ => {
            return Err(format!(
                "unrecognized duration suffix '{}' in '{}' (expected ms, s, m or h)",
                suffix, literal
            ))
        }
    };

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{}' is too large", literal))
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis() as u64;
    if millis != 0 && millis % MILLIS_PER_HOUR == 0 {
        format!("{}h", millis / MILLIS_PER_HOUR)
    } else if millis != 0 && millis % MILLIS_PER_MINUTE == 0 {
        format!("{}m", millis / MILLIS_PER_MINUTE)
    } else if millis != 0 && millis % MILLIS_PER_SECOND == 0 {
        format!("{}s", millis / MILLIS_PER_SECOND)
    } else {
        format!("{}ms", millis)
    }
}

fn split_number(literal: &str) -> Result<(u64, &str), String> {
    let trimmed = literal.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());

    if digits_end == 0 {
        return Err(format!(
            "'{}' must start with a non-negative whole number",
            literal
        ));
    }

    let value = trimmed[..digits_end]
        .parse::<u64>()
        .map_err(|_| format!("'{}' is out of range", literal))?;

    Ok((value, trimmed[digits_end..].trim_start()))
}

fn non_negative(value: i64) -> Result<u64, String> {
    u64::try_from(value).map_err(|_| format!("must not be negative, got {}", value))
}

/// Numeric or textual literal as it appears in YAML or JSON.
#[derive(Deserialize)]
#[serde(untagged)]
enum UnitLiteral {
    Integer(i64),
    Float(f64),
    Text(String),
}

fn duration_from_literal(literal: UnitLiteral) -> Result<Duration, String> {
    match literal {
        UnitLiteral::Integer(n) => non_negative(n).map(Duration::from_millis),
        UnitLiteral::Float(_) => Err("fractional durations are not supported".to_string()),
        UnitLiteral::Text(s) => parse_duration(&s),
    }
}

// Custom serialization for Duration
pub mod duration_serde {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let literal = UnitLiteral::deserialize(deserializer)?;
        duration_from_literal(literal).map_err(serde::de::Error::custom)
    }
}

pub mod option_duration_serde {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<UnitLiteral>::deserialize(deserializer)?
            .map(duration_from_literal)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

/// Counts that must be non-negative and fit in a `u32`.
pub mod count_serde {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        non_negative(value)
            .and_then(|v| u32::try_from(v).map_err(|_| format!("{} is too large", value)))
            .map_err(serde::de::Error::custom)
    }
}
