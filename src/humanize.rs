//! Human-readable byte sizes and durations for configuration values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Value out of range: {0}")]
    Overflow(String),
}

/// Splits "15MB" into ("15", "MB"). Plain numbers return an empty unit.
fn split_unit(s: &str) -> Result<(u64, String), ParseError> {
    let s = s.trim();
    let pos = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_str, unit) = s.split_at(pos);
    if num_str.is_empty() {
        return Err(ParseError::InvalidFormat(s.to_string()));
    }
    Ok((num_str.parse()?, unit.trim().to_string()))
}

/// Byte size wrapper with human-readable parsing ("5GB", "100MB", 1024)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[
            ("B", 1),
            ("KB", 1024),
            ("MB", 1024 * 1024),
            ("GB", 1024 * 1024 * 1024),
            ("TB", 1024 * 1024 * 1024 * 1024),
        ];

        for &(unit, divisor) in UNITS.iter().rev() {
            if self.0 >= divisor {
                let value = self.0 / divisor;
                let decimal = (self.0 % divisor) * 10 / divisor;
                if decimal > 0 {
                    return format!("{}.{}{}", value, decimal, unit);
                }
                return format!("{}{}", value, unit);
            }
        }

        format!("{}B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, unit) = split_unit(s)?;

        let multiplier: u64 = match unit.to_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => 1024,
            "M" | "MB" | "MIB" => 1024 * 1024,
            "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
            "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
            _ => return Err(ParseError::InvalidUnit(unit)),
        };

        num.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"5MB\", \"1GB\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size must not be negative: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// Duration wrapper accepting "500ms", "30s", "10m", "2h", "1d" or plain seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Same value as a chrono duration, for timestamp arithmetic
    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.0).unwrap_or(chrono::Duration::MAX)
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl FromStr for HumanDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, unit) = split_unit(s)?;

        let millis_per_unit: u64 = match unit.to_lowercase().as_str() {
            "ms" => 1,
            "" | "s" | "sec" | "secs" => 1_000,
            "m" | "min" | "mins" => 60_000,
            "h" | "hr" | "hrs" => 3_600_000,
            "d" | "day" | "days" => 86_400_000,
            _ => return Err(ParseError::InvalidUnit(unit)),
        };

        num.checked_mul(millis_per_unit)
            .map(HumanDuration::from_millis)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[(&str, u128)] = &[
            ("d", 86_400_000),
            ("h", 3_600_000),
            ("m", 60_000),
            ("s", 1_000),
        ];

        let millis = self.0.as_millis();
        if millis == 0 {
            return write!(f, "0s");
        }
        for &(unit, divisor) in UNITS {
            if millis % divisor == 0 {
                return write!(f, "{}{}", millis / divisor, unit);
            }
        }
        write!(f, "{}ms", millis)
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DurationVisitor;

        impl serde::de::Visitor<'_> for DurationVisitor {
            type Value = HumanDuration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration as string (e.g., \"30s\", \"10m\") or seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HumanDuration::from_secs(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(HumanDuration::from_secs)
                    .map_err(|_| E::custom(format!("duration must not be negative: {v}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<HumanDuration>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
