//! Human-readable duration strings (`"30s"`, `"2m"`, `"1h 30m"`).
//!
//! Plans are written the way load scripts write them, so every `Duration`
//! field in a plan goes through these helpers.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

use crate::error::{CoreError, CoreResult};

/// Parse a human duration string.
///
/// A leading minus sign is rejected explicitly so that a negative stage
/// duration surfaces as a configuration error rather than a parse quirk.
pub fn parse_duration(raw: &str) -> CoreResult<Duration> {
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Err(CoreError::config(format!(
            "duration `{}` is negative",
            raw
        )));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed)
        .map_err(|e| CoreError::config(format!("invalid duration `{}`: {}", raw, e)))
}

/// Render a duration the way it would be written in a plan.
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Serde adapter for `Duration` fields.
pub mod serde_duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Duration>` fields.
pub mod serde_duration_opt {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|r| parse_duration(&r).map_err(serde::de::Error::custom))
            .transpose()
    }
}
