//! Human-friendly durations such as `"30s"`, `"15m"`, `"6h"` or `"90d"`.

use std::time::Duration;

/// Parse an interval string like "1h", "30m", "6h", "1d". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let secs = if let Some(hours) = s.strip_suffix('h') {
        scaled(hours, 3600, "hours")?
    } else if let Some(minutes) = s.strip_suffix('m') {
        scaled(minutes, 60, "minutes")?
    } else if let Some(days) = s.strip_suffix('d') {
        scaled(days, 86400, "days")?
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<u64>()
            .map_err(|_| format!("Invalid seconds: {}", secs))?
    } else {
        s.parse::<u64>()
            .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))?
    };

    Ok(Duration::from_secs(secs))
}

fn scaled(count: &str, unit_secs: u64, unit: &str) -> Result<u64, String> {
    count
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("Invalid {}: {}", unit, count))?
        .checked_mul(unit_secs)
        .ok_or_else(|| format!("Interval too large: {} {}", count, unit))
}

/// Format a duration with the largest unit that divides it evenly.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 86400 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// `#[serde(with = ...)]` adapter for durations written as strings.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Like [`serde_str`], for optional durations; `"off"` or an empty string mean none.
pub mod serde_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_str(&super::format_duration(*d)),
            None => serializer.serialize_str("off"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("off") {
            return Ok(None);
        }
        super::parse_duration(raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
