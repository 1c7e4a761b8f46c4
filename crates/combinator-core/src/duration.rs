//! Duration (de)serialization for configuration files
//!
//! Accepts humantime strings (`"5s"`, `"1m 30s"`, `"500ms"`), .NET TimeSpan
//! strings (`"00:00:05"`, `"1.02:03:04.5"`) and bare numbers of seconds.
//! Always serializes as a humantime string.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

/// Parse a duration from any of the accepted textual forms
pub fn parse(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if trimmed.contains(':') {
        parse_timespan(trimmed)
    } else {
        humantime::parse_duration(trimmed).map_err(|e| e.to_string())
    }
}

/// `[d.]hh:mm[:ss[.fffffff]]`
fn parse_timespan(input: &str) -> Result<Duration, String> {
    if input.starts_with('-') {
        return Err("negative durations are not allowed".to_string());
    }

    let parts: Vec<&str> = input.split(':').collect();
    let (head, minutes, seconds) = match parts.as_slice() {
        [head, minutes] => (*head, *minutes, "0"),
        [head, minutes, seconds] => (*head, *minutes, *seconds),
        _ => return Err("expected hh:mm:ss".to_string()),
    };

    let (days, hours) = match head.split_once('.') {
        Some((days, hours)) => (parse_component(days, "days")?, parse_component(hours, "hours")?),
        None => (0, parse_component(head, "hours")?),
    };
    let minutes = parse_component(minutes, "minutes")?;
    let seconds: f64 = seconds
        .parse()
        .map_err(|_| format!("invalid seconds '{seconds}'"))?;

    if days > 0 && hours > 23 {
        return Err(format!("hours out of range: {hours}"));
    }
    if minutes > 59 {
        return Err(format!("minutes out of range: {minutes}"));
    }
    if !seconds.is_finite() || !(0.0..60.0).contains(&seconds) {
        return Err(format!("seconds out of range: {seconds}"));
    }

    days.checked_mul(86_400)
        .zip(hours.checked_mul(3_600))
        .and_then(|(days, hours)| days.checked_add(hours)?.checked_add(minutes * 60))
        .and_then(|whole| Duration::from_secs(whole).checked_add(Duration::from_secs_f64(seconds)))
        .ok_or_else(|| format!("duration out of range: {input}"))
}

fn parse_component(value: &str, what: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("invalid {what} '{value}'"))
}

fn from_raw(raw: RawDuration) -> Result<Duration, String> {
    match raw {
        RawDuration::Seconds(secs) => {
            Duration::try_from_secs_f64(secs).map_err(|e| format!("{secs}: {e}"))
        }
        RawDuration::Text(text) => parse(&text),
    }
}

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = RawDuration::deserialize(deserializer)?;
    from_raw(raw).map_err(serde::de::Error::custom)
}

/// Same as the parent module, for `Option<Duration>` where `null` means "unset"
pub mod option {
    use super::{from_raw, RawDuration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(from_raw)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
