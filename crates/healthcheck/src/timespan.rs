//! Serde codec for durations in TimeSpan text form (`[d.]hh:mm:ss[.fffffff]`).
//!
//! Use with `#[serde(with = "crate::timespan")]`. Decoding also accepts a plain
//! JSON number of seconds.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

const NANOS_PER_TICK: u32 = 100;

/// Format a duration as `[d.]hh:mm:ss[.fffffff]`.
pub fn format(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    let ticks = duration.subsec_nanos() / NANOS_PER_TICK;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// Parse `[d.]hh:mm:ss[.fffffff]` into a duration.
pub fn parse(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("invalid timespan '{input}': expected hh:mm:ss"));
    }

    let (days, hours) = match parts[0].split_once('.') {
        Some((d, h)) => (parse_component(d, input)?, parse_component(h, input)?),
        None => (0, parse_component(parts[0], input)?),
    };
    let minutes = parse_component(parts[1], input)?;

    let (seconds, nanos) = match parts[2].split_once('.') {
        Some((s, frac)) => (parse_component(s, input)?, parse_fraction(frac, input)?),
        None => (parse_component(parts[2], input)?, 0),
    };

    if hours >= 24 || minutes >= 60 || seconds >= 60 {
        return Err(format!("invalid timespan '{input}': component out of range"));
    }

    let secs = days
        .checked_mul(86_400)
        .and_then(|s| s.checked_add(hours * 3_600 + minutes * 60 + seconds))
        .ok_or_else(|| format!("invalid timespan '{input}': component out of range"))?;
    Ok(Duration::new(secs, nanos))
}

fn parse_component(value: &str, input: &str) -> Result<u64, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid timespan '{input}'"));
    }
    value
        .parse::<u64>()
        .map_err(|e| format!("invalid timespan '{input}': {e}"))
}

fn parse_fraction(value: &str, input: &str) -> Result<u32, String> {
    if value.is_empty() || value.len() > 9 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid timespan fraction in '{input}'"));
    }
    let padded = format!("{value:0<9}");
    padded
        .parse::<u32>()
        .map_err(|e| format!("invalid timespan '{input}': {e}"))
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TimeSpanVisitor)
}

struct TimeSpanVisitor;

impl<'de> Visitor<'de> for TimeSpanVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a timespan string or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("negative duration"))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(v).map_err(E::custom)
    }
}
