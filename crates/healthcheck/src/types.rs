//! Health check types and structures.
//!
//! `HealthReport` is the JSON document a probed endpoint serves and the
//! aggregator consumes.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Entry name used when a whole endpoint could not be evaluated.
pub const FAILURE_ENTRY_NAME: &str = "Endpoint";

/// Health check status
///
/// Ordered from worst to best, so the aggregate of a report is its minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HealthStatus {
    /// Dependency is unreachable or failing
    Unhealthy = 0,
    /// Dependency works with reduced quality
    Degraded = 1,
    /// Dependency is healthy
    Healthy = 2,
}

impl HealthStatus {
    /// All statuses in ordinal order.
    pub const ALL: [HealthStatus; 3] = [
        HealthStatus::Unhealthy,
        HealthStatus::Degraded,
        HealthStatus::Healthy,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unhealthy => "Unhealthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Healthy => "Healthy",
        }
    }

    /// Integer ordinal accepted on the wire.
    pub fn ordinal(&self) -> i64 {
        *self as i64
    }

    /// Decode an integer ordinal.
    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(HealthStatus::Unhealthy),
            1 => Some(HealthStatus::Degraded),
            2 => Some(HealthStatus::Healthy),
            _ => None,
        }
    }

    /// Decode a status name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Decode either wire representation: a status name or an ordinal.
    pub fn decode(value: &Value) -> Result<Self, StatusDecodeError> {
        match value {
            Value::String(name) => {
                Self::from_name(name).ok_or_else(|| StatusDecodeError(value.to_string()))
            }
            Value::Number(n) => n
                .as_i64()
                .and_then(Self::from_ordinal)
                .ok_or_else(|| StatusDecodeError(value.to_string())),
            other => Err(StatusDecodeError(other.to_string())),
        }
    }

    /// Worst of two statuses.
    pub fn worst(self, other: Self) -> Self {
        self.min(other)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status value that is neither a known name nor a known ordinal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown health status: {0}")]
pub struct StatusDecodeError(pub String);

impl Serialize for HealthStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HealthStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(HealthStatusVisitor)
    }
}

struct HealthStatusVisitor;

impl<'de> Visitor<'de> for HealthStatusVisitor {
    type Value = HealthStatus;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a health status name or ordinal (0, 1, 2)")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<HealthStatus, E> {
        HealthStatus::from_name(v).ok_or_else(|| E::custom(StatusDecodeError(v.to_string())))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<HealthStatus, E> {
        HealthStatus::from_ordinal(v).ok_or_else(|| E::custom(StatusDecodeError(v.to_string())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<HealthStatus, E> {
        i64::try_from(v)
            .ok()
            .and_then(HealthStatus::from_ordinal)
            .ok_or_else(|| E::custom(StatusDecodeError(v.to_string())))
    }
}

/// Health check result produced by a single checker
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Status of the health check
    pub status: HealthStatus,

    /// Duration of the health check
    pub duration: Duration,

    /// Human readable description
    pub description: Option<String>,

    /// Error text when the check failed with an error
    pub exception: Option<String>,

    /// Response code (for HTTP checks)
    pub response_code: Option<u16>,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(duration: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            duration,
            description: None,
            exception: None,
            response_code: None,
        }
    }

    /// Create a degraded result
    pub fn degraded(duration: Duration, description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            duration,
            description: Some(description.into()),
            exception: None,
            response_code: None,
        }
    }

    /// Create an unhealthy result
    pub fn unhealthy(duration: Duration, description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            duration,
            description: Some(description.into()),
            exception: None,
            response_code: None,
        }
    }

    /// Create an unhealthy result caused by an error
    pub fn error(duration: Duration, error: impl fmt::Display) -> Self {
        let message = error.to_string();
        Self {
            status: HealthStatus::Unhealthy,
            duration,
            description: Some(message.clone()),
            exception: Some(message),
            response_code: None,
        }
    }

    /// Create a timeout result
    pub fn timeout(duration: Duration) -> Self {
        Self::unhealthy(duration, "Health check timed out")
    }

    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    /// Check if the result is healthy
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Convert into a report entry carrying the given tags.
    pub fn into_entry(self, tags: Vec<String>) -> ReportEntry {
        ReportEntry {
            status: self.status,
            description: self.description,
            duration: self.duration,
            exception: self.exception,
            tags,
            data: Map::new(),
        }
    }
}

/// One named dependency inside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub status: HealthStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, with = "crate::timespan")]
    pub duration: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl ReportEntry {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            description: None,
            duration: Duration::ZERO,
            exception: None,
            tags: Vec::new(),
            data: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Health report served by a probed endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,

    #[serde(default, with = "crate::timespan")]
    pub total_duration: Duration,

    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: BTreeMap<String, ReportEntry>,
}

impl HealthReport {
    /// Build a report whose status is the worst of its entries.
    ///
    /// A report without entries is healthy.
    pub fn from_entries(entries: BTreeMap<String, ReportEntry>, total_duration: Duration) -> Self {
        let status = entries
            .values()
            .map(|e| e.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            total_duration,
            entries,
        }
    }

    /// Synthesize an unhealthy report for an endpoint that could not be read.
    pub fn from_failure(message: impl Into<String>) -> Self {
        Self::from_failure_named(message, FAILURE_ENTRY_NAME)
    }

    /// Same as [`HealthReport::from_failure`] with a custom entry name.
    pub fn from_failure_named(message: impl Into<String>, entry_name: &str) -> Self {
        let message = message.into();
        let entry = ReportEntry {
            status: HealthStatus::Unhealthy,
            description: Some(message.clone()),
            duration: Duration::ZERO,
            exception: Some(message),
            tags: Vec::new(),
            data: Map::new(),
        };

        Self {
            status: HealthStatus::Unhealthy,
            total_duration: Duration::ZERO,
            entries: BTreeMap::from([(entry_name.to_string(), entry)]),
        }
    }

    /// Entries that are not healthy, in name order.
    pub fn failing_entries(&self) -> impl Iterator<Item = (&String, &ReportEntry)> {
        self.entries.iter().filter(|(_, e)| !e.status.is_healthy())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_decodes_names_and_ordinals() {
        assert_eq!(HealthStatus::decode(&json!("Healthy")), Ok(HealthStatus::Healthy));
        assert_eq!(HealthStatus::decode(&json!("degraded")), Ok(HealthStatus::Degraded));
        assert_eq!(HealthStatus::decode(&json!(0)), Ok(HealthStatus::Unhealthy));
        assert_eq!(HealthStatus::decode(&json!(2)), Ok(HealthStatus::Healthy));

        assert!(HealthStatus::decode(&json!(3)).is_err());
        assert!(HealthStatus::decode(&json!(-1)).is_err());
        assert!(HealthStatus::decode(&json!("Up")).is_err());
        assert!(HealthStatus::decode(&json!(null)).is_err());
        assert!(HealthStatus::decode(&json!(1.5)).is_err());
    }

    #[test]
    fn test_status_serializes_as_name() {
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"Degraded\"");
        let parsed: HealthStatus = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, HealthStatus::Degraded);
    }

    #[test]
    fn test_status_ordering_is_worst_first() {
        assert!(HealthStatus::Unhealthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Healthy);
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn test_report_parses_wire_format() {
        let body = r#"{
            "status": "Degraded",
            "totalDuration": "00:00:00.0450000",
            "entries": {
                "db": {
                    "status": 2,
                    "description": "ok",
                    "duration": "00:00:00.0100000",
                    "tags": ["storage"],
                    "data": {}
                },
                "cache": {
                    "status": "Degraded",
                    "description": "slow",
                    "duration": "00:00:00.0350000",
                    "tags": null
                }
            }
        }"#;

        let report: HealthReport = serde_json::from_str(body).unwrap();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.total_duration, Duration::from_millis(45));
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries["db"].status, HealthStatus::Healthy);
        assert_eq!(report.entries["db"].tags, vec!["storage".to_string()]);
        assert!(report.entries["cache"].tags.is_empty());
    }

    #[test]
    fn test_report_rejects_unknown_status() {
        let body = r#"{"status": "Sideways", "entries": {}}"#;
        assert!(serde_json::from_str::<HealthReport>(body).is_err());
    }

    #[test]
    fn test_from_entries_uses_worst_status() {
        let entries = BTreeMap::from([
            ("a".to_string(), ReportEntry::new(HealthStatus::Healthy)),
            ("b".to_string(), ReportEntry::new(HealthStatus::Degraded)),
        ]);
        let report = HealthReport::from_entries(entries, Duration::ZERO);
        assert_eq!(report.status, HealthStatus::Degraded);

        let empty = HealthReport::from_entries(BTreeMap::new(), Duration::ZERO);
        assert_eq!(empty.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_from_failure() {
        let report = HealthReport::from_failure("connection refused");
        assert_eq!(report.status, HealthStatus::Unhealthy);

        let entry = &report.entries[FAILURE_ENTRY_NAME];
        assert_eq!(entry.status, HealthStatus::Unhealthy);
        assert_eq!(entry.description.as_deref(), Some("connection refused"));
        assert_eq!(report.failing_entries().count(), 1);
    }
}
