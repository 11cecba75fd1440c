//! Core types for the status aggregation service.

use chrono::{DateTime, Utc};
use healthcheck::types::{HealthStatus, ReportEntry};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable identifier of an endpoint configuration.
pub type EndpointId = i64;

/// A polled endpoint as stored in the status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfiguration {
    pub id: EndpointId,
    pub name: String,
    /// Redacted form of the configured URI
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_service: Option<String>,
}

impl EndpointConfiguration {
    /// Whether the endpoint came from static configuration rather than a
    /// discovery source.
    pub fn is_static(&self) -> bool {
        self.discovery_service.is_none()
    }
}

/// Endpoint definition before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEndpoint {
    pub name: String,
    pub uri: String,
    pub discovery_service: Option<String>,
}

impl NewEndpoint {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            discovery_service: None,
        }
    }

    pub fn discovered_by(mut self, service: impl Into<String>) -> Self {
        self.discovery_service = Some(service.into());
        self
    }
}

/// Last known state of one endpoint, keyed by its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub name: String,
    pub status: HealthStatus,
    pub last_executed: DateTime<Utc>,
    /// When `status` last changed
    pub on_state_from: DateTime<Utc>,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_service: Option<String>,
    pub entries: Vec<ExecutionEntry>,
    pub history: Vec<HistoryEntry>,
}

impl ExecutionRecord {
    pub fn entry(&self, name: &str) -> Option<&ExecutionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Latest snapshot of a single dependency inside an execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEntry {
    pub name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "healthcheck::timespan")]
    pub duration: Duration,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ExecutionEntry {
    pub fn from_report(name: &str, entry: &ReportEntry) -> Self {
        Self {
            name: name.to_string(),
            status: entry.status,
            description: entry.description.clone(),
            duration: entry.duration,
            tags: entry.tags.clone(),
        }
    }
}

/// A recorded status transition of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub on: DateTime<Utc>,
    pub status: HealthStatus,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A notification that was actually sent for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureNotification {
    pub health_check_name: String,
    pub last_notified: DateTime<Utc>,
    pub is_up_and_running: bool,
}
