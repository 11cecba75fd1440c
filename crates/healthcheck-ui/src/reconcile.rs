//! Merge a freshly polled report into the stored execution record.
//!
//! History grows only when the aggregate status changes, and then only for
//! entries whose own status moved. Entries always mirror the latest report.

use crate::types::{EndpointConfiguration, ExecutionEntry, ExecutionRecord, HistoryEntry};
use chrono::{DateTime, Utc};
use healthcheck::types::{HealthReport, HealthStatus};

/// Result of reconciling one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub record: ExecutionRecord,
    /// Aggregate status before this poll, `None` for a first poll
    pub previous_status: Option<HealthStatus>,
    /// The stored URI differed from the configuration and was updated
    pub uri_changed: bool,
    pub history_appended: usize,
}

impl Reconciliation {
    pub fn status_changed(&self) -> bool {
        self.previous_status
            .is_some_and(|previous| previous != self.record.status)
    }

    /// The endpoint was failing before and is healthy now.
    pub fn recovered(&self) -> bool {
        self.record.status.is_healthy()
            && self.previous_status.is_some_and(|previous| !previous.is_healthy())
    }
}

pub fn reconcile(
    existing: Option<ExecutionRecord>,
    config: &EndpointConfiguration,
    report: &HealthReport,
    now: DateTime<Utc>,
) -> Reconciliation {
    let Some(mut record) = existing else {
        let record = ExecutionRecord {
            name: config.name.clone(),
            status: report.status,
            last_executed: now,
            on_state_from: now,
            uri: config.uri.clone(),
            discovery_service: config.discovery_service.clone(),
            entries: report
                .entries
                .iter()
                .map(|(name, entry)| ExecutionEntry::from_report(name, entry))
                .collect(),
            history: Vec::new(),
        };
        return Reconciliation {
            record,
            previous_status: None,
            uri_changed: false,
            history_appended: 0,
        };
    };

    let previous_status = record.status;

    let uri_changed = record.uri != config.uri;
    if uri_changed {
        record.uri = config.uri.clone();
    }

    let mut history_appended = 0;
    if previous_status == report.status {
        record.last_executed = now;
    } else {
        // An endpoint that could not be reached reports no known entries, so
        // nothing is appended for it.
        for entry in &record.entries {
            if let Some(polled) = report.entries.get(&entry.name)
                && polled.status != entry.status
            {
                record.history.push(HistoryEntry {
                    on: now,
                    status: polled.status,
                    name: entry.name.clone(),
                    description: polled.description.clone(),
                });
                history_appended += 1;
            }
        }

        record.on_state_from = now;
        record.last_executed = now;
        record.status = report.status;
    }

    merge_entries(&mut record.entries, report);

    Reconciliation {
        record,
        previous_status: Some(previous_status),
        uri_changed,
        history_appended,
    }
}

/// Update entries in place, append new ones and drop the ones missing from
/// the report.
fn merge_entries(entries: &mut Vec<ExecutionEntry>, report: &HealthReport) {
    entries.retain(|entry| report.entries.contains_key(&entry.name));

    for (name, polled) in &report.entries {
        match entries.iter_mut().find(|e| &e.name == name) {
            Some(existing) => {
                existing.status = polled.status;
                existing.description = polled.description.clone();
                existing.duration = polled.duration;
                existing.tags = polled.tags.clone();
            }
            None => entries.push(ExecutionEntry::from_report(name, polled)),
        }
    }
}
