use super::{StatusStore, StoreError, SyncSummary};
use crate::types::{EndpointConfiguration, EndpointId, ExecutionRecord, FailureNotification, NewEndpoint};
use crate::uri::{EndpointSecrets, redact};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Notifications retained per endpoint name; older ones are dropped.
const NOTIFICATIONS_KEPT_PER_NAME: usize = 10;

/// In-memory status store.
///
/// Execution records are copy-on-write: a save swaps in a new `Arc`, so
/// readers always see a complete record.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    secrets: Arc<EndpointSecrets>,
}

#[derive(Default)]
struct MemoryState {
    next_id: EndpointId,
    configurations: BTreeMap<EndpointId, EndpointConfiguration>,
    executions: HashMap<String, Arc<ExecutionRecord>>,
    notifications: Vec<FailureNotification>,
}

impl MemoryState {
    fn find_by_name(&self, name: &str) -> Option<EndpointId> {
        self.configurations
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.id)
    }

    fn insert(&mut self, endpoint: NewEndpoint) -> EndpointConfiguration {
        self.next_id += 1;
        let config = EndpointConfiguration {
            id: self.next_id,
            name: endpoint.name,
            uri: redact(&endpoint.uri),
            discovery_service: endpoint.discovery_service,
        };
        self.configurations.insert(config.id, config.clone());
        config
    }

    fn remove(&mut self, id: EndpointId) -> Option<EndpointConfiguration> {
        let removed = self.configurations.remove(&id)?;
        self.executions.remove(&removed.name);
        Some(removed)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn list_configurations(&self) -> Result<Vec<EndpointConfiguration>, StoreError> {
        let state = self.state.read().await;
        Ok(state.configurations.values().cloned().collect())
    }

    async fn sync_configurations(&self, configured: &[NewEndpoint]) -> Result<SyncSummary, StoreError> {
        let mut state = self.state.write().await;
        let mut summary = SyncSummary::default();

        let wanted: HashSet<String> = configured.iter().map(|e| e.name.to_ascii_lowercase()).collect();
        let stale: Vec<EndpointId> = state
            .configurations
            .values()
            .filter(|c| c.is_static() && !wanted.contains(&c.name.to_ascii_lowercase()))
            .map(|c| c.id)
            .collect();
        for id in stale {
            if let Some(removed) = state.remove(id) {
                info!(name = %removed.name, "Removing endpoint no longer configured");
                self.secrets.forget(&removed.name);
                summary.removed += 1;
            }
        }

        for endpoint in configured {
            self.secrets.register(&endpoint.name, &endpoint.uri);
            let redacted = redact(&endpoint.uri);
            match state.find_by_name(&endpoint.name) {
                Some(id) => {
                    if let Some(existing) = state.configurations.get_mut(&id) {
                        if existing.uri != redacted {
                            debug!(name = %existing.name, "Updating endpoint uri");
                            existing.uri = redacted;
                            summary.updated += 1;
                        }
                    }
                }
                None => {
                    info!(name = %endpoint.name, "Adding endpoint");
                    state.insert(NewEndpoint {
                        name: endpoint.name.clone(),
                        uri: endpoint.uri.clone(),
                        discovery_service: None,
                    });
                    summary.added += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn upsert_configuration(&self, endpoint: NewEndpoint) -> Result<EndpointConfiguration, StoreError> {
        let mut state = self.state.write().await;
        self.secrets.register(&endpoint.name, &endpoint.uri);
        match state.find_by_name(&endpoint.name) {
            Some(id) => {
                let existing = state
                    .configurations
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::Corrupt(format!("configuration {id} vanished")))?;
                existing.uri = redact(&endpoint.uri);
                existing.discovery_service = endpoint.discovery_service;
                Ok(existing.clone())
            }
            None => Ok(state.insert(endpoint)),
        }
    }

    async fn remove_configuration(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let removed = match state.find_by_name(name) {
            Some(id) => state.remove(id).is_some(),
            None => false,
        };
        if removed {
            self.secrets.forget(name);
        }
        Ok(removed)
    }

    async fn get_execution(&self, name: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.executions.get(name).map(|record| record.as_ref().clone()))
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.uri = redact(&record.uri);

        let mut state = self.state.write().await;
        state.executions.insert(record.name.clone(), Arc::new(record));
        Ok(())
    }

    async fn list_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<ExecutionRecord> =
            state.executions.values().map(|r| r.as_ref().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn last_notification(&self, name: &str) -> Result<Option<FailureNotification>, StoreError> {
        Ok(self.recent_notifications(name, 1).await?.into_iter().next())
    }

    async fn recent_notifications(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<FailureNotification>, StoreError> {
        let state = self.state.read().await;
        let mut matching: Vec<FailureNotification> = state
            .notifications
            .iter()
            .filter(|n| n.health_check_name.eq_ignore_ascii_case(name))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse puts
        // the latest insert first.
        matching.sort_by_key(|n| n.last_notified);
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }

    async fn record_notification(&self, notification: &FailureNotification) -> Result<(), StoreError> {
        let name = &notification.health_check_name;
        let mut state = self.state.write().await;
        state.notifications.push(notification.clone());

        let kept = state
            .notifications
            .iter()
            .filter(|n| n.health_check_name.eq_ignore_ascii_case(name))
            .count();
        if kept > NOTIFICATIONS_KEPT_PER_NAME {
            // Oldest by timestamp, earliest insert on ties
            let oldest = state
                .notifications
                .iter()
                .enumerate()
                .filter(|(_, n)| n.health_check_name.eq_ignore_ascii_case(name))
                .min_by_key(|(i, n)| (n.last_notified, *i))
                .map(|(i, _)| i);
            if let Some(index) = oldest {
                state.notifications.remove(index);
            }
        }
        Ok(())
    }

    fn secrets(&self) -> Arc<EndpointSecrets> {
        self.secrets.clone()
    }
}
