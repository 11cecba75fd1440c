//! Status store: endpoint configurations, execution records and the
//! notification log.
//!
//! Two backends implement [`StatusStore`]: [`MemoryStore`] for ephemeral runs
//! and tests, [`SqliteStore`] for persistent deployments. Both guarantee that a
//! reader never observes a half-written execution record, and both store URIs
//! only in their redacted form. Credentials are kept in memory, in the
//! store's [`EndpointSecrets`].

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{StorageBackend, StorageSettings};
use crate::types::{EndpointConfiguration, ExecutionRecord, FailureNotification, NewEndpoint};
use crate::uri::EndpointSecrets;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("stored data is invalid: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of syncing static configuration into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// All endpoint configurations ordered by id.
    async fn list_configurations(&self) -> Result<Vec<EndpointConfiguration>, StoreError>;

    /// Make the static (non-discovered) configurations match `configured`:
    /// add new names, update changed URIs and remove static endpoints that are
    /// no longer configured together with their execution records.
    async fn sync_configurations(&self, configured: &[NewEndpoint]) -> Result<SyncSummary, StoreError>;

    /// Insert or update a single configuration by name.
    async fn upsert_configuration(&self, endpoint: NewEndpoint) -> Result<EndpointConfiguration, StoreError>;

    /// Remove a configuration and its execution record. Returns whether it existed.
    async fn remove_configuration(&self, name: &str) -> Result<bool, StoreError>;

    async fn get_execution(&self, name: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Atomically upsert a record with its entries and append any new history.
    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// All execution records ordered by name.
    async fn list_executions(&self) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Most recent notification for `name`, compared case-insensitively.
    async fn last_notification(&self, name: &str) -> Result<Option<FailureNotification>, StoreError>;

    /// Up to `limit` notifications for `name`, newest first.
    async fn recent_notifications(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<FailureNotification>, StoreError>;

    async fn record_notification(&self, notification: &FailureNotification) -> Result<(), StoreError>;

    /// Credentialed URIs of the stored endpoints. Kept up to date by every
    /// sync, upsert and removal, never persisted.
    fn secrets(&self) -> Arc<EndpointSecrets>;
}

/// Open the backend selected by `settings`.
pub async fn open(settings: &StorageSettings) -> Result<Arc<dyn StatusStore>, StoreError> {
    match settings.backend {
        StorageBackend::Memory => {
            info!("Using in-memory status store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            info!(path = %settings.path.display(), "Using SQLite status store");
            Ok(Arc::new(SqliteStore::open(&settings.path).await?))
        }
    }
}
