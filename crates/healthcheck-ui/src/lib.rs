//! Healthcheck UI - status aggregation for health-check endpoints
//!
//! Polls a set of configured endpoints that serve a [`healthcheck::HealthReport`],
//! keeps the latest state of each endpoint with a history of its status
//! transitions, and sends webhook notifications when an endpoint goes down or
//! recovers.
//!
//! # Components
//!
//! - **Store**: endpoint configurations, execution records and the
//!   notification log (in memory or SQLite)
//! - **Collector**: one poll-and-reconcile pass over every endpoint
//! - **Notifier**: webhook delivery with repeat suppression
//! - **Scheduler**: background loop running the collector on an interval
//! - **HTTP API**: stored statuses, configuration echo, self health, metrics

pub mod collector;
pub mod config;
pub mod http_server;
pub mod metrics;
pub mod notifier;
pub mod reconcile;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;
pub mod uri;

pub use collector::{Collector, CollectError, CycleSummary};
pub use config::{Config, ConfigError};
pub use metrics::MetricsRegistry;
pub use notifier::{FailureNotifier, NotifyOutcome, WebhookNotifier};
pub use scheduler::{CollectorService, CycleRunner, SchedulerError, ServiceState, StopOutcome};
pub use server::{HealthcheckUiServer, ServerError};
pub use store::{MemoryStore, SqliteStore, StatusStore, StoreError};
pub use types::{EndpointConfiguration, ExecutionEntry, ExecutionRecord, FailureNotification, HistoryEntry};
