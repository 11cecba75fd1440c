//! Poll-and-reconcile loop.
//!
//! One call to [`Collector::collect`] walks every configured endpoint in id
//! order: resolve its URI, fetch its report, reconcile against the stored
//! record, notify on failures and recoveries, then persist. A failing endpoint
//! never aborts the rest of the cycle.

use crate::metrics::MetricsRegistry;
use crate::notifier::FailureNotifier;
use crate::reconcile::{Reconciliation, reconcile};
use crate::scheduler::CycleRunner;
use crate::store::{StatusStore, StoreError};
use crate::types::{EndpointConfiguration, EndpointId};
use crate::uri::{EndpointSecrets, ServerAddresses, UriError, is_http_endpoint, redact, split_credentials};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use healthcheck::{ClientRegistry, ConnectionKey, HealthReport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Description prefix of the synthetic report for a request that was cut short.
pub const CANCELED_MESSAGE: &str = "The operation was canceled.";

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to list endpoint configurations: {0}")]
    ListConfigurations(#[source] StoreError),
}

/// Why a report could not be fetched.
#[derive(Debug, Error)]
enum FetchError {
    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Client(#[from] common::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid health report: {0}")]
    Body(#[from] serde_json::Error),
}

/// Counters for one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub polled: usize,
    pub healthy: usize,
    pub failing: usize,
    pub transitions: usize,
    pub persistence_failures: usize,
    /// The cycle stopped early on cancellation
    pub cancelled: bool,
}

enum Fetched {
    Report(HealthReport),
    Failed(String),
    Cancelled,
}

#[derive(Clone)]
struct CachedUri {
    /// Configured (stored) URI the resolution was made from
    configured: String,
    resolved: Url,
}

pub struct Collector {
    store: Arc<dyn StatusStore>,
    notifier: Arc<dyn FailureNotifier>,
    clients: ClientRegistry<reqwest::Client>,
    addresses: ServerAddresses,
    secrets: Arc<EndpointSecrets>,
    request_timeout: Duration,
    uri_cache: DashMap<EndpointId, CachedUri>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Collector {
    pub fn new(
        store: Arc<dyn StatusStore>,
        notifier: Arc<dyn FailureNotifier>,
        addresses: ServerAddresses,
        request_timeout: Duration,
    ) -> Self {
        let secrets = store.secrets();
        Self {
            store,
            notifier,
            clients: ClientRegistry::new(),
            addresses,
            secrets,
            request_timeout,
            uri_cache: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one collection cycle.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<CycleSummary, CollectError> {
        let start = Instant::now();
        let configurations = self.store.list_configurations().await.map_err(|e| {
            self.record_error("list_configurations");
            CollectError::ListConfigurations(e)
        })?;

        if let Some(metrics) = &self.metrics {
            metrics.update_endpoint_count(configurations.len());
        }

        let mut summary = CycleSummary::default();
        for config in &configurations {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let (report, outcome) = match self.fetch(config, cancel).await {
                Fetched::Report(report) => {
                    let outcome = report.status.as_str().to_ascii_lowercase();
                    (report, outcome)
                }
                Fetched::Failed(message) => {
                    warn!(endpoint = %config.name, error = %message, "Failed to read health report");
                    (HealthReport::from_failure(message), "error".to_string())
                }
                Fetched::Cancelled => {
                    debug!(endpoint = %config.name, "Poll abandoned on cancellation");
                    summary.cancelled = true;
                    break;
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_poll(&config.name, &outcome);
            }
            summary.polled += 1;

            match self.process(config, &report).await {
                Ok(reconciled) => {
                    if reconciled.record.status.is_healthy() {
                        summary.healthy += 1;
                    } else {
                        summary.failing += 1;
                    }
                    if reconciled.status_changed() {
                        summary.transitions += 1;
                    }
                }
                Err(e) => {
                    error!(endpoint = %config.name, error = %e, "Failed to persist execution");
                    self.record_error("store");
                    summary.persistence_failures += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_collect_duration(elapsed);
        }

        debug!(
            polled = summary.polled,
            healthy = summary.healthy,
            failing = summary.failing,
            transitions = summary.transitions,
            duration_ms = elapsed.as_millis(),
            "Collection cycle finished"
        );

        Ok(summary)
    }

    /// Reconcile a report with the stored record, notify, then persist.
    async fn process(
        &self,
        config: &EndpointConfiguration,
        report: &HealthReport,
    ) -> Result<Reconciliation, StoreError> {
        let existing = self.store.get_execution(&config.name).await?;
        let reconciled = reconcile(existing, config, report, Utc::now());

        if reconciled.uri_changed {
            debug!(endpoint = %config.name, uri = %config.uri, "Endpoint URI changed");
            self.uri_cache.remove(&config.id);
        }

        if let Some(previous) = reconciled.previous_status
            && reconciled.status_changed()
        {
            info!(
                endpoint = %config.name,
                from = %previous,
                to = %reconciled.record.status,
                "Endpoint status changed"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_state_transition(&config.name, previous, reconciled.record.status);
            }
        }

        if !reconciled.record.status.is_healthy() {
            self.notifier.notify_down(&config.name, report).await;
        } else if reconciled.recovered() {
            self.notifier.notify_wake_up(&config.name).await;
        }

        self.store.save_execution(&reconciled.record).await?;
        Ok(reconciled)
    }

    async fn fetch(&self, config: &EndpointConfiguration, cancel: &CancellationToken) -> Fetched {
        let request = tokio::time::timeout(self.request_timeout, self.request_report(config));

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Fetched::Cancelled,
            result = request => match result {
                Ok(Ok(report)) => Fetched::Report(report),
                Ok(Err(e)) => Fetched::Failed(e.to_string()),
                Err(_) => Fetched::Failed(format!(
                    "{CANCELED_MESSAGE} No response within {:?}.",
                    self.request_timeout
                )),
            },
        }
    }

    async fn request_report(&self, config: &EndpointConfiguration) -> Result<HealthReport, FetchError> {
        let resolved = self.resolve(config)?;
        let key = ConnectionKey::from_url(resolved.as_str())?;
        let client = self.clients.get_or_try_create(key, || {
            reqwest::Client::builder()
                .build()
                .map_err(common::Error::http)
        })?;

        let (url, credentials) = split_credentials(&resolved);
        let mut request = client.get(url);
        if let Some(credentials) = credentials {
            request = request.basic_auth(credentials.username, credentials.password);
        }

        // Endpoints answer 503 with a full report when unhealthy, so the body
        // is read whatever the status code.
        let response = request.send().await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Absolute URI for an endpoint, cached by id until its configured URI changes.
    ///
    /// A credentialed URI registered under the endpoint's name wins as long as
    /// it redacts to the stored URI. Secrets are read on every poll, never cached.
    fn resolve(&self, config: &EndpointConfiguration) -> Result<Url, UriError> {
        if let Some(secret) = self
            .secrets
            .get(&config.name)
            .filter(|secret| is_http_endpoint(secret) && redact(secret.as_str()) == config.uri)
        {
            return Ok(secret);
        }

        if let Some(cached) = self.uri_cache.get(&config.id)
            && cached.configured == config.uri
        {
            return Ok(cached.resolved.clone());
        }

        let resolved = self.addresses.resolve(&config.uri)?;

        self.uri_cache.insert(
            config.id,
            CachedUri {
                configured: config.uri.clone(),
                resolved: resolved.clone(),
            },
        );
        Ok(resolved)
    }

    fn record_error(&self, error_type: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(error_type);
        }
    }
}

#[async_trait]
impl CycleRunner for Collector {
    async fn run_cycle(&self, cancel: &CancellationToken) {
        match self.collect(cancel).await {
            Ok(summary) if summary.persistence_failures > 0 => {
                warn!(
                    failures = summary.persistence_failures,
                    polled = summary.polled,
                    "Collection cycle finished with persistence failures"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Collection cycle failed, retrying next interval"),
        }
    }
}
