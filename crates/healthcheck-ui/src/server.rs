//! Service wiring: status store, collector service and the HTTP API.

use crate::collector::Collector;
use crate::config::Config;
use crate::http_server::{ApiState, StoreChecker, router};
use crate::metrics::MetricsRegistry;
use crate::notifier::WebhookNotifier;
use crate::scheduler::{CollectorService, SchedulerError};
use crate::store::{self, StoreError};
use crate::types::NewEndpoint;
use crate::uri::{ServerAddresses, UriError};
use healthcheck::HealthCheckRegistry;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("status store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid server address: {0}")]
    Address(#[from] UriError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Healthcheck UI service
pub struct HealthcheckUiServer {
    config: Config,
}

impl HealthcheckUiServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind the configured listen address and serve until Ctrl-C.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.server.listen_addr.trim().to_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
            signal.cancel();
        });

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), ServerError> {
        let config = self.config;
        let local_addr = listener.local_addr()?;
        info!(listen_addr = %local_addr, "Starting healthcheck UI server");

        let store = store::open(&config.storage).await?;
        let configured: Vec<NewEndpoint> = config
            .endpoints
            .iter()
            .map(|e| NewEndpoint::new(e.name.trim(), e.uri.trim()))
            .collect();
        let synced = store.sync_configurations(&configured).await?;
        info!(
            added = synced.added,
            updated = synced.updated,
            removed = synced.removed,
            "Endpoint configuration synced"
        );

        let metrics = if config.metrics.enabled {
            info!("Metrics enabled on /metrics");
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let addresses = ServerAddresses::from_socket_addr(local_addr)?;

        let webhook_client = reqwest::Client::builder()
            .timeout(config.collector.request_timeout)
            .build()?;
        let mut notifier = WebhookNotifier::new(
            store.clone(),
            config.webhooks.clone(),
            addresses.clone(),
            webhook_client,
        )
        .with_repeat_after(config.notifications.repeat_after);
        if let Some(registry) = &metrics {
            notifier = notifier.with_metrics(registry.clone());
        }

        let mut collector = Collector::new(
            store.clone(),
            Arc::new(notifier),
            addresses,
            config.collector.request_timeout,
        );
        if let Some(registry) = &metrics {
            collector = collector.with_metrics(registry.clone());
        }

        let service = CollectorService::new(Arc::new(collector), config.collector.evaluation_interval);
        service.start().await?;

        let mut health = HealthCheckRegistry::new();
        health.register("store", Arc::new(StoreChecker::new(store.clone())), ["storage"]);

        let app = router(
            ApiState {
                store,
                webhooks: config.webhooks,
                max_history: config.api.max_history_per_endpoint,
                metrics,
                health: Arc::new(health),
            },
            config.server.max_active_requests,
        );

        info!(listen_addr = %local_addr, "API server listening");
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;

        if let Err(e) = service.stop(config.collector.shutdown_grace).await {
            warn!(error = %e, "Failed to stop collector service");
        }

        served?;
        info!("Healthcheck UI server stopped");
        Ok(())
    }
}
