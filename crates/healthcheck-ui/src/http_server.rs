//! HTTP API: stored statuses, configuration echo, self health and metrics.

use crate::config::WebhookSettings;
use crate::metrics::MetricsRegistry;
use crate::store::StatusStore;
use crate::types::ExecutionRecord;
use crate::uri::redact;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use healthcheck::{HealthCheckRegistry, HealthCheckResult, HealthChecker, HealthStatus};
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared state of the API handlers
pub struct ApiState {
    pub store: Arc<dyn StatusStore>,
    pub webhooks: Vec<WebhookSettings>,
    pub max_history: usize,
    pub metrics: Option<Arc<MetricsRegistry>>,
    /// Checks behind `/health`
    pub health: Arc<HealthCheckRegistry>,
}

type SharedState = Arc<ApiState>;

/// Webhook as echoed by `/api/webhooks`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookView {
    pub name: String,
    pub uri: String,
    pub payload: Value,
    pub restore_payload: Value,
}

impl WebhookView {
    fn from_settings(webhook: &WebhookSettings) -> Self {
        Self {
            name: webhook.name.clone(),
            uri: redact(&webhook.uri),
            payload: parse_payload(&webhook.name, &webhook.payload),
            restore_payload: parse_payload(&webhook.name, &webhook.restore_payload),
        }
    }
}

/// Build the API router. `max_active_requests` of 0 disables request limiting.
pub fn router(state: ApiState, max_active_requests: usize) -> Router {
    let mut api = Router::new()
        .route("/api/healthchecks", get(list_healthchecks))
        .route("/api/endpoints", get(list_endpoints))
        .route("/api/webhooks", get(list_webhooks));

    if max_active_requests > 0 {
        let permits = Arc::new(Semaphore::new(max_active_requests));
        api = api.layer(middleware::from_fn_with_state(permits, limit_requests));
    }

    Router::new()
        .merge(api)
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(Arc::new(state))
}

async fn limit_requests(State(permits): State<Arc<Semaphore>>, request: Request, next: Next) -> Response {
    match permits.try_acquire_owned() {
        Ok(_permit) => next.run(request).await,
        Err(_) => (StatusCode::TOO_MANY_REQUESTS, "Too many active requests").into_response(),
    }
}

async fn list_healthchecks(State(state): State<SharedState>) -> Response {
    match state.store.list_executions().await {
        Ok(records) => {
            let records: Vec<ExecutionRecord> = records
                .into_iter()
                .map(|record| newest_history_first(record, state.max_history))
                .collect();
            Json(records).into_response()
        }
        Err(e) => store_unavailable(e),
    }
}

async fn list_endpoints(State(state): State<SharedState>) -> Response {
    match state.store.list_configurations().await {
        Ok(configurations) => Json(configurations).into_response(),
        Err(e) => store_unavailable(e),
    }
}

async fn list_webhooks(State(state): State<SharedState>) -> Json<Vec<WebhookView>> {
    Json(state.webhooks.iter().map(WebhookView::from_settings).collect())
}

async fn health_handler(State(state): State<SharedState>) -> Response {
    let report = state.health.run().await;
    let code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report)).into_response()
}

async fn metrics_handler(State(state): State<SharedState>) -> Response {
    let Some(registry) = &state.metrics else {
        return (StatusCode::NOT_FOUND, "Metrics are disabled").into_response();
    };

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}

fn store_unavailable(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "Status store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Status store unavailable" })),
    )
        .into_response()
}

/// Reverse history to newest first and keep at most `max` entries.
fn newest_history_first(mut record: ExecutionRecord, max: usize) -> ExecutionRecord {
    record.history.reverse();
    record.history.truncate(max);
    record
}

/// Payload templates are JSON documents; anything else is shown as `{}`.
fn parse_payload(webhook: &str, payload: &str) -> Value {
    if payload.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(payload).unwrap_or_else(|e| {
        warn!(webhook = %webhook, error = %e, "Webhook payload is not valid JSON");
        Value::Object(Map::new())
    })
}

/// Reports whether the status store answers queries.
pub struct StoreChecker {
    store: Arc<dyn StatusStore>,
}

impl StoreChecker {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthChecker for StoreChecker {
    async fn check(&self) -> HealthCheckResult {
        let start = Instant::now();
        match self.store.list_configurations().await {
            Ok(_) => HealthCheckResult::healthy(start.elapsed()),
            Err(e) => HealthCheckResult::error(start.elapsed(), format!("Status store query failed: {e}")),
        }
    }

    fn name(&self) -> &str {
        "store"
    }
}
