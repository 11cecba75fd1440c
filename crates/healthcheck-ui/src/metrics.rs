//! Prometheus metrics for the healthcheck UI service.

use healthcheck::HealthStatus;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for per-endpoint poll metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PollLabels {
    /// Endpoint name
    pub endpoint: String,
    /// Result (healthy, degraded, unhealthy, error)
    pub outcome: String,
}

/// Labels for state transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TransitionLabels {
    pub endpoint: String,
    pub from: String,
    pub to: String,
}

/// Labels for notification metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NotificationLabels {
    /// down or restored
    pub kind: String,
    /// sent, suppressed or skipped
    pub outcome: String,
}

/// Labels for webhook delivery metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WebhookLabels {
    pub webhook: String,
    /// success or failure
    pub result: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (store, list_configurations, ...)
    pub error_type: String,
}

/// Metrics registry with all service metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    polls_total: Family<PollLabels, Counter>,
    state_transitions_total: Family<TransitionLabels, Counter>,
    notifications_total: Family<NotificationLabels, Counter>,
    webhook_deliveries_total: Family<WebhookLabels, Counter>,
    errors_total: Family<ErrorLabels, Counter>,
    endpoints_configured: Gauge,
    collect_duration_seconds: Histogram,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let polls_total = Family::<PollLabels, Counter>::default();
        registry.register(
            "healthcheck_ui_polls_total",
            "Endpoint polls by outcome",
            polls_total.clone(),
        );

        let state_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "healthcheck_ui_state_transitions_total",
            "Aggregate status transitions per endpoint",
            state_transitions_total.clone(),
        );

        let notifications_total = Family::<NotificationLabels, Counter>::default();
        registry.register(
            "healthcheck_ui_notifications_total",
            "Failure and recovery notifications by outcome",
            notifications_total.clone(),
        );

        let webhook_deliveries_total = Family::<WebhookLabels, Counter>::default();
        registry.register(
            "healthcheck_ui_webhook_deliveries_total",
            "Webhook deliveries by result",
            webhook_deliveries_total.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "healthcheck_ui_errors_total",
            "Total errors by type",
            errors_total.clone(),
        );

        let endpoints_configured = Gauge::default();
        registry.register(
            "healthcheck_ui_endpoints_configured",
            "Number of configured endpoints",
            endpoints_configured.clone(),
        );

        // 5ms to ~80s
        let collect_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 15));
        registry.register(
            "healthcheck_ui_collect_duration_seconds",
            "Duration of a full collection cycle",
            collect_duration_seconds.clone(),
        );

        Self {
            registry,
            polls_total,
            state_transitions_total,
            notifications_total,
            webhook_deliveries_total,
            errors_total,
            endpoints_configured,
            collect_duration_seconds,
        }
    }

    /// Record one endpoint poll
    pub fn record_poll(&self, endpoint: &str, outcome: &str) {
        self.polls_total
            .get_or_create(&PollLabels {
                endpoint: endpoint.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record an aggregate status change
    pub fn record_state_transition(&self, endpoint: &str, from: HealthStatus, to: HealthStatus) {
        self.state_transitions_total
            .get_or_create(&TransitionLabels {
                endpoint: endpoint.to_string(),
                from: status_label(from),
                to: status_label(to),
            })
            .inc();
    }

    pub fn record_notification(&self, kind: &str, outcome: &str) {
        self.notifications_total
            .get_or_create(&NotificationLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_webhook_delivery(&self, webhook: &str, success: bool) {
        self.webhook_deliveries_total
            .get_or_create(&WebhookLabels {
                webhook: webhook.to_string(),
                result: if success { "success" } else { "failure" }.to_string(),
            })
            .inc();
    }

    /// Record error by type
    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn update_endpoint_count(&self, count: usize) {
        self.endpoints_configured.set(count as i64);
    }

    pub fn record_collect_duration(&self, duration: Duration) {
        self.collect_duration_seconds.observe(duration.as_secs_f64());
    }
}

/// Lowercase status name for labels
pub fn status_label(status: HealthStatus) -> String {
    status.as_str().to_ascii_lowercase()
}
