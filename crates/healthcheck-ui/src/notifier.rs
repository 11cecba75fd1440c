//! Failure notifier: webhook delivery for down and recovered transitions.
//!
//! Repeated notifications for an unchanged state are suppressed by looking at
//! the most recent notification recorded for the endpoint. Delivery failures
//! never propagate to the caller.

use crate::config::WebhookSettings;
use crate::metrics::MetricsRegistry;
use crate::store::StatusStore;
use crate::types::FailureNotification;
use crate::uri::{ServerAddresses, split_credentials};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use healthcheck::HealthReport;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LIVENESS_PLACEHOLDER: &str = "[[LIVENESS]]";
const FAILURE_PLACEHOLDER: &str = "[[FAILURE]]";
const DESCRIPTIONS_PLACEHOLDER: &str = "[[DESCRIPTIONS]]";

/// What happened to a notification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Recorded and handed to every webhook
    Sent,
    /// Same state was already notified
    Suppressed,
    /// Could not decide because the notification log was unavailable
    Skipped,
}

impl NotifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyOutcome::Sent => "sent",
            NotifyOutcome::Suppressed => "suppressed",
            NotifyOutcome::Skipped => "skipped",
        }
    }
}

#[async_trait]
pub trait FailureNotifier: Send + Sync {
    /// The endpoint `name` reported a non-healthy status.
    async fn notify_down(&self, name: &str, report: &HealthReport) -> NotifyOutcome;

    /// The endpoint `name` is healthy again.
    async fn notify_wake_up(&self, name: &str) -> NotifyOutcome;
}

/// Notifier that POSTs payload templates to the configured webhooks.
pub struct WebhookNotifier {
    store: Arc<dyn StatusStore>,
    webhooks: Vec<WebhookSettings>,
    addresses: ServerAddresses,
    client: reqwest::Client,
    repeat_after: Option<Duration>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl WebhookNotifier {
    pub fn new(
        store: Arc<dyn StatusStore>,
        webhooks: Vec<WebhookSettings>,
        addresses: ServerAddresses,
        client: reqwest::Client,
    ) -> Self {
        Self {
            store,
            webhooks,
            addresses,
            client,
            repeat_after: None,
            metrics: None,
        }
    }

    /// Re-send an unchanged notification once `repeat_after` has passed.
    pub fn with_repeat_after(mut self, repeat_after: Option<Duration>) -> Self {
        self.repeat_after = repeat_after;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn notify(&self, name: &str, is_up_and_running: bool, failure: &str, descriptions: &str) -> NotifyOutcome {
        let now = Utc::now();
        let kind = if is_up_and_running { "restored" } else { "down" };

        let outcome = match self.store.last_notification(name).await {
            Ok(last) if is_suppressed(last.as_ref(), is_up_and_running, self.repeat_after, now) => {
                debug!(endpoint = %name, kind, "Notification suppressed, state already notified");
                NotifyOutcome::Suppressed
            }
            Ok(_) => {
                let notification = FailureNotification {
                    health_check_name: name.to_string(),
                    last_notified: now,
                    is_up_and_running,
                };
                if let Err(e) = self.store.record_notification(&notification).await {
                    warn!(endpoint = %name, error = %e, "Failed to record notification");
                }

                info!(endpoint = %name, kind, webhooks = self.webhooks.len(), "Sending notification");
                self.deliver_all(name, is_up_and_running, failure, descriptions).await;
                NotifyOutcome::Sent
            }
            Err(e) => {
                warn!(endpoint = %name, kind, error = %e, "Notification log unavailable, skipping notification");
                NotifyOutcome::Skipped
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_notification(kind, outcome.as_str());
        }
        outcome
    }

    async fn deliver_all(&self, name: &str, is_up_and_running: bool, failure: &str, descriptions: &str) {
        let deliveries = self.webhooks.iter().map(|webhook| {
            let template = if is_up_and_running {
                &webhook.restore_payload
            } else {
                &webhook.payload
            };
            let payload = render_payload(template, name, failure, descriptions);
            self.deliver(webhook, payload)
        });

        join_all(deliveries).await;
    }

    async fn deliver(&self, webhook: &WebhookSettings, payload: String) {
        let success = match self.post(webhook, payload).await {
            Ok(status) if status.is_success() => {
                debug!(webhook = %webhook.name, status = status.as_u16(), "Webhook delivered");
                true
            }
            Ok(status) => {
                error!(
                    webhook = %webhook.name,
                    status = status.as_u16(),
                    "Webhook responded with a non-success status"
                );
                false
            }
            Err(e) => {
                error!(webhook = %webhook.name, error = %e, "Webhook delivery failed");
                false
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_webhook_delivery(&webhook.name, success);
        }
    }

    async fn post(&self, webhook: &WebhookSettings, payload: String) -> common::Result<reqwest::StatusCode> {
        let url = self
            .addresses
            .resolve(&webhook.uri)
            .map_err(common::Error::invalid_target)?;
        let (url, credentials) = split_credentials(&url);

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        if let Some(credentials) = credentials {
            request = request.basic_auth(credentials.username, credentials.password);
        }

        let response = request.send().await.map_err(common::Error::http)?;
        Ok(response.status())
    }
}

#[async_trait]
impl FailureNotifier for WebhookNotifier {
    async fn notify_down(&self, name: &str, report: &HealthReport) -> NotifyOutcome {
        let failing: Vec<_> = report.failing_entries().collect();
        let failure = format!("There are at least {} HealthChecks failing.", failing.len());
        let descriptions = failing
            .iter()
            .filter_map(|(_, entry)| entry.description.as_deref())
            .collect::<Vec<_>>()
            .join(" | ");

        self.notify(name, false, &failure, &descriptions).await
    }

    async fn notify_wake_up(&self, name: &str) -> NotifyOutcome {
        self.notify(name, true, "", "").await
    }
}

/// Whether a notification for `is_up_and_running` repeats the last one sent.
pub fn is_suppressed(
    last: Option<&FailureNotification>,
    is_up_and_running: bool,
    repeat_after: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last else {
        return false;
    };
    if last.is_up_and_running != is_up_and_running {
        return false;
    }

    match repeat_after {
        Some(window) => {
            let elapsed = now.signed_duration_since(last.last_notified).to_std().unwrap_or_default();
            elapsed < window
        }
        None => true,
    }
}

/// Substitute the placeholders of a payload template. Values are escaped for
/// use inside a JSON string.
pub fn render_payload(template: &str, name: &str, failure: &str, descriptions: &str) -> String {
    template
        .replace(LIVENESS_PLACEHOLDER, &json_escape(name))
        .replace(FAILURE_PLACEHOLDER, &json_escape(failure))
        .replace(DESCRIPTIONS_PLACEHOLDER, &json_escape(descriptions))
}

fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
