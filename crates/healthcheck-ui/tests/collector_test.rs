//! Integration tests for the poll-and-reconcile loop

mod support;

use async_trait::async_trait;
use axum::http::StatusCode;
use healthcheck::{HealthReport, HealthStatus};
use healthcheck_ui::collector::{CANCELED_MESSAGE, Collector};
use healthcheck_ui::notifier::{FailureNotifier, NotifyOutcome};
use healthcheck_ui::store::{MemoryStore, StatusStore};
use healthcheck_ui::types::NewEndpoint;
use healthcheck_ui::uri::ServerAddresses;
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;
use support::{ReportEndpoint, report_json};
use tokio_util::sync::CancellationToken;

mock! {
    pub Notifier {}

    #[async_trait]
    impl FailureNotifier for Notifier {
        async fn notify_down(&self, name: &str, report: &HealthReport) -> NotifyOutcome;
        async fn notify_wake_up(&self, name: &str) -> NotifyOutcome;
    }
}

fn addresses() -> ServerAddresses {
    ServerAddresses::from_socket_addr("127.0.0.1:5000".parse().unwrap()).unwrap()
}

fn collector(store: Arc<MemoryStore>, notifier: MockNotifier) -> Collector {
    Collector::new(store, Arc::new(notifier), addresses(), Duration::from_secs(2))
}

async fn store_with(endpoints: &[(&str, &str)]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let configured: Vec<_> = endpoints
        .iter()
        .map(|(name, uri)| NewEndpoint::new(*name, *uri))
        .collect();
    store.sync_configurations(&configured).await.unwrap();
    store
}

fn healthy_body() -> String {
    report_json("Healthy", &[("self", "Healthy", "ok")])
}

fn unhealthy_body() -> String {
    report_json("Unhealthy", &[("self", "Unhealthy", "database unreachable")])
}

#[tokio::test]
async fn test_transition_to_unhealthy_records_history_and_notifies_once() {
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = store_with(&[("svc-a", endpoint.url().as_str())]).await;

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify_down()
        .withf(|name, report| name == "svc-a" && report.status == HealthStatus::Unhealthy)
        .times(1)
        .returning(|_, _| NotifyOutcome::Sent);
    let collector = collector(store.clone(), notifier);
    let cancel = CancellationToken::new();

    collector.collect(&cancel).await.unwrap();
    let before = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(before.status, HealthStatus::Healthy);
    assert!(before.history.is_empty());

    endpoint.reply_with(StatusCode::SERVICE_UNAVAILABLE, unhealthy_body());
    let summary = collector.collect(&cancel).await.unwrap();

    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.failing, 1);

    let after = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(after.status, HealthStatus::Unhealthy);
    assert_eq!(after.history.len(), 1);
    assert_eq!(after.history[0].name, "self");
    assert_eq!(after.history[0].status, HealthStatus::Unhealthy);
    assert_eq!(after.history[0].description.as_deref(), Some("database unreachable"));
    assert_eq!(after.on_state_from, after.last_executed);
    assert!(after.on_state_from > before.on_state_from);
}

#[tokio::test]
async fn test_steady_state_polls_do_not_grow_history() {
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = store_with(&[("svc-a", endpoint.url().as_str())]).await;
    let collector = collector(store.clone(), MockNotifier::new());
    let cancel = CancellationToken::new();

    collector.collect(&cancel).await.unwrap();
    let first = store.get_execution("svc-a").await.unwrap().unwrap();

    for _ in 0..3 {
        let summary = collector.collect(&cancel).await.unwrap();
        assert_eq!(summary.transitions, 0);
    }

    let last = store.get_execution("svc-a").await.unwrap().unwrap();
    assert!(last.history.is_empty());
    assert_eq!(last.on_state_from, first.on_state_from);
    assert!(last.last_executed >= first.last_executed);
    assert_eq!(store.list_executions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recovery_notifies_wake_up() {
    let endpoint = ReportEndpoint::spawn(StatusCode::SERVICE_UNAVAILABLE, unhealthy_body()).await;
    let store = store_with(&[("svc-a", endpoint.url().as_str())]).await;

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify_down()
        .times(1)
        .returning(|_, _| NotifyOutcome::Sent);
    notifier
        .expect_notify_wake_up()
        .withf(|name| name == "svc-a")
        .times(1)
        .returning(|_| NotifyOutcome::Sent);
    let collector = collector(store.clone(), notifier);
    let cancel = CancellationToken::new();

    collector.collect(&cancel).await.unwrap();
    endpoint.reply_with(StatusCode::OK, healthy_body());
    collector.collect(&cancel).await.unwrap();

    let record = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_timeout_yields_canceled_description_and_cycle_continues() {
    let slow = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    slow.delay_by(Duration::from_secs(5));
    let fast = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = store_with(&[("slow", slow.url().as_str()), ("fast", fast.url().as_str())]).await;

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify_down()
        .withf(|name, _| name == "slow")
        .times(1)
        .returning(|_, _| NotifyOutcome::Sent);
    let collector = Collector::new(
        store.clone(),
        Arc::new(notifier),
        addresses(),
        Duration::from_millis(200),
    );

    let summary = collector.collect(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.polled, 2);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.failing, 1);

    let slow_record = store.get_execution("slow").await.unwrap().unwrap();
    assert_eq!(slow_record.status, HealthStatus::Unhealthy);
    let description = slow_record.entries[0].description.clone().unwrap();
    assert!(description.starts_with(CANCELED_MESSAGE), "{description}");

    let fast_record = store.get_execution("fast").await.unwrap().unwrap();
    assert_eq!(fast_record.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_unhealthy_status_code_still_reads_report() {
    let endpoint = ReportEndpoint::spawn(
        StatusCode::SERVICE_UNAVAILABLE,
        report_json(
            "Degraded",
            &[("db", "Healthy", "ok"), ("cache", "Degraded", "slow")],
        ),
    )
    .await;
    let store = store_with(&[("svc-a", endpoint.url().as_str())]).await;

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify_down()
        .times(1)
        .returning(|_, _| NotifyOutcome::Sent);
    collector(store.clone(), notifier)
        .collect(&CancellationToken::new())
        .await
        .unwrap();

    let record = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Degraded);
    assert!(record.entry("db").is_some());
    assert_eq!(record.entry("cache").unwrap().status, HealthStatus::Degraded);
    assert_eq!(record.entry("cache").unwrap().duration, Duration::from_millis(10));
}

#[tokio::test]
async fn test_malformed_body_is_recorded_as_failure() {
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, "<html>oops</html>".to_string()).await;
    let store = store_with(&[("svc-a", endpoint.url().as_str())]).await;

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify_down()
        .times(1)
        .returning(|_, _| NotifyOutcome::Sent);
    collector(store.clone(), notifier)
        .collect(&CancellationToken::new())
        .await
        .unwrap();

    let record = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Unhealthy);
    let entry = record.entry("Endpoint").unwrap();
    assert!(entry.description.as_deref().unwrap().contains("invalid health report"));
}

#[tokio::test]
async fn test_ordinal_statuses_are_accepted() {
    let body = serde_json::json!({
        "status": 2,
        "totalDuration": 0.5,
        "entries": { "self": { "status": 2, "duration": "00:00:00.1000000", "tags": null } }
    })
    .to_string();
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, body).await;
    let store = store_with(&[("svc-a", endpoint.url().as_str())]).await;

    collector(store.clone(), MockNotifier::new())
        .collect(&CancellationToken::new())
        .await
        .unwrap();

    let record = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_credentials_are_sent_but_never_persisted() {
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let uri = format!("http://user:pass@{}/health", endpoint.addr);
    let store = store_with(&[("svc-a", uri.as_str())]).await;

    collector(store.clone(), MockNotifier::new())
        .collect(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(endpoint.last_authorization().as_deref(), Some("Basic dXNlcjpwYXNz"));

    let host = endpoint.addr.to_string();
    let configurations = store.list_configurations().await.unwrap();
    assert_eq!(configurations[0].uri, host);

    let record = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.uri, host);
    assert!(!record.uri.contains("pass"));
}

#[tokio::test]
async fn test_discovered_endpoint_credentials_are_sent() {
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_configuration(
            NewEndpoint::new(" Svc-Found ", format!("http://user:pass@{}/health", endpoint.addr))
                .discovered_by("kubernetes"),
        )
        .await
        .unwrap();

    collector(store.clone(), MockNotifier::new())
        .collect(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(endpoint.last_authorization().as_deref(), Some("Basic dXNlcjpwYXNz"));
    let configurations = store.list_configurations().await.unwrap();
    assert_eq!(configurations[0].uri, endpoint.addr.to_string());
    let record = store.get_execution(&configurations[0].name).await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.discovery_service.as_deref(), Some("kubernetes"));
}

#[tokio::test]
async fn test_overflowing_duration_fails_only_that_endpoint() {
    let bad = ReportEndpoint::spawn(
        StatusCode::OK,
        serde_json::json!({
            "status": "Healthy",
            "totalDuration": "999999999999999999.00:00:00",
            "entries": {}
        })
        .to_string(),
    )
    .await;
    let good = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = store_with(&[("bad", bad.url().as_str()), ("good", good.url().as_str())]).await;

    let mut notifier = MockNotifier::new();
    notifier
        .expect_notify_down()
        .withf(|name, _| name == "bad")
        .times(1)
        .returning(|_, _| NotifyOutcome::Sent);
    let summary = collector(store.clone(), notifier)
        .collect(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.polled, 2);

    let bad_record = store.get_execution("bad").await.unwrap().unwrap();
    assert_eq!(bad_record.status, HealthStatus::Unhealthy);
    let description = bad_record.entry("Endpoint").unwrap().description.clone().unwrap();
    assert!(description.contains("invalid health report"), "{description}");

    let good_record = store.get_execution("good").await.unwrap().unwrap();
    assert_eq!(good_record.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_relative_uri_resolves_against_server_address() {
    let endpoint = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = store_with(&[("self", "/health")]).await;

    let collector = Collector::new(
        store.clone(),
        Arc::new(MockNotifier::new()),
        ServerAddresses::from_socket_addr(endpoint.addr).unwrap(),
        Duration::from_secs(2),
    );
    collector.collect(&CancellationToken::new()).await.unwrap();

    let record = store.get_execution("self").await.unwrap().unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.uri, "/health");
}

#[tokio::test]
async fn test_uri_change_applies_on_next_poll() {
    let first = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let second = ReportEndpoint::spawn(StatusCode::OK, healthy_body()).await;
    let store = store_with(&[("svc-a", first.url().as_str())]).await;
    let collector = collector(store.clone(), MockNotifier::new());
    let cancel = CancellationToken::new();

    collector.collect(&cancel).await.unwrap();
    assert_eq!(store.get_execution("svc-a").await.unwrap().unwrap().uri, first.url());

    store
        .upsert_configuration(NewEndpoint::new("svc-a", second.url()))
        .await
        .unwrap();
    collector.collect(&cancel).await.unwrap();

    let record = store.get_execution("svc-a").await.unwrap().unwrap();
    assert_eq!(record.uri, second.url());
    assert_eq!(record.status, HealthStatus::Healthy);
}
