//! Local HTTP servers standing in for polled endpoints and webhook sinks.

#![allow(dead_code)]

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderName, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone)]
struct Reply {
    status: StatusCode,
    body: String,
    delay: Duration,
}

struct EndpointState {
    reply: Mutex<Reply>,
    authorization: Mutex<Option<String>>,
}

/// An endpoint serving a configurable health report on `/health`.
pub struct ReportEndpoint {
    pub addr: SocketAddr,
    state: Arc<EndpointState>,
}

impl ReportEndpoint {
    pub async fn spawn(status: StatusCode, body: String) -> Self {
        let state = Arc::new(EndpointState {
            reply: Mutex::new(Reply {
                status,
                body,
                delay: Duration::ZERO,
            }),
            authorization: Mutex::new(None),
        });

        let app = Router::new()
            .route("/health", get(serve_report))
            .with_state(state.clone());
        let addr = serve(app).await;

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/health", self.addr)
    }

    pub fn reply_with(&self, status: StatusCode, body: String) {
        let mut reply = self.state.reply.lock().unwrap();
        reply.status = status;
        reply.body = body;
    }

    pub fn delay_by(&self, delay: Duration) {
        self.state.reply.lock().unwrap().delay = delay;
    }

    /// Authorization header of the last request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.authorization.lock().unwrap().clone()
    }
}

async fn serve_report(State(state): State<Arc<EndpointState>>, headers: HeaderMap) -> Response {
    *state.authorization.lock().unwrap() = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let reply = state.reply.lock().unwrap().clone();
    tokio::time::sleep(reply.delay).await;

    (reply.status, [("content-type", "application/json")], reply.body).into_response()
}

/// One request received by a [`WebhookSink`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub path: String,
    pub body: String,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
}

struct SinkState {
    status: StatusCode,
    deliveries: Mutex<Vec<Delivery>>,
}

/// Webhook receiver recording every POST to `/hooks/{name}`.
pub struct WebhookSink {
    pub addr: SocketAddr,
    state: Arc<SinkState>,
}

impl WebhookSink {
    pub async fn spawn() -> Self {
        Self::spawn_with_status(StatusCode::OK).await
    }

    pub async fn spawn_with_status(status: StatusCode) -> Self {
        let state = Arc::new(SinkState {
            status,
            deliveries: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/hooks/:name", post(receive_webhook))
            .with_state(state.clone());
        let addr = serve(app).await;

        Self { addr, state }
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/hooks/{}", self.addr, name)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.deliveries.lock().unwrap().clone()
    }
}

async fn receive_webhook(
    State(state): State<Arc<SinkState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.deliveries.lock().unwrap().push(Delivery {
        path: format!("/hooks/{name}"),
        body: String::from_utf8_lossy(&body).into_owned(),
        content_type: header(CONTENT_TYPE),
        authorization: header(AUTHORIZATION),
    });

    state.status
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Health report body with the given overall status and `(name, status, description)` entries.
pub fn report_json(status: &str, entries: &[(&str, &str, &str)]) -> String {
    let entries: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(name, status, description)| {
            (
                name.to_string(),
                json!({
                    "status": status,
                    "description": description,
                    "duration": "00:00:00.0100000",
                    "tags": ["test"],
                }),
            )
        })
        .collect();

    json!({
        "status": status,
        "totalDuration": "00:00:00.0200000",
        "entries": entries,
    })
    .to_string()
}
