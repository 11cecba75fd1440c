//! Probes that feed a [`HealthCheckRegistry`](crate::registry::HealthCheckRegistry).
//!
//! Every probe runs under its own deadline. A probe that errors reports
//! `Unhealthy` with the error as exception text; a probe that misses its
//! deadline reports `Unhealthy` with a "timed out" description.

use crate::clients::{ClientRegistry, ConnectionKey};
use crate::types::HealthCheckResult;
use async_trait::async_trait;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self) -> HealthCheckResult;

    /// Kind of probe, used in logs
    fn name(&self) -> &str;
}

/// Outcome of a probe bounded by a deadline.
enum Probe<T, E> {
    Done(T),
    Failed(E),
    TimedOut,
}

/// Run `work` with a deadline and report how long it took.
async fn probe<F, T, E>(deadline: Duration, work: F) -> (Duration, Probe<T, E>)
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let outcome = match tokio::time::timeout(deadline, work).await {
        Ok(Ok(value)) => Probe::Done(value),
        Ok(Err(e)) => Probe::Failed(e),
        Err(_) => Probe::TimedOut,
    };
    (start.elapsed(), outcome)
}

/// Healthy when a TCP connection to `target` opens in time.
pub struct TcpChecker {
    target: SocketAddr,
    deadline: Duration,
}

impl TcpChecker {
    pub fn new(target: SocketAddr, deadline: Duration) -> Self {
        Self { target, deadline }
    }
}

#[async_trait]
impl HealthChecker for TcpChecker {
    async fn check(&self) -> HealthCheckResult {
        match probe(self.deadline, TcpStream::connect(self.target)).await {
            (elapsed, Probe::Done(_stream)) => {
                debug!(target = %self.target, elapsed_ms = elapsed.as_millis(), "Connected");
                HealthCheckResult::healthy(elapsed)
            }
            (elapsed, Probe::Failed(e)) => {
                warn!(target = %self.target, error = %e, "Connect failed");
                HealthCheckResult::error(elapsed, format!("Connection failed: {e}"))
            }
            (elapsed, Probe::TimedOut) => {
                warn!(target = %self.target, deadline = ?self.deadline, "Connect timed out");
                HealthCheckResult::timeout(elapsed)
            }
        }
    }

    fn name(&self) -> &str {
        "tcp"
    }
}

/// Requests `url` and compares the response code against `expected_codes`
/// (any code is accepted when the list is empty).
pub struct HttpChecker {
    url: String,
    method: reqwest::Method,
    expected_codes: Vec<u16>,
    deadline: Duration,
    degraded_after: Option<Duration>,
    client: reqwest::Client,
}

impl HttpChecker {
    /// Checker with a dedicated client.
    pub fn new(
        url: String,
        method: reqwest::Method,
        expected_codes: Vec<u16>,
        deadline: Duration,
    ) -> common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(common::Error::http)?;
        Ok(Self::with_client(client, url, method, expected_codes, deadline))
    }

    /// Checker that shares a client with every other checker for the same
    /// connection identity.
    pub fn with_registry(
        registry: &ClientRegistry<reqwest::Client>,
        url: String,
        method: reqwest::Method,
        expected_codes: Vec<u16>,
        deadline: Duration,
    ) -> common::Result<Self> {
        let key = ConnectionKey::from_url(&url)?;
        let client = registry.get_or_try_create(key, || {
            reqwest::Client::builder().build().map_err(common::Error::http)
        })?;
        Ok(Self::with_client(client, url, method, expected_codes, deadline))
    }

    fn with_client(
        client: reqwest::Client,
        url: String,
        method: reqwest::Method,
        expected_codes: Vec<u16>,
        deadline: Duration,
    ) -> Self {
        Self {
            url,
            method,
            expected_codes,
            deadline,
            degraded_after: None,
            client,
        }
    }

    /// Report `Degraded` when an accepted response takes longer than `threshold`.
    pub fn degraded_after(mut self, threshold: Duration) -> Self {
        self.degraded_after = Some(threshold);
        self
    }

    fn judge(&self, code: u16, elapsed: Duration) -> HealthCheckResult {
        if !self.expected_codes.is_empty() && !self.expected_codes.contains(&code) {
            warn!(url = %self.url, code, "Unexpected response code");
            return HealthCheckResult::unhealthy(elapsed, format!("Unexpected status code: {code}"))
                .with_response_code(code);
        }

        let result = match self.degraded_after {
            Some(threshold) if elapsed > threshold => {
                warn!(url = %self.url, elapsed_ms = elapsed.as_millis(), "Slow response");
                HealthCheckResult::degraded(elapsed, format!("Response took {}ms", elapsed.as_millis()))
            }
            _ => {
                debug!(url = %self.url, code, elapsed_ms = elapsed.as_millis(), "Request succeeded");
                HealthCheckResult::healthy(elapsed)
            }
        };
        result.with_response_code(code)
    }
}

#[async_trait]
impl HealthChecker for HttpChecker {
    async fn check(&self) -> HealthCheckResult {
        let request = self.client.request(self.method.clone(), &self.url).send();

        match probe(self.deadline, request).await {
            (elapsed, Probe::Done(response)) => self.judge(response.status().as_u16(), elapsed),
            (elapsed, Probe::Failed(e)) => {
                warn!(url = %self.url, error = %e, "Request failed");
                HealthCheckResult::error(elapsed, format!("HTTP request failed: {e}"))
            }
            (elapsed, Probe::TimedOut) => {
                warn!(url = %self.url, deadline = ?self.deadline, "Request timed out");
                HealthCheckResult::timeout(elapsed)
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Resolves `host` with the system resolver. When `expected` is non-empty at
/// least one of those addresses must be among the answers.
pub struct DnsChecker {
    host: String,
    expected: Vec<IpAddr>,
    deadline: Duration,
}

impl DnsChecker {
    pub fn new(host: String, expected: Vec<IpAddr>, deadline: Duration) -> Self {
        Self {
            host,
            expected,
            deadline,
        }
    }

    fn judge(&self, answers: &[IpAddr], elapsed: Duration) -> HealthCheckResult {
        if answers.is_empty() {
            warn!(host = %self.host, "Name resolved to no addresses");
            return HealthCheckResult::unhealthy(elapsed, "No IPs resolved");
        }
        if !self.expected.is_empty() && !self.expected.iter().any(|ip| answers.contains(ip)) {
            warn!(host = %self.host, ?answers, "Expected address missing");
            return HealthCheckResult::unhealthy(elapsed, "Expected IP not found in DNS results");
        }
        debug!(host = %self.host, count = answers.len(), "Name resolved");
        HealthCheckResult::healthy(elapsed)
    }
}

#[async_trait]
impl HealthChecker for DnsChecker {
    async fn check(&self) -> HealthCheckResult {
        let lookup = tokio::net::lookup_host((self.host.as_str(), 0));

        match probe(self.deadline, lookup).await {
            (elapsed, Probe::Done(addrs)) => {
                let answers: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
                self.judge(&answers, elapsed)
            }
            (elapsed, Probe::Failed(e)) => {
                warn!(host = %self.host, error = %e, "Lookup failed");
                HealthCheckResult::error(elapsed, format!("DNS lookup failed: {e}"))
            }
            (elapsed, Probe::TimedOut) => {
                warn!(host = %self.host, deadline = ?self.deadline, "Lookup timed out");
                HealthCheckResult::timeout(elapsed)
            }
        }
    }

    fn name(&self) -> &str {
        "dns"
    }
}
