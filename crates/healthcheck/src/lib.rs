//! Health probes and the health report wire model.
//!
//! A probed service runs a set of checks and serves the resulting
//! [`HealthReport`] as JSON. The aggregator on the other side decodes the same
//! type. Check types:
//! - TCP connection checks
//! - HTTP/HTTPS checks
//! - DNS resolution checks
//!
//! Every check yields one of three statuses: `Healthy`, `Degraded` or
//! `Unhealthy`. A report's status is the worst status among its entries.
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::{HealthCheckRegistry, TcpChecker};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = HealthCheckRegistry::new();
//! registry.register(
//!     "postgres",
//!     Arc::new(TcpChecker::new("10.0.0.5:5432".parse()?, Duration::from_secs(2))),
//!     ["storage"],
//! );
//!
//! let report = registry.run().await;
//! println!("{}", serde_json::to_string(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod clients;
pub mod registry;
pub mod timespan;
pub mod types;

pub use checkers::{DnsChecker, HealthChecker, HttpChecker, TcpChecker};
pub use clients::{AuthMode, ClientRegistry, ConnectionKey};
pub use registry::HealthCheckRegistry;
pub use types::{HealthCheckResult, HealthReport, HealthStatus, ReportEntry};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "Healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "Degraded");
        assert_eq!(HealthStatus::Unhealthy.to_string(), "Unhealthy");
    }

    #[test]
    fn test_health_check_result() {
        let result = HealthCheckResult::healthy(std::time::Duration::from_millis(100));
        assert!(result.is_healthy());
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.description.is_none());
    }

    #[test]
    fn test_result_into_entry() {
        let result = HealthCheckResult::error(std::time::Duration::from_millis(5), "refused");
        let entry = result.into_entry(vec!["net".to_string()]);

        assert_eq!(entry.status, HealthStatus::Unhealthy);
        assert_eq!(entry.exception.as_deref(), Some("refused"));
        assert_eq!(entry.tags, vec!["net".to_string()]);
    }
}
