//! Named collection of checkers that produces a [`HealthReport`].

use crate::checkers::HealthChecker;
use crate::types::HealthReport;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct Registration {
    name: String,
    tags: Vec<String>,
    checker: Arc<dyn HealthChecker>,
}

/// Registry of health checks served together as one report.
#[derive(Default)]
pub struct HealthCheckRegistry {
    registrations: Vec<Registration>,
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check. A later registration with the same name replaces the
    /// earlier one.
    pub fn register<I, S>(&mut self, name: impl Into<String>, checker: Arc<dyn HealthChecker>, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        self.registrations.retain(|r| r.name != name);
        self.registrations.push(Registration {
            name,
            tags: tags.into_iter().map(Into::into).collect(),
            checker,
        });
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Run every registered check concurrently.
    pub async fn run(&self) -> HealthReport {
        let start = Instant::now();

        let results = join_all(self.registrations.iter().map(|r| r.checker.check())).await;

        let entries: BTreeMap<_, _> = self
            .registrations
            .iter()
            .zip(results)
            .map(|(registration, result)| {
                debug!(
                    check = %registration.name,
                    checker = registration.checker.name(),
                    status = %result.status,
                    "Health check evaluated"
                );
                (registration.name.clone(), result.into_entry(registration.tags.clone()))
            })
            .collect();

        HealthReport::from_entries(entries, start.elapsed())
    }
}
