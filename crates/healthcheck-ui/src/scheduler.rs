//! Background host driving collection cycles at a fixed cadence.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One unit of background work, run once per interval.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run a cycle. Implementations check `cancel` between items and report
    /// their own errors.
    async fn run_cycle(&self, cancel: &CancellationToken);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
    StopRequested,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("collector service is already running")]
    AlreadyRunning,

    #[error("collector service is not running")]
    NotRunning,
}

/// How a stop completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The loop finished its in-flight work and exited
    Graceful,
    /// The grace period elapsed first; the loop was left to wind down on its own
    GraceElapsed,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CollectorService {
    runner: Arc<dyn CycleRunner>,
    interval: Duration,
    state_tx: watch::Sender<ServiceState>,
    running: Mutex<Option<Running>>,
}

impl CollectorService {
    pub fn new(runner: Arc<dyn CycleRunner>, interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Stopped);
        Self {
            runner,
            interval,
            state_tx,
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    /// Spawn the collection loop.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.runner.clone(), self.interval, cancel.clone()));
        *running = Some(Running { cancel, handle });

        self.state_tx.send_replace(ServiceState::Running);
        info!(interval_ms = self.interval.as_millis(), "Collector service started");
        Ok(())
    }

    /// Request cancellation and wait up to `grace` for the loop to exit.
    pub async fn stop(&self, grace: Duration) -> Result<StopOutcome, SchedulerError> {
        let Some(Running { cancel, handle }) = self.running.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };

        self.state_tx.send_replace(ServiceState::StopRequested);
        cancel.cancel();

        let outcome = match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => StopOutcome::Graceful,
            Ok(Err(e)) => {
                error!(error = %e, "Collector task ended abnormally");
                StopOutcome::Graceful
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis(), "Collector did not stop within grace period");
                StopOutcome::GraceElapsed
            }
        };

        self.state_tx.send_replace(ServiceState::Stopped);
        info!(?outcome, "Collector service stopped");
        Ok(outcome)
    }
}

async fn run_loop(runner: Arc<dyn CycleRunner>, interval: Duration, cancel: CancellationToken) {
    debug!("Collector loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Err(panic) = AssertUnwindSafe(runner.run_cycle(&cancel)).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "Collection cycle panicked, retrying next interval");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Collector loop exited");
}
