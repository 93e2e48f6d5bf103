//! Worker trait and lifecycle management.
//!
//! A [`Worker`] owns a consume loop. [`WorkerRunner`] drives it: start,
//! periodic health pings on [`WORKER_HEALTH`], shutdown on SIGINT/SIGTERM
//! or an external `watch` signal, bounded drain, stop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::BusError;
use crate::message::Message;
use crate::topics::WORKER_HEALTH;
use crate::traits::EventPublisher;

// ── Health payload ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub worker_id: String,
    pub status: WorkerStatus,
    /// Records handled since start.
    pub processed: u64,
    pub timestamp: i64,
}

// ── Worker trait ──────────────────────────────────────────────

#[async_trait]
pub trait Worker: Send + Sync {
    /// Called once before `run`.
    async fn start(&self) -> Result<(), BusError>;

    /// Main loop. Must return promptly once `shutdown` turns `true`.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), BusError>;

    /// Called once after `run` returned or was abandoned.
    async fn stop(&self) -> Result<(), BusError>;

    fn name(&self) -> &str;

    fn status(&self) -> WorkerStatus {
        WorkerStatus::Healthy
    }

    fn processed(&self) -> u64 {
        0
    }
}

// ── Builder ───────────────────────────────────────────────────

pub struct WorkerBuilder {
    name: String,
    health_interval: Duration,
    shutdown_timeout: Duration,
    handle_signals: bool,
}

impl WorkerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            handle_signals: true,
        }
    }

    /// Interval between health pings (default: 30s).
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Maximum time to wait for the run loop and `stop` (default: 5s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Disable OS signal handling, e.g. when several runners share a process.
    pub fn without_signals(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    pub fn build(self) -> WorkerRunnerConfig {
        WorkerRunnerConfig {
            name: self.name,
            health_interval: self.health_interval,
            shutdown_timeout: self.shutdown_timeout,
            handle_signals: self.handle_signals,
        }
    }
}

pub struct WorkerRunnerConfig {
    pub name: String,
    pub health_interval: Duration,
    pub shutdown_timeout: Duration,
    pub handle_signals: bool,
}

// ── Runner ────────────────────────────────────────────────────

pub struct WorkerRunner;

impl WorkerRunner {
    /// Run a worker to completion.
    ///
    /// Returns when the run loop ends on its own, an OS signal arrives, or
    /// `external` turns `true`. The run loop's error, if any, is returned
    /// after `stop` has been called.
    pub async fn run(
        worker: Arc<dyn Worker>,
        publisher: Arc<dyn EventPublisher>,
        config: WorkerRunnerConfig,
        mut external: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        let name = config.name.clone();
        info!(worker = %name, "starting worker");
        worker.start().await?;

        Self::publish_health(&*publisher, &name, worker.status(), worker.processed()).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let health_handle = tokio::spawn({
            let publisher = publisher.clone();
            let worker = worker.clone();
            let name = name.clone();
            let mut shutdown = shutdown_rx.clone();
            let interval = config.health_interval;
            async move {
                let mut ticker = tokio::time::interval(interval);
                // Skip the immediate tick; the initial ping was already sent.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            Self::publish_health(&*publisher, &name, worker.status(), worker.processed()).await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }
        });

        let mut run_handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(shutdown_rx).await }
        });

        let mut run_result = None;
        tokio::select! {
            joined = &mut run_handle => {
                info!(worker = %name, "run loop finished");
                run_result = Some(joined);
            }
            _ = Self::os_signal(config.handle_signals) => {
                info!(worker = %name, "shutdown signal received");
            }
            _ = Self::wait_true(&mut external) => {
                info!(worker = %name, "shutdown requested");
            }
        }

        let _ = shutdown_tx.send(true);
        health_handle.abort();

        let run_result = match run_result {
            Some(joined) => Some(joined),
            None => match tokio::time::timeout(config.shutdown_timeout, &mut run_handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    warn!(worker = %name, "run loop did not drain in time, aborting");
                    run_handle.abort();
                    None
                }
            },
        };

        info!(worker = %name, timeout = ?config.shutdown_timeout, "stopping worker");
        match tokio::time::timeout(config.shutdown_timeout, worker.stop()).await {
            Ok(Ok(())) => info!(worker = %name, "worker stopped gracefully"),
            Ok(Err(e)) => warn!(worker = %name, error = %e, "worker stop returned error"),
            Err(_) => warn!(worker = %name, "worker stop timed out, forcing shutdown"),
        }

        Self::publish_health(&*publisher, &name, WorkerStatus::Unhealthy, worker.processed()).await;
        info!(worker = %name, "worker shutdown complete");

        match run_result {
            Some(Ok(result)) => result,
            Some(Err(join_err)) => Err(BusError::Worker(join_err.to_string())),
            None => Ok(()),
        }
    }

    async fn publish_health(
        publisher: &dyn EventPublisher,
        worker_name: &str,
        status: WorkerStatus,
        processed: u64,
    ) {
        let health = WorkerHealth {
            worker_id: worker_name.to_string(),
            status,
            processed,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        match Message::new(WORKER_HEALTH, worker_name, &health) {
            Ok(msg) => {
                if let Err(e) = publisher.publish(msg).await {
                    warn!(worker = %worker_name, error = %e, "failed to publish health ping");
                }
            }
            Err(e) => warn!(worker = %worker_name, error = %e, "failed to serialize health ping"),
        }
    }

    async fn wait_true(rx: &mut watch::Receiver<bool>) {
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // Sender gone: no external shutdown will ever arrive.
                std::future::pending::<()>().await;
            }
        }
    }

    /// SIGINT or SIGTERM on Unix, Ctrl+C elsewhere. Pending forever when
    /// signal handling is disabled or cannot be registered.
    async fn os_signal(enabled: bool) {
        if !enabled {
            return std::future::pending().await;
        }

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(mut sigint), Ok(mut sigterm)) => {
                    tokio::select! {
                        _ = sigint.recv() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "failed to register signal handlers");
                    std::future::pending::<()>().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl_c");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::Mutex;

    use crate::message::Delivery;

    struct MockPublisher {
        messages: Mutex<Vec<Message>>,
    }

    impl MockPublisher {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        async fn healths(&self) -> Vec<WorkerHealth> {
            let msgs = self.messages.lock().await;
            msgs.iter().filter_map(|m| m.decode().ok()).collect()
        }
    }

    #[async_trait]
    impl EventPublisher for MockPublisher {
        async fn publish(&self, message: Message) -> Result<Delivery, BusError> {
            let mut msgs = self.messages.lock().await;
            msgs.push(message);
            Ok(Delivery {
                partition: 0,
                offset: msgs.len() as u64 - 1,
            })
        }
    }

    /// Counts ticks until shutdown, or fails immediately when `fail` is set.
    struct TickWorker {
        fail: bool,
        ticks: AtomicU64,
        started: AtomicBool,
        stopped: AtomicBool,
    }

    impl TickWorker {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                ticks: AtomicU64::new(0),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Worker for TickWorker {
        async fn start(&self) -> Result<(), BusError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
            if self.fail {
                return Err(BusError::Worker("boom".into()));
            }
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        self.ticks.fetch_add(1, Ordering::SeqCst);
                    }
                    _ = shutdown.changed() => return Ok(()),
                }
            }
        }

        async fn stop(&self) -> Result<(), BusError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "tick-worker"
        }

        fn processed(&self) -> u64 {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn lifecycle_start_health_stop() {
        let worker = Arc::new(TickWorker::new(false));
        let publisher = Arc::new(MockPublisher::new());
        let (tx, rx) = watch::channel(false);

        let config = WorkerBuilder::new("tick-worker")
            .health_interval(Duration::from_millis(20))
            .shutdown_timeout(Duration::from_secs(1))
            .without_signals()
            .build();

        let handle = tokio::spawn(WorkerRunner::run(worker.clone(), publisher.clone(), config, rx));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(worker.started.load(Ordering::SeqCst));
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner should finish")
            .expect("runner should not panic");
        assert!(result.is_ok());
        assert!(worker.stopped.load(Ordering::SeqCst));

        let healths = publisher.healths().await;
        assert!(healths.len() >= 3, "expected initial, periodic and final pings, got {}", healths.len());
        assert_eq!(healths[0].status, WorkerStatus::Healthy);
        let last = healths.last().unwrap();
        assert_eq!(last.status, WorkerStatus::Unhealthy);
        assert_eq!(last.worker_id, "tick-worker");
        assert!(last.processed > 0);
    }

    #[tokio::test]
    async fn run_error_is_returned_after_stop() {
        let worker = Arc::new(TickWorker::new(true));
        let publisher = Arc::new(MockPublisher::new());
        let (_tx, rx) = watch::channel(false);

        let config = WorkerBuilder::new("failing").without_signals().build();
        let result = WorkerRunner::run(worker.clone(), publisher, config, rx).await;

        assert!(matches!(result, Err(BusError::Worker(msg)) if msg == "boom"));
        assert!(worker.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn builder_defaults() {
        let config = WorkerBuilder::new("w").build();
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(config.handle_signals);
    }
}
