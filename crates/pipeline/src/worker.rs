//! Bus worker driving the [`EventProcessor`].
//!
//! Consumes `kurier.events.raw`, processes each record and commits it once
//! every output is published. A record that fails is retried in place and,
//! once the retry budget is spent, dead-lettered before the partition moves
//! on. A periodic tick closes windows whose end the wall clock has passed,
//! so quiet keys still report; on stop all open windows are flushed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use kurier_bus::{BusError, GroupConsumer, Record, Worker, WorkerStatus};
use kurier_core::RetryPolicy;

use crate::error::PipelineError;
use crate::processor::{EventProcessor, ProcessOutcome};

const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Consecutive processing errors before the worker reports itself degraded.
const DEGRADED_AFTER: u64 = 5;

pub struct PipelineWorker {
    processor: Arc<EventProcessor>,
    consumer: Arc<dyn GroupConsumer>,
    tick_interval: Duration,
    retry: RetryPolicy,
    processed: AtomicU64,
    failing_streak: AtomicU64,
}

impl PipelineWorker {
    pub fn new(processor: Arc<EventProcessor>, consumer: Arc<dyn GroupConsumer>) -> Self {
        Self {
            processor,
            consumer,
            tick_interval: DEFAULT_TICK,
            retry: RetryPolicy::default(),
            processed: AtomicU64::new(0),
            failing_streak: AtomicU64::new(0),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Attempts per record before it is dead-lettered.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    /// Process and commit one record. A record whose outputs could not all
    /// be published stays uncommitted.
    pub async fn handle(&self, record: &Record) -> Result<ProcessOutcome, PipelineError> {
        let outcome = match self.processor.process(record).await {
            Ok(outcome) => {
                self.failing_streak.store(0, Ordering::Relaxed);
                outcome
            }
            Err(e) => {
                self.failing_streak.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        self.commit(record).await;
        Ok(outcome)
    }

    /// Handle `record` until it is settled: processed, or dead-lettered once
    /// the retry budget is spent. Later records are not read meanwhile.
    ///
    /// Returns `false` if shutdown arrived first; the record then stays
    /// uncommitted and is delivered again.
    pub async fn settle(&self, record: &Record, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            let failure = match self.retry.run(|_| self.handle(record)).await {
                Ok(_) => return true,
                Err(failure) => failure,
            };
            match self
                .processor
                .dead_letter_record(record, &failure.error, failure.attempts)
                .await
            {
                Ok(()) => {
                    self.commit(record).await;
                    return true;
                }
                Err(e) => {
                    error!(
                        topic = %record.message.topic,
                        offset = record.offset,
                        error = %e,
                        "record could not be dead-lettered, holding partition"
                    );
                    let pause = self.retry.delay_for(self.retry.max_attempts());
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = shutdown.changed() => return false,
                    }
                }
            }
        }
    }

    async fn commit(&self, record: &Record) {
        match self.consumer.commit(record).await {
            Ok(()) => {}
            Err(e @ BusError::StaleGeneration { .. }) | Err(e @ BusError::NotAssigned { .. }) => {
                info!(error = %e, "commit after rebalance, record will be redelivered");
            }
            Err(e) => warn!(error = %e, "commit failed"),
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    async fn tick(&self) {
        match self.processor.tick(Utc::now().timestamp_millis()).await {
            Ok(alerts) if !alerts.is_empty() => debug!(alerts = alerts.len(), "tick raised alerts"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to publish closed windows"),
        }
    }
}

#[async_trait]
impl Worker for PipelineWorker {
    async fn start(&self) -> Result<(), BusError> {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "pipeline worker started");
        Ok(())
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BusError> {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let record = tokio::select! {
                received = self.consumer.recv() => received?,
                _ = interval.tick() => {
                    self.tick().await;
                    continue;
                }
                _ = shutdown.changed() => break,
            };
            if !self.settle(&record, &mut shutdown).await {
                break;
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BusError> {
        match self.processor.flush().await {
            Ok(alerts) => debug!(alerts = alerts.len(), "flushed open windows"),
            Err(e) => warn!(error = %e, "failed to publish flushed windows"),
        }
        let snapshot = self.processor.stats().snapshot();
        info!(
            processed = self.processed(),
            received = snapshot.received,
            enriched = snapshot.enriched,
            rejected = snapshot.validation_rejected,
            filtered = snapshot.filter_rejected,
            success_rate = snapshot.success_rate,
            "pipeline worker stopped"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "pipeline-worker"
    }

    fn status(&self) -> WorkerStatus {
        if self.failing_streak.load(Ordering::Relaxed) >= DEGRADED_AFTER {
            WorkerStatus::Degraded
        } else {
            WorkerStatus::Healthy
        }
    }

    fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}
