//! Per-record orchestration.
//!
//! raw event -> validate -> filter -> enrich -> {aggregate, fan-out} -> sinks,
//! with alert rules applied to each enriched event and to every window that
//! closes. Each stage's output is published to its topic before the record
//! counts as processed: statistics and window state only change once every
//! per-record output is out, so a record that fails part way and is tried
//! again is counted and aggregated once.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kurier_bus::{topics, EventPublisher, Message, Record};
use kurier_core::config::WindowKeyBy;
use kurier_core::{
    AggregateWindow, Alert, Channel, DeadLetter, EnrichedEvent, KurierConfig, NotificationTrigger,
    PipelineStats, Priority, RawEvent, RetryPolicy,
};

/// Dead-letter `error_type` for records that exhausted processing retries.
pub const PROCESSING_FAILED: &str = "processing_failed";
use kurier_notify::{ChannelOutcome, FanoutRouter};

use crate::alerts::AlertEvaluator;
use crate::enrich::EventEnricher;
use crate::error::PipelineError;
use crate::filter::EventFilter;
use crate::validator::validate_at;
use crate::window::{WindowAssigner, WindowedAggregator};

// ── Audit records ─────────────────────────────────────────────

/// Published to `kurier.events.rejected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedEvent {
    pub event: RawEvent,
    pub violations: Vec<String>,
}

/// Published to `kurier.events.filtered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredEvent {
    pub event: RawEvent,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Already processed; acknowledged without side effects.
    Duplicate,
    /// Payload was not a raw event; dead-lettered.
    Malformed,
    Rejected {
        violations: Vec<String>,
    },
    Filtered {
        reason: String,
    },
    Enriched {
        event: Box<EnrichedEvent>,
        /// Channels selected for notification, including ones that failed
        /// to render.
        channels: BTreeSet<Channel>,
        alerts: Vec<Alert>,
    },
}

// ── Processor ─────────────────────────────────────────────────

/// Closed windows not yet published.
#[derive(Debug, Default)]
struct PendingWindows {
    metrics: VecDeque<AggregateWindow>,
    failures: VecDeque<AggregateWindow>,
}

pub struct EventProcessor {
    filter: EventFilter,
    enricher: EventEnricher,
    alerts: AlertEvaluator,
    router: FanoutRouter,
    metrics: Arc<WindowedAggregator>,
    failures: Arc<WindowedAggregator>,
    key_by: WindowKeyBy,
    notify_types: HashSet<String>,
    allowed_lateness_ms: i64,
    publisher: Arc<dyn EventPublisher>,
    publish_retry: RetryPolicy,
    stats: Arc<PipelineStats>,
    recent: Mutex<LruCache<String, ()>>,
    pending: AsyncMutex<PendingWindows>,
}

impl EventProcessor {
    pub fn new(
        config: &KurierConfig,
        publisher: Arc<dyn EventPublisher>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, PipelineError> {
        let router = FanoutRouter::from_config(&config.notify)?;

        let metrics = WindowedAggregator::from_config(&config.window, stats.clone());
        // Failure bursts are always counted per source over tumbling windows.
        let failures = WindowedAggregator::new(
            WindowAssigner::Tumbling {
                size_ms: (config.alerts.failure_burst_window_secs as i64).saturating_mul(1000).max(1),
            },
            std::time::Duration::from_secs(config.window.allowed_lateness_secs),
            std::time::Duration::from_secs(config.window.retention_secs),
            stats.clone(),
        );

        let capacity = NonZeroUsize::new(config.bus.dedup_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            filter: EventFilter::new(&config.filter, stats.clone()),
            enricher: EventEnricher::new(config.enrich.clone()),
            alerts: AlertEvaluator::new(config.alerts.clone()),
            router,
            metrics: Arc::new(metrics),
            failures: Arc::new(failures),
            key_by: config.window.key_by,
            notify_types: config.notify.notify_event_types.iter().cloned().collect(),
            allowed_lateness_ms: (config.window.allowed_lateness_secs as i64).saturating_mul(1000),
            publisher,
            publish_retry: RetryPolicy::from_config(&config.retry),
            stats,
            recent: Mutex::new(LruCache::new(capacity)),
            pending: AsyncMutex::new(PendingWindows::default()),
        })
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Aggregator holding the metric windows.
    pub fn metrics_windows(&self) -> &Arc<WindowedAggregator> {
        &self.metrics
    }

    /// Aggregator holding per-source failure windows.
    pub fn failure_windows(&self) -> &Arc<WindowedAggregator> {
        &self.failures
    }

    /// Process one bus record. The record's write time is the processing
    /// timestamp, so a redelivered record is handled identically.
    pub async fn process(&self, record: &Record) -> Result<ProcessOutcome, PipelineError> {
        let correlation_id = record.message.correlation_id;
        let event: RawEvent = match record.message.decode() {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %record.message.topic, offset = record.offset, error = %e, "malformed raw event");
                self.stats.record_malformed();
                let letter = DeadLetter::new(
                    record.message.topic.clone(),
                    record.message.payload_value(),
                    "malformed",
                    e.to_string(),
                    0,
                );
                self.dead_letter(letter, &record.message.key, correlation_id).await?;
                return Ok(ProcessOutcome::Malformed);
            }
        };
        self.process_from(record.partition, event, record.message.timestamp_millis(), correlation_id)
            .await
    }

    pub async fn process_event(
        &self,
        event: RawEvent,
        processed_at: i64,
        correlation_id: Uuid,
    ) -> Result<ProcessOutcome, PipelineError> {
        self.process_from(0, event, processed_at, correlation_id).await
    }

    async fn process_from(
        &self,
        partition: u32,
        event: RawEvent,
        processed_at: i64,
        correlation_id: Uuid,
    ) -> Result<ProcessOutcome, PipelineError> {
        if self.seen(&event.event_id) {
            debug!(event_id = %event.event_id, "duplicate delivery acknowledged");
            self.stats.record_duplicate();
            return Ok(ProcessOutcome::Duplicate);
        }

        let event_id = event.event_id.clone();
        let outcome = self.run_stages(partition, event, processed_at, correlation_id).await?;
        self.record_outcome(&outcome);
        self.remember(&event_id);
        Ok(outcome)
    }

    /// Dead-letter a record that kept failing, so its partition can move on.
    /// `attempts` counts every processing attempt made.
    pub async fn dead_letter_record(
        &self,
        record: &Record,
        error: &PipelineError,
        attempts: u32,
    ) -> Result<(), PipelineError> {
        let letter = DeadLetter::new(
            record.message.topic.clone(),
            record.message.payload_value(),
            PROCESSING_FAILED,
            error.to_string(),
            attempts.saturating_sub(1),
        );
        self.dead_letter(letter, &record.message.key, record.message.correlation_id)
            .await?;

        if let Ok(event) = record.message.decode::<RawEvent>() {
            if !self.seen(&event.event_id) {
                self.stats.record_received();
                self.stats.record_processing_failed();
                self.remember(&event.event_id);
            }
        }
        warn!(
            topic = %record.message.topic,
            partition = record.partition,
            offset = record.offset,
            attempts,
            error = %error,
            "record dead-lettered after repeated failures"
        );
        Ok(())
    }

    fn record_outcome(&self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Duplicate | ProcessOutcome::Malformed => return,
            ProcessOutcome::Rejected { .. } => self.stats.record_validation_rejected(),
            ProcessOutcome::Filtered { reason } => self.stats.record_filter(Some(reason)),
            ProcessOutcome::Enriched { .. } => {
                self.stats.record_filter(None);
                self.stats.record_enriched();
            }
        }
        self.stats.record_received();
    }

    async fn run_stages(
        &self,
        partition: u32,
        event: RawEvent,
        processed_at: i64,
        correlation_id: Uuid,
    ) -> Result<ProcessOutcome, PipelineError> {
        let validation = validate_at(&event, processed_at);
        if !validation.valid {
            debug!(event_id = %event.event_id, violations = ?validation.violations, "event rejected");
            let key = event.source_entity_id.clone();
            let audit = RejectedEvent {
                event,
                violations: validation.violations.clone(),
            };
            self.publish(topics::EVENTS_REJECTED, &key, &audit, correlation_id).await?;
            return Ok(ProcessOutcome::Rejected {
                violations: validation.violations,
            });
        }

        let decision = self.filter.decide(&event, processed_at);
        if let Some(reason) = decision.reason {
            debug!(event_id = %event.event_id, reason = %reason, "event filtered");
            let key = event.source_entity_id.clone();
            let audit = FilteredEvent {
                event,
                reason: reason.clone(),
            };
            self.publish(topics::EVENTS_FILTERED, &key, &audit, correlation_id).await?;
            return Ok(ProcessOutcome::Filtered { reason });
        }

        let enriched = self.enricher.enrich_at(&event, processed_at);
        let key = enriched.source_entity_id.as_str();
        self.publish(topics::EVENTS_ENRICHED, key, &enriched, correlation_id).await?;
        self.publish(&topics::segment(&enriched.segment), key, &enriched, correlation_id)
            .await?;

        let mut alerts: Vec<Alert> = self.alerts.high_value(&enriched).into_iter().collect();
        self.publish_alerts(&alerts, correlation_id).await?;

        let channels = if self.notify_types.contains(&enriched.event_type) {
            self.notify(&enriched, correlation_id).await?
        } else {
            BTreeSet::new()
        };

        self.metrics
            .aggregate_from(partition, &self.window_key(&enriched), &enriched);
        if enriched.is_failure() {
            self.failures
                .aggregate_from(partition, &enriched.source_entity_id, &enriched);
        }

        // Windows that fail to publish stay queued for the next tick; the
        // record itself is done.
        match self
            .emit_windows(self.metrics.advance_watermark(), self.failures.advance_watermark())
            .await
        {
            Ok(raised) => alerts.extend(raised),
            Err(e) => warn!(error = %e, "closed windows held for the next tick"),
        }

        Ok(ProcessOutcome::Enriched {
            event: Box::new(enriched),
            channels,
            alerts,
        })
    }

    /// Close windows the wall clock has passed (minus allowed lateness).
    /// Returns the alerts raised by the closed windows.
    pub async fn tick(&self, now_ms: i64) -> Result<Vec<Alert>, PipelineError> {
        let watermark = now_ms.saturating_sub(self.allowed_lateness_ms);
        let metrics = self.metrics.advance_watermark_to(watermark);
        let failures = self.failures.advance_watermark_to(watermark);
        self.emit_windows(metrics, failures).await
    }

    /// Close every open window, e.g. on shutdown.
    pub async fn flush(&self) -> Result<Vec<Alert>, PipelineError> {
        let metrics = self.metrics.flush();
        let failures = self.failures.flush();
        self.emit_windows(metrics, failures).await
    }

    fn window_key(&self, event: &EnrichedEvent) -> String {
        match self.key_by {
            WindowKeyBy::EventType => event.event_type.clone(),
            WindowKeyBy::SourceEntity => event.source_entity_id.clone(),
            WindowKeyBy::Segment => event.segment.clone(),
        }
    }

    /// Number of closed windows still waiting to be published.
    pub async fn pending_windows(&self) -> usize {
        let pending = self.pending.lock().await;
        pending.metrics.len() + pending.failures.len()
    }

    /// Queue newly closed windows, then publish the queue in order together
    /// with the alerts each window raises. A window leaves the queue only
    /// once it and its alerts are published; on error the rest wait for the
    /// next call.
    async fn emit_windows(
        &self,
        metrics: Vec<AggregateWindow>,
        failures: Vec<AggregateWindow>,
    ) -> Result<Vec<Alert>, PipelineError> {
        let mut pending = self.pending.lock().await;
        pending.metrics.extend(metrics);
        pending.failures.extend(failures);

        let mut alerts = Vec::new();
        while let Some(window) = pending.metrics.front() {
            let raised: Vec<Alert> = self.alerts.low_activity(window).into_iter().collect();
            self.publish(topics::METRICS_WINDOWS, &window.window_key, window, Uuid::new_v4())
                .await?;
            self.publish_alerts(&raised, Uuid::new_v4()).await?;
            debug!(key = %window.window_key, start = window.window_start, count = window.count, "window closed");
            pending.metrics.pop_front();
            alerts.extend(raised);
        }
        while let Some(window) = pending.failures.front() {
            let raised: Vec<Alert> = self.alerts.failure_burst(window).into_iter().collect();
            self.publish_alerts(&raised, Uuid::new_v4()).await?;
            pending.failures.pop_front();
            alerts.extend(raised);
        }
        Ok(alerts)
    }

    async fn publish_alerts(&self, alerts: &[Alert], correlation_id: Uuid) -> Result<(), PipelineError> {
        for alert in alerts {
            info!(alert_id = %alert.alert_id, severity = ?alert.severity, "{}", alert.message);
            self.publish(topics::ALERTS, &alert.alert_id, alert, correlation_id).await?;
            self.stats.record_alert();
        }
        Ok(())
    }

    // ── Fan-out ───────────────────────────────────────────────

    async fn notify(
        &self,
        event: &EnrichedEvent,
        correlation_id: Uuid,
    ) -> Result<BTreeSet<Channel>, PipelineError> {
        let trigger = self.trigger_for(event);
        let channels = self.router.select_channels(&trigger);
        let routed = self.router.route(&trigger);

        for message in &routed.messages {
            self.publish(&topics::notify(message.channel), &trigger.target_id, message, correlation_id)
                .await?;
        }
        for failure in &routed.failures {
            warn!(
                trigger_id = %failure.trigger_id,
                channel = %failure.channel,
                error = %failure.error,
                "channel skipped"
            );
            self.stats.record_notification(false);
            if let Some(letter) = ChannelOutcome::rejected(failure, &trigger).dead_letter {
                self.dead_letter(letter, &trigger.target_id, correlation_id).await?;
            }
        }
        Ok(channels)
    }

    fn trigger_for(&self, event: &EnrichedEvent) -> NotificationTrigger {
        let mut payload = event.normalized_attributes.clone();
        payload.insert("segment".into(), Value::from(event.segment.as_str()));
        payload.insert("event_id".into(), Value::from(event.event_id.as_str()));

        let mut trigger = NotificationTrigger {
            trigger_id: format!("{}:notify", event.event_id),
            event_type: event.event_type.clone(),
            target_id: event.source_entity_id.clone(),
            payload,
            priority: Priority::Normal,
            timestamp: event.processing_timestamp,
        };
        trigger.priority = priority_for(&trigger.event_type, self.router.is_vip(&trigger));
        trigger
    }

    // ── Sinks ─────────────────────────────────────────────────

    async fn dead_letter(&self, letter: DeadLetter, key: &str, correlation_id: Uuid) -> Result<(), PipelineError> {
        let letter = letter.with_correlation(correlation_id);
        self.publish(topics::DEADLETTER, key, &letter, correlation_id).await?;
        self.stats.record_dead_letter();
        Ok(())
    }

    /// Publish with retry on transient bus errors.
    async fn publish<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
        correlation_id: Uuid,
    ) -> Result<(), PipelineError> {
        let message = Message::with_correlation(topic, key, value, correlation_id)?;
        self.publish_retry
            .run(|_| self.publisher.publish(message.clone()))
            .await
            .map_err(|failure| PipelineError::Bus(failure.error))?;
        Ok(())
    }

    // ── Redelivery ────────────────────────────────────────────

    fn seen(&self, event_id: &str) -> bool {
        !event_id.is_empty() && self.recent.lock().expect("dedup lock poisoned").contains(event_id)
    }

    fn remember(&self, event_id: &str) {
        if !event_id.is_empty() {
            self.recent
                .lock()
                .expect("dedup lock poisoned")
                .put(event_id.to_string(), ());
        }
    }
}

/// Security alerts are urgent; account-risk events and VIP targets are high.
pub fn priority_for(event_type: &str, vip: bool) -> Priority {
    match event_type {
        "SECURITY_ALERT" => Priority::Urgent,
        "PASSWORD_RESET" | "PAYMENT_FAILED" => Priority::High,
        _ if vip => Priority::High,
        _ => Priority::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rules() {
        assert_eq!(priority_for("SECURITY_ALERT", false), Priority::Urgent);
        assert_eq!(priority_for("SECURITY_ALERT", true), Priority::Urgent);
        assert_eq!(priority_for("PASSWORD_RESET", false), Priority::High);
        assert_eq!(priority_for("PURCHASE", true), Priority::High);
        assert_eq!(priority_for("PURCHASE", false), Priority::Normal);
    }
}
