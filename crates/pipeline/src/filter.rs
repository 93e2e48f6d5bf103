//! Business gate between validation and enrichment.
//!
//! Predicates run in a fixed order and the first failing one names the
//! rejection reason. Decisions depend only on the event, the config and
//! the supplied clock.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use kurier_core::config::FilterConfig;
use kurier_core::{FilterDecision, PipelineStats, RawEvent};

pub const REASON_TYPE: &str = "type allow-list";
pub const REASON_SEGMENT: &str = "segment exclusion";
pub const REASON_AGE: &str = "age window";
pub const REASON_COMPLETENESS: &str = "data completeness";

pub struct EventFilter {
    processable_types: HashSet<String>,
    excluded_prefixes: Vec<String>,
    max_age_ms: i64,
    noise_keys: HashSet<String>,
    stats: Arc<PipelineStats>,
}

impl EventFilter {
    pub fn new(config: &FilterConfig, stats: Arc<PipelineStats>) -> Self {
        Self {
            processable_types: config.processable_types.iter().cloned().collect(),
            excluded_prefixes: config.excluded_prefixes.clone(),
            max_age_ms: config.max_age().as_millis() as i64,
            noise_keys: config.noise_keys.iter().cloned().collect(),
            stats,
        }
    }

    pub fn should_process(&self, event: &RawEvent) -> FilterDecision {
        self.should_process_at(event, Utc::now().timestamp_millis())
    }

    /// Decide and record the decision in the filter statistics.
    pub fn should_process_at(&self, event: &RawEvent, now_ms: i64) -> FilterDecision {
        let decision = self.decide(event, now_ms);
        self.stats.record_filter(decision.reason.as_deref());
        if let Some(reason) = &decision.reason {
            debug!(event_id = %event.event_id, reason = %reason, "event filtered");
        }
        decision
    }

    /// The decision alone, without touching statistics.
    pub fn decide(&self, event: &RawEvent, now_ms: i64) -> FilterDecision {
        let reason = if !self.processable_types.contains(&event.event_type) {
            Some(REASON_TYPE)
        } else if self.is_excluded_segment(&event.source_entity_id) {
            Some(REASON_SEGMENT)
        } else if now_ms - event.timestamp > self.max_age_ms {
            Some(REASON_AGE)
        } else if !self.is_complete(event) {
            Some(REASON_COMPLETENESS)
        } else {
            None
        };

        match reason {
            Some(reason) => FilterDecision::reject(&event.event_id, reason),
            None => FilterDecision::pass(&event.event_id),
        }
    }

    fn is_excluded_segment(&self, source_entity_id: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| source_entity_id.starts_with(prefix.as_str()))
    }

    /// At least one non-null attribute besides noise keys.
    fn is_complete(&self, event: &RawEvent) -> bool {
        event
            .attributes
            .iter()
            .any(|(key, value)| !self.noise_keys.contains(key) && !value.is_null())
    }
}
