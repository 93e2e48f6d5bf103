//! Pipeline statistics shared by every stage.
//!
//! One [`PipelineStats`] is created per process and handed to components
//! behind an `Arc`. Counters only reset through [`PipelineStats::reset`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    validation_rejected: AtomicU64,
    filter_processed: AtomicU64,
    filter_passed: AtomicU64,
    filter_rejected: AtomicU64,
    enriched: AtomicU64,
    processing_failed: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    late_events: AtomicU64,
    dead_lettered: AtomicU64,
    alerts_emitted: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    rejection_reasons: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of the counters, served by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub validation_rejected: u64,
    pub filter_processed: u64,
    pub filter_passed: u64,
    pub filter_rejected: u64,
    pub enriched: u64,
    /// Events that kept failing downstream and were dead-lettered.
    pub processing_failed: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub late_events: u64,
    pub dead_lettered: u64,
    pub alerts_emitted: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub rejection_reasons: BTreeMap<String, u64>,
    /// Enriched events as a fraction of received events (1.0 when idle).
    pub success_rate: f64,
}

impl StatsSnapshot {
    /// Every received event landed in exactly one outcome bucket.
    pub fn is_conserved(&self) -> bool {
        self.validation_rejected + self.filter_rejected + self.enriched + self.processing_failed
            == self.received
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        bump(&self.received);
    }

    pub fn record_validation_rejected(&self) {
        bump(&self.validation_rejected);
    }

    /// Record one filter decision. `reason` is `None` for a pass.
    pub fn record_filter(&self, reason: Option<&str>) {
        bump(&self.filter_processed);
        match reason {
            None => bump(&self.filter_passed),
            Some(reason) => {
                bump(&self.filter_rejected);
                let mut reasons = self.rejection_reasons.lock().expect("stats lock poisoned");
                *reasons.entry(reason.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn record_enriched(&self) {
        bump(&self.enriched);
    }

    pub fn record_processing_failed(&self) {
        bump(&self.processing_failed);
    }

    pub fn record_duplicate(&self) {
        bump(&self.duplicates);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed);
    }

    pub fn record_late_event(&self) {
        bump(&self.late_events);
    }

    pub fn record_dead_letter(&self) {
        bump(&self.dead_lettered);
    }

    pub fn record_alert(&self) {
        bump(&self.alerts_emitted);
    }

    pub fn record_notification(&self, success: bool) {
        if success {
            bump(&self.notifications_sent);
        } else {
            bump(&self.notifications_failed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let received = load(&self.received);
        let enriched = load(&self.enriched);
        let success_rate = if received == 0 {
            1.0
        } else {
            enriched as f64 / received as f64
        };

        StatsSnapshot {
            received,
            validation_rejected: load(&self.validation_rejected),
            filter_processed: load(&self.filter_processed),
            filter_passed: load(&self.filter_passed),
            filter_rejected: load(&self.filter_rejected),
            enriched,
            processing_failed: load(&self.processing_failed),
            duplicates: load(&self.duplicates),
            malformed: load(&self.malformed),
            late_events: load(&self.late_events),
            dead_lettered: load(&self.dead_lettered),
            alerts_emitted: load(&self.alerts_emitted),
            notifications_sent: load(&self.notifications_sent),
            notifications_failed: load(&self.notifications_failed),
            rejection_reasons: self
                .rejection_reasons
                .lock()
                .expect("stats lock poisoned")
                .clone(),
            success_rate,
        }
    }

    /// Operator command: zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.received,
            &self.validation_rejected,
            &self.filter_processed,
            &self.filter_passed,
            &self.filter_rejected,
            &self.enriched,
            &self.processing_failed,
            &self.duplicates,
            &self.malformed,
            &self.late_events,
            &self.dead_lettered,
            &self.alerts_emitted,
            &self.notifications_sent,
            &self.notifications_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.rejection_reasons
            .lock()
            .expect("stats lock poisoned")
            .clear();
        tracing::info!("pipeline statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_histogram_counts_reasons() {
        let stats = PipelineStats::new();
        stats.record_filter(None);
        stats.record_filter(Some("segment exclusion"));
        stats.record_filter(Some("segment exclusion"));
        stats.record_filter(Some("age window"));

        let snap = stats.snapshot();
        assert_eq!(snap.filter_processed, 4);
        assert_eq!(snap.filter_passed, 1);
        assert_eq!(snap.filter_rejected, 3);
        assert_eq!(snap.rejection_reasons["segment exclusion"], 2);
        assert_eq!(snap.rejection_reasons["age window"], 1);
    }

    #[test]
    fn success_rate_and_conservation() {
        let stats = PipelineStats::new();
        assert_eq!(stats.snapshot().success_rate, 1.0);

        for _ in 0..5 {
            stats.record_received();
        }
        stats.record_validation_rejected();
        stats.record_filter(Some("type allow-list"));
        stats.record_enriched();
        stats.record_enriched();
        assert!(!stats.snapshot().is_conserved());

        stats.record_processing_failed();
        let snap = stats.snapshot();
        assert!(snap.is_conserved());
        assert_eq!(snap.success_rate, 0.4);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = PipelineStats::new();
        stats.record_received();
        stats.record_filter(Some("age window"));
        stats.record_dead_letter();
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.received, 0);
        assert_eq!(snap.dead_lettered, 0);
        assert!(snap.rejection_reasons.is_empty());
    }
}
