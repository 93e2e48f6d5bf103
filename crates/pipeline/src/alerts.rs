//! Threshold alert rules.
//!
//! Each rule is a pure function of one input (an enriched event or a closed
//! window). Alert ids are derived from the input, so re-evaluating the same
//! input yields the same alert.

use serde_json::Value;

use kurier_core::config::AlertConfig;
use kurier_core::{AggregateWindow, Alert, AlertSeverity, AlertType, Attributes, EnrichedEvent};

#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    config: AlertConfig,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    /// HIGH alert for a single event whose value exceeds the ceiling.
    pub fn high_value(&self, event: &EnrichedEvent) -> Option<Alert> {
        let value = event.numeric_value();
        if value <= self.config.high_value_ceiling {
            return None;
        }

        let evidence = Attributes::from([
            ("event_id".to_string(), Value::from(event.event_id.as_str())),
            ("source_entity_id".to_string(), Value::from(event.source_entity_id.as_str())),
            ("event_type".to_string(), Value::from(event.event_type.as_str())),
            ("value".to_string(), Value::from(value)),
            ("ceiling".to_string(), Value::from(self.config.high_value_ceiling)),
        ]);
        Some(Alert {
            alert_id: format!("{}:{}", AlertType::HighValueEvent.as_str(), event.event_id),
            alert_type: AlertType::HighValueEvent,
            severity: AlertSeverity::High,
            message: format!(
                "{} {} from {} has value {value} above {}",
                event.event_type, event.event_id, event.source_entity_id, self.config.high_value_ceiling
            ),
            evidence,
            timestamp: event.processing_timestamp,
        })
    }

    /// MEDIUM alert for a closed window with fewer events than the floor.
    pub fn low_activity(&self, window: &AggregateWindow) -> Option<Alert> {
        if window.is_open() || window.count >= self.config.low_activity_floor {
            return None;
        }
        Some(window_alert(
            AlertType::LowActivity,
            AlertSeverity::Medium,
            window,
            self.config.low_activity_floor,
            format!(
                "window {} [{}, {}) saw {} events, below {}",
                window.window_key, window.window_start, window.window_end, window.count,
                self.config.low_activity_floor
            ),
        ))
    }

    /// HIGH alert for a closed failure window at or above the burst count.
    pub fn failure_burst(&self, window: &AggregateWindow) -> Option<Alert> {
        if window.is_open() || window.count < self.config.failure_burst_count {
            return None;
        }
        Some(window_alert(
            AlertType::FailureBurst,
            AlertSeverity::High,
            window,
            self.config.failure_burst_count,
            format!(
                "{} failures for {} within [{}, {})",
                window.count, window.window_key, window.window_start, window.window_end
            ),
        ))
    }
}

fn window_alert(
    alert_type: AlertType,
    severity: AlertSeverity,
    window: &AggregateWindow,
    threshold: i64,
    message: String,
) -> Alert {
    let evidence = Attributes::from([
        ("window_key".to_string(), Value::from(window.window_key.as_str())),
        ("window_start".to_string(), Value::from(window.window_start)),
        ("window_end".to_string(), Value::from(window.window_end)),
        ("count".to_string(), Value::from(window.count)),
        ("sum".to_string(), Value::from(window.sum)),
        ("distinct_keys".to_string(), Value::from(window.distinct_keys.len())),
        ("threshold".to_string(), Value::from(threshold)),
    ]);
    Alert {
        alert_id: format!("{}:{}:{}", alert_type.as_str(), window.window_key, window.window_start),
        alert_type,
        severity,
        message,
        evidence,
        timestamp: window.window_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurier_core::WindowState;
    use serde_json::json;

    fn evaluator() -> AlertEvaluator {
        AlertEvaluator::new(AlertConfig::default())
    }

    fn event(value: f64) -> EnrichedEvent {
        EnrichedEvent {
            event_id: "e1".into(),
            source_entity_id: "cust_1".into(),
            event_type: "PURCHASE".into(),
            segment: "STANDARD".into(),
            normalized_attributes: Attributes::new(),
            derived: Attributes::from([("numeric_value".to_string(), json!(value))]),
            source_timestamp: 1_000,
            processing_timestamp: 2_000,
        }
    }

    fn closed(key: &str, count: i64) -> AggregateWindow {
        let mut w = AggregateWindow::open(key, 0, 300_000);
        for i in 0..count {
            w.apply(i, 1.0, "s");
        }
        w.state = WindowState::Closed;
        w
    }

    #[test]
    fn high_value_fires_above_ceiling_only() {
        assert!(evaluator().high_value(&event(10_000.0)).is_none());
        let alert = evaluator().high_value(&event(10_000.5)).unwrap();
        assert_eq!(alert.alert_type, AlertType::HighValueEvent);
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.alert_id, "HIGH_VALUE_EVENT:e1");
        assert_eq!(alert.evidence["value"], json!(10_000.5));
        assert_eq!(alert.timestamp, 2_000);
    }

    #[test]
    fn low_activity_on_closed_windows() {
        let e = evaluator();
        assert!(e.low_activity(&closed("LOGIN", 5)).is_none());

        let alert = e.low_activity(&closed("LOGIN", 4)).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert_eq!(alert.alert_id, "LOW_ACTIVITY:LOGIN:0");
        assert_eq!(alert.evidence["count"], json!(4));

        let mut open = closed("LOGIN", 1);
        open.state = WindowState::Open;
        assert!(e.low_activity(&open).is_none());
    }

    #[test]
    fn failure_burst_at_threshold() {
        let e = evaluator();
        assert!(e.failure_burst(&closed("cust_1", 4)).is_none());
        let alert = e.failure_burst(&closed("cust_1", 5)).unwrap();
        assert_eq!(alert.alert_type, AlertType::FailureBurst);
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.evidence["threshold"], json!(5));
    }

    #[test]
    fn evaluation_is_pure() {
        let e = evaluator();
        let w = closed("k", 1);
        assert_eq!(e.low_activity(&w), e.low_activity(&w));
        assert_eq!(e.high_value(&event(50_000.0)), e.high_value(&event(50_000.0)));
    }
}
