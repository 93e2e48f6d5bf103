//! Raw event to enriched event.
//!
//! Enrichment is total and deterministic: the same raw event and the same
//! processing timestamp always produce an identical [`EnrichedEvent`].

mod normalize;
mod segment;

pub use normalize::{normalize_attributes, to_snake_case};
pub use segment::{calculate_segment, Segment};

use chrono::{TimeZone, Timelike, Utc};
use serde_json::Value;

use kurier_core::config::EnrichConfig;
use kurier_core::{Attributes, EnrichedEvent, RawEvent};

const UNKNOWN_ORIGIN: &str = "unknown";

pub struct EventEnricher {
    config: EnrichConfig,
}

impl EventEnricher {
    pub fn new(config: EnrichConfig) -> Self {
        Self { config }
    }

    /// Enrich using the event's own timestamp as processing time.
    pub fn enrich(&self, event: &RawEvent) -> EnrichedEvent {
        self.enrich_at(event, event.timestamp)
    }

    /// Enrich with an explicit processing timestamp, normally the bus
    /// record's write time so redeliveries produce the same output.
    pub fn enrich_at(&self, event: &RawEvent, processed_at: i64) -> EnrichedEvent {
        let segment = calculate_segment(&event.source_entity_id, self.config.long_id_threshold);
        let normalized = normalize_attributes(&event.attributes);
        let derived = self.derive(event, segment, &normalized);

        EnrichedEvent {
            event_id: event.event_id.clone(),
            source_entity_id: event.source_entity_id.clone(),
            event_type: event.event_type.clone(),
            segment: segment.as_str().to_string(),
            normalized_attributes: normalized,
            derived,
            source_timestamp: event.timestamp,
            processing_timestamp: processed_at,
        }
    }

    fn derive(&self, event: &RawEvent, segment: Segment, normalized: &Attributes) -> Attributes {
        let mut derived = Attributes::new();
        derived.insert("segment".into(), Value::from(segment.as_str()));

        if let Some(value) = self.numeric_value(normalized) {
            derived.insert("numeric_value".into(), Value::from(value));
        }
        derived.insert("is_failure".into(), Value::from(event.is_failure()));

        if let Some(time) = Utc.timestamp_millis_opt(event.timestamp).single() {
            derived.insert("event_hour".into(), Value::from(time.hour()));
            derived.insert(
                "day_of_week".into(),
                Value::from(time.format("%A").to_string().to_uppercase()),
            );
        }
        derived.insert("attribute_count".into(), Value::from(normalized.len()));

        let origin = if event.origin.trim().is_empty() {
            UNKNOWN_ORIGIN
        } else {
            event.origin.trim()
        };
        derived.insert("origin".into(), Value::from(origin));
        derived
    }

    /// First configured value field that holds a number.
    fn numeric_value(&self, normalized: &Attributes) -> Option<f64> {
        self.config
            .value_fields
            .iter()
            .find_map(|field| normalized.get(field).and_then(Value::as_f64))
    }
}

impl Default for EventEnricher {
    fn default() -> Self {
        Self::new(EnrichConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // 2024-05-01T12:00:00Z, a Wednesday.
    const TS: i64 = 1_714_564_800_000;

    fn event(source: &str, event_type: &str, attributes: Value) -> RawEvent {
        RawEvent {
            event_id: "e1".into(),
            source_entity_id: source.into(),
            event_type: event_type.into(),
            attributes: serde_json::from_value(attributes).unwrap(),
            timestamp: TS,
            origin: "web".into(),
        }
    }

    #[test]
    fn vip_purchase_is_enriched() {
        let enricher = EventEnricher::default();
        let e = enricher.enrich(&event("VIP_cust_1", "PURCHASE", json!({"amount": 99.99})));

        assert_eq!(e.segment, "VIP");
        assert_eq!(e.normalized_attributes["amount"], json!(99.99));
        assert_eq!(e.numeric_value(), 99.99);
        assert!(!e.is_failure());
        assert_eq!(e.derived["event_hour"], json!(12));
        assert_eq!(e.derived["day_of_week"], json!("WEDNESDAY"));
        assert_eq!(e.derived["attribute_count"], json!(1));
        assert_eq!(e.derived["origin"], json!("web"));
        assert_eq!(e.source_timestamp, TS);
        assert_eq!(e.processing_timestamp, TS);
    }

    #[test]
    fn enrichment_is_idempotent() {
        let enricher = EventEnricher::default();
        let raw = event(
            "cust_12345",
            "ORDER_PLACED",
            json!({"orderTotal": "42.10", "placedAt": "2024-05-01T11:00:00Z", "buyerEmail": "A@B.io"}),
        );
        assert_eq!(enricher.enrich_at(&raw, TS + 5), enricher.enrich_at(&raw, TS + 5));
        assert_eq!(enricher.enrich(&raw), enricher.enrich(&raw));
    }

    #[test]
    fn numeric_value_follows_field_order() {
        let enricher = EventEnricher::default();
        let e = enricher.enrich(&event("c", "PURCHASE", json!({"price": 3, "total": "7.5"})));
        assert_eq!(e.numeric_value(), 7.5);

        let e = enricher.enrich(&event("c", "LOGIN", json!({"device": "ios"})));
        assert!(!e.derived.contains_key("numeric_value"));
        assert_eq!(e.numeric_value(), 0.0);
    }

    #[test]
    fn failure_flag_and_default_origin() {
        let enricher = EventEnricher::default();
        let mut raw = event("c", "PAYMENT_FAILED", json!({"amount": 5}));
        raw.origin = String::new();
        let e = enricher.enrich(&raw);
        assert!(e.is_failure());
        assert_eq!(e.derived["origin"], json!("unknown"));
    }
}
