//! Structural and business validation of inbound raw events.
//!
//! Every rule runs; the result lists all violations rather than the first.
//! A failed validation is a permanent rejection.

use chrono::Utc;

use kurier_core::{is_known_event_type, RawEvent, ValidationResult};

/// Oldest accepted event time, relative to now.
pub const MAX_PAST_MS: i64 = 24 * 60 * 60 * 1000;
/// Furthest accepted event time into the future (clock skew allowance).
pub const MAX_FUTURE_MS: i64 = 10 * 60 * 1000;

pub const MISSING_EVENT_ID: &str = "missing event id";
pub const MISSING_SOURCE_ENTITY_ID: &str = "missing source entity id";
pub const UNKNOWN_EVENT_TYPE: &str = "unknown event type";
pub const STALE_TIMESTAMP: &str = "stale timestamp";
pub const FUTURE_TIMESTAMP: &str = "future timestamp";
pub const EMPTY_ATTRIBUTES: &str = "empty attributes";

pub fn validate(event: &RawEvent) -> ValidationResult {
    validate_at(event, Utc::now().timestamp_millis())
}

/// Validate against an explicit clock, in epoch milliseconds.
pub fn validate_at(event: &RawEvent, now_ms: i64) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if event.event_id.trim().is_empty() {
        result.violation(MISSING_EVENT_ID);
    }
    if event.source_entity_id.trim().is_empty() {
        result.violation(MISSING_SOURCE_ENTITY_ID);
    }
    if !is_known_event_type(&event.event_type) {
        result.violation(UNKNOWN_EVENT_TYPE);
    }
    if event.timestamp < now_ms - MAX_PAST_MS {
        result.violation(STALE_TIMESTAMP);
    } else if event.timestamp > now_ms + MAX_FUTURE_MS {
        result.violation(FUTURE_TIMESTAMP);
    }
    if event.attributes.is_empty() {
        result.violation(EMPTY_ATTRIBUTES);
    }

    result
}
