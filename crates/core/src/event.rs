use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute map carried by every event. Ordered so serialized output is stable.
pub type Attributes = BTreeMap<String, Value>;

/// Event types the pipeline knows how to handle.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "PURCHASE",
    "ORDER_PLACED",
    "ORDER_SHIPPED",
    "ORDER_CANCELLED",
    "PAYMENT_FAILED",
    "LOGIN",
    "LOGIN_FAILED",
    "LOGOUT",
    "PAGE_VIEW",
    "ACCOUNT_CREATED",
    "PROFILE_UPDATED",
    "PASSWORD_RESET",
    "SECURITY_ALERT",
];

pub fn is_known_event_type(event_type: &str) -> bool {
    KNOWN_EVENT_TYPES.contains(&event_type)
}

/// An event as published by an external producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_id: String,
    pub source_entity_id: String,
    pub event_type: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// Event time in epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub origin: String,
}

impl RawEvent {
    /// Whether this event reports a failed operation.
    ///
    /// Matches `*_FAILED` event types and a `status` attribute of `failed`.
    pub fn is_failure(&self) -> bool {
        if self.event_type.ends_with("_FAILED") {
            return true;
        }
        self.attributes
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("failed"))
    }
}

/// A raw event after segment classification and normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    pub event_id: String,
    pub source_entity_id: String,
    pub event_type: String,
    pub segment: String,
    pub normalized_attributes: Attributes,
    pub derived: Attributes,
    pub source_timestamp: i64,
    pub processing_timestamp: i64,
}

impl EnrichedEvent {
    /// The numeric value extracted during enrichment (0.0 when absent).
    pub fn numeric_value(&self) -> f64 {
        self.derived
            .get("numeric_value")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    pub fn is_failure(&self) -> bool {
        self.derived
            .get("is_failure")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Outcome of running an event through the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDecision {
    pub event_id: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FilterDecision {
    pub fn pass(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            passed: true,
            reason: None,
        }
    }

    pub fn reject(event_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of structural validation. Violations are collected, not fail-fast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
        }
    }

    pub fn violation(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.violations.push(message.into());
    }
}
