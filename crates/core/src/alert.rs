use serde::{Deserialize, Serialize};

use crate::event::Attributes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowActivity,
    HighValueEvent,
    FailureBurst,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowActivity => "LOW_ACTIVITY",
            AlertType::HighValueEvent => "HIGH_VALUE_EVENT",
            AlertType::FailureBurst => "FAILURE_BURST",
        }
    }
}

/// A threshold breach. Terminal: alerts are only ever written to the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub evidence: Attributes,
    pub timestamp: i64,
}
