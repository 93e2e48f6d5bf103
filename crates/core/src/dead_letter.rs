use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Terminal record for a message that exhausted retries or failed fatally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub original_payload: Value,
    pub error_type: String,
    pub error: String,
    pub retry_count: u32,
    pub source_topic: String,
    pub correlation_id: Uuid,
    pub timestamp: i64,
}

impl DeadLetter {
    pub fn new(
        source_topic: impl Into<String>,
        original_payload: Value,
        error_type: impl Into<String>,
        error: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            original_payload,
            error_type: error_type.into(),
            error: error.into(),
            retry_count,
            source_topic: source_topic.into(),
            correlation_id: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Keep the correlation id of the message that caused the failure.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
