//! Channel sender trait and shared error type.

use std::time::Duration;

use kurier_core::{Channel, ChannelMessage, Retryable};

/// Errors that can occur while rendering or delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP delivery failed: {message}")]
    Smtp { message: String, permanent: bool },

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("invalid {channel} recipient: {reason}")]
    InvalidRecipient { channel: Channel, reason: String },

    #[error("target '{0}' is blocked")]
    BlockedTarget(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway rejected message with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for NotifyError {
    fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Http(e) => !e.is_builder() && !e.is_decode(),
            NotifyError::Smtp { permanent, .. } => !permanent,
            NotifyError::RateLimited { .. }
            | NotifyError::Timeout(_)
            | NotifyError::Unavailable(_) => true,
            NotifyError::Template(_)
            | NotifyError::Config(_)
            | NotifyError::InvalidRecipient { .. }
            | NotifyError::BlockedTarget(_)
            | NotifyError::Rejected { .. } => false,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            NotifyError::Http(_) => "http",
            NotifyError::Smtp { .. } => "smtp",
            NotifyError::Template(_) => "template",
            NotifyError::Config(_) => "config",
            NotifyError::RateLimited { .. } => "rate_limited",
            NotifyError::InvalidRecipient { .. } => "invalid_recipient",
            NotifyError::BlockedTarget(_) => "blocked_target",
            NotifyError::Timeout(_) => "timeout",
            NotifyError::Rejected { .. } => "rejected",
            NotifyError::Unavailable(_) => "unavailable",
        }
    }
}

/// Delivers rendered messages for one channel.
#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &ChannelMessage) -> Result<(), NotifyError>;

    fn channel(&self) -> Channel;

    /// Human-readable name for logs (e.g. "smtp", "sms-gateway").
    fn name(&self) -> &str;
}
