use thiserror::Error;

use kurier_bus::BusError;
use kurier_core::{ConfigError, Retryable};
use kurier_notify::NotifyError;

/// Faults that stop a record from being processed to completion.
///
/// Validation failures and filter rejections are outcomes, not errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("notification setup error: {0}")]
    Notify(#[from] NotifyError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Bus(e) => e.is_retryable(),
            PipelineError::Notify(e) => e.is_retryable(),
            PipelineError::Serialize(_) | PipelineError::Config(_) => false,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            PipelineError::Bus(e) => e.error_type(),
            PipelineError::Notify(e) => e.error_type(),
            PipelineError::Serialize(_) => "serialization",
            PipelineError::Config(_) => "config",
        }
    }
}
