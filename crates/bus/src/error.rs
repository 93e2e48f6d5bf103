use thiserror::Error;

use kurier_core::Retryable;

/// Errors that can occur in the message bus layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("envelope encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("envelope decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("stale generation {seen} for group '{group}' (current {current})")]
    StaleGeneration {
        group: String,
        seen: u64,
        current: u64,
    },

    #[error("partition {topic}/{partition} is not assigned to this member")]
    NotAssigned { topic: String, partition: u32 },

    #[error("bus closed")]
    Closed,

    #[error("worker error: {0}")]
    Worker(String),
}

impl Retryable for BusError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Zmq(_) | BusError::Transport(_) | BusError::StaleGeneration { .. }
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            BusError::Encode(_) | BusError::Decode(_) | BusError::Payload(_) => "serialization",
            BusError::Zmq(_) | BusError::Transport(_) | BusError::InvalidEndpoint(_) => "transport",
            BusError::StaleGeneration { .. } | BusError::NotAssigned { .. } => "rebalance",
            BusError::Closed => "closed",
            BusError::Worker(_) => "worker",
        }
    }
}
