pub mod aggregate;
pub mod alert;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod notification;
pub mod retry;
pub mod stats;

pub use aggregate::{AggregateWindow, WindowState};
pub use alert::{Alert, AlertSeverity, AlertType};
pub use config::KurierConfig;
pub use dead_letter::DeadLetter;
pub use error::{ConfigError, Retryable};
pub use event::*;
pub use notification::*;
pub use retry::{RetryFailure, RetryPolicy};
pub use stats::{PipelineStats, StatsSnapshot};
