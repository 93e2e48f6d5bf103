pub mod alerts;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod processor;
pub mod server;
pub mod validator;
pub mod window;
pub mod worker;

pub use alerts::AlertEvaluator;
pub use enrich::EventEnricher;
pub use error::PipelineError;
pub use filter::EventFilter;
pub use processor::{EventProcessor, FilteredEvent, ProcessOutcome, RejectedEvent, PROCESSING_FAILED};
pub use server::{spawn_stats_server, stats_router, StatsState};
pub use validator::{validate, validate_at};
pub use window::{spawn_eviction_sweep, AggregateOutcome, WindowAssigner, WindowedAggregator};
pub use worker::PipelineWorker;
