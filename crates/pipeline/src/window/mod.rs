//! Windowed aggregation: tumbling, hopping and session windows.

mod aggregator;
mod assigner;

pub use aggregator::{spawn_eviction_sweep, AggregateOutcome, WindowedAggregator};
pub use assigner::WindowAssigner;
