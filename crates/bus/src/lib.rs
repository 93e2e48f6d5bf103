pub mod error;
pub mod memory;
pub mod message;
pub mod schema;
pub mod topics;
pub mod traits;
pub mod transport;
pub mod worker;
pub mod zmq;

pub use error::BusError;
pub use memory::{InMemoryBus, MemoryConsumer};
pub use message::{partition_for, Delivery, Message, Record};
pub use schema::{check_compatibility, Compatibility, FieldSchema, FieldType, RecordSchema};
pub use traits::{EventPublisher, GroupConsumer};
pub use transport::Transport;
pub use worker::{Worker, WorkerBuilder, WorkerHealth, WorkerRunner, WorkerRunnerConfig, WorkerStatus};
pub use zmq::{ZmqPublisher, ZmqSubscriber};
