use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;
use crate::message::{Delivery, Message, Record};

/// Writes messages to the bus.
///
/// The returned future resolves once the bus has accepted the record;
/// callers await it to observe failure.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<Delivery, BusError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, message: Message) -> Result<Delivery, BusError> {
        (**self).publish(message).await
    }
}

/// A consumer-group member.
///
/// Records arrive in order per partition. A record must be committed after
/// its handler finished; uncommitted records are redelivered after a
/// rebalance or restart.
#[async_trait]
pub trait GroupConsumer: Send + Sync {
    /// Receive the next record. Blocks until one is available.
    async fn recv(&self) -> Result<Record, BusError>;

    /// Mark `record` (and everything before it in its partition) as processed.
    async fn commit(&self, record: &Record) -> Result<(), BusError>;
}

#[async_trait]
impl<T: GroupConsumer + ?Sized> GroupConsumer for Arc<T> {
    async fn recv(&self) -> Result<Record, BusError> {
        (**self).recv().await
    }

    async fn commit(&self, record: &Record) -> Result<(), BusError> {
        (**self).commit(record).await
    }
}
