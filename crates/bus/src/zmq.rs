use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::BusError;
use crate::message::{partition_for, Delivery, Message, Record};
use crate::traits::{EventPublisher, GroupConsumer};
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher.
///
/// Messages are sent as two frames: the topic (used by SUB sockets for
/// prefix filtering) followed by the MessagePack-encoded [`Message`].
///
/// ZeroMQ keeps no log, so the returned [`Delivery`] carries the key's
/// logical partition and a per-publisher sequence number.
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
    partitions: u32,
    sequence: AtomicU64,
}

impl ZmqPublisher {
    /// Connect to a forwarding device's frontend.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport, partitions: u32) -> Result<Self, BusError> {
        let mut socket = PubSocket::new();
        info!("connecting PUB socket");
        socket.connect(&transport.endpoint()).await?;
        Ok(Self::from_socket(socket, partitions))
    }

    /// Bind directly; subscribers connect to this endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport, partitions: u32) -> Result<Self, BusError> {
        transport
            .ensure_ipc_dir()
            .map_err(|e| BusError::Transport(e.to_string()))?;
        let mut socket = PubSocket::new();
        info!("binding PUB socket");
        socket.bind(&transport.endpoint()).await?;
        Ok(Self::from_socket(socket, partitions))
    }

    fn from_socket(socket: PubSocket, partitions: u32) -> Self {
        Self {
            socket: Mutex::new(socket),
            partitions: partitions.max(1),
            sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, message: Message) -> Result<Delivery, BusError> {
        let partition = partition_for(&message.key, self.partitions);
        let envelope = message.to_bytes()?;

        let mut frames = ZmqMessage::from(message.topic.as_str());
        frames.push_back(envelope.into());

        self.socket.lock().await.send(frames).await?;

        let offset = self.sequence.fetch_add(1, Ordering::Relaxed);
        debug!(topic = %message.topic, partition, offset, "published message");
        Ok(Delivery { partition, offset })
    }
}

/// ZeroMQ SUB socket consumer.
///
/// PUB/SUB has no broker-side offsets, so `commit` only advances a local
/// counter; redelivery protection comes from the processor's dedup cache.
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
    partitions: u32,
    received: AtomicU64,
    committed: AtomicU64,
}

impl ZmqSubscriber {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport, partitions: u32) -> Result<Self, BusError> {
        let mut socket = SubSocket::new();
        info!("connecting SUB socket");
        socket.connect(&transport.endpoint()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            partitions: partitions.max(1),
            received: AtomicU64::new(0),
            committed: AtomicU64::new(0),
        })
    }

    /// Subscribe to topics starting with `topic_prefix`. Empty means all.
    pub async fn subscribe(&self, topic_prefix: &str) -> Result<(), BusError> {
        self.socket.lock().await.subscribe(topic_prefix).await?;
        info!(topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    /// Records acknowledged so far.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GroupConsumer for ZmqSubscriber {
    async fn recv(&self) -> Result<Record, BusError> {
        let zmq_msg = self.socket.lock().await.recv().await?;

        // Expect [topic, envelope]; tolerate a bare envelope frame.
        let frames: Vec<_> = zmq_msg.iter().collect();
        let envelope: &[u8] = match frames.as_slice() {
            [_, envelope, ..] => envelope.as_ref(),
            [single] => single.as_ref(),
            [] => return Err(BusError::Transport("empty ZMQ message".into())),
        };
        let message = Message::from_bytes(envelope)?;

        let offset = self.received.fetch_add(1, Ordering::Relaxed);
        debug!(topic = %message.topic, offset, "received message");
        Ok(Record {
            partition: partition_for(&message.key, self.partitions),
            offset,
            generation: 0,
            message,
        })
    }

    async fn commit(&self, _record: &Record) -> Result<(), BusError> {
        self.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_frame_construction() {
        let mut msg = ZmqMessage::from("kurier.events.raw");
        msg.push_back(b"envelope".to_vec().into());

        let frames: Vec<_> = msg.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), b"kurier.events.raw");
        assert_eq!(frames[1].as_ref(), b"envelope");
    }
}
