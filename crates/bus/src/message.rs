use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire-format message envelope carried by every bus implementation.
///
/// The payload is a camelCase JSON record. The ZeroMQ transport
/// additionally serializes the whole envelope with MessagePack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Routing topic (e.g. "kurier.events.raw").
    pub topic: String,

    /// Partitioning key. Records with equal keys keep their relative order.
    pub key: String,

    /// JSON-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When the record was written to the bus.
    pub timestamp: DateTime<Utc>,

    pub correlation_id: Uuid,

    /// Schema version of the payload.
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a new message, serializing the payload as JSON.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            payload: serde_json::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        })
    }

    /// Create a message that continues an existing correlation chain.
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, serde_json::Error> {
        let mut message = Self::new(topic, key, payload)?;
        message.correlation_id = correlation_id;
        Ok(message)
    }

    /// Wrap already-encoded payload bytes, e.g. a producer's raw output.
    pub fn from_raw(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        }
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Payload as a generic JSON value, or a string holding the raw bytes
    /// when the payload is not JSON.
    pub fn payload_value(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.payload).into_owned())
        })
    }

    /// Bus write time in epoch milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Serialize this entire envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Acknowledgement returned once a publish is durable in the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
}

/// A message as handed to a consumer, with its log position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub message: Message,
    pub partition: u32,
    pub offset: u64,
    /// Group generation the record was fetched under.
    pub generation: u64,
}

/// Stable key-hash partitioner (FNV-1a), identical across processes.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = key
        .bytes()
        .fold(OFFSET, |h, b| (h ^ b as u64).wrapping_mul(PRIME));
    (hash % partitions.max(1) as u64) as u32
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
