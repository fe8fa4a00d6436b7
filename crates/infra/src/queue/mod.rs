//! The job queue between the submission service and the workers.
//!
//! The submission service is the producer; each worker process is one
//! consumer-group member. Delivery is at-least-once: a delivery is only
//! removed from the pending list once the consumer acks it, and entries
//! idle past the claim window are handed to another member.

mod memory;
mod redis_streams;

pub use memory::InMemoryQueue;
pub use redis_streams::RedisStreamsQueue;

use async_trait::async_trait;

use conveyor_core::QueueMessage;

/// One received queue entry, addressable for acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait JobProducer: Send + Sync {
    /// Publish a message to the job topic. Returns only once the broker
    /// has accepted the entry.
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Wait up to the poll window for the next deliveries. An empty vector
    /// means the window elapsed without traffic.
    async fn fetch(&self) -> Result<Vec<Delivery>, QueueError>;

    /// Commit consumption of a delivery. Must be called only after durable
    /// state has advanced, so a crash in between results in replay rather
    /// than loss.
    async fn ack(&self, delivery_id: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("queue serialization error: {0}")]
    Serialization(String),

    #[error("queue deserialization error: {0}")]
    Deserialization(String),
}
