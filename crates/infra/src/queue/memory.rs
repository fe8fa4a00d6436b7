//! In-memory job queue for tests/dev.
//!
//! Single consumer, FIFO, no redelivery. Publications and acks are
//! recorded so tests can assert on the commit ordering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use conveyor_core::QueueMessage;

use super::{Delivery, JobConsumer, JobProducer, QueueError};

#[derive(Debug, Default)]
pub struct InMemoryQueue {
    entries: Mutex<VecDeque<Delivery>>,
    published: Mutex<Vec<QueueMessage>>,
    acked: Mutex<Vec<String>>,
    notify: Notify,
    next_id: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push raw bytes, bypassing message serialization (malformed-message
    /// tests).
    pub fn push_raw(&self, payload: Vec<u8>) -> String {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.entries
            .lock()
            .unwrap()
            .push_back(Delivery {
                id: id.clone(),
                payload,
            });
        self.notify.notify_one();
        id
    }

    /// Every message accepted so far.
    pub fn published(&self) -> Vec<QueueMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Delivery ids acked so far, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    /// Entries accepted but not yet fetched.
    pub fn backlog(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl JobProducer for InMemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| QueueError::Serialization(e.to_string()))?;

        self.published.lock().unwrap().push(message.clone());
        self.push_raw(payload);
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobConsumer for InMemoryQueue {
    async fn fetch(&self) -> Result<Vec<Delivery>, QueueError> {
        if let Some(delivery) = self.entries.lock().unwrap().pop_front() {
            return Ok(vec![delivery]);
        }

        // Short poll window, mirroring the blocking read of the real queue.
        let _ = tokio::time::timeout(Duration::from_millis(50), self.notify.notified()).await;

        Ok(self
            .entries
            .lock()
            .unwrap()
            .pop_front()
            .into_iter()
            .collect())
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), QueueError> {
        self.acked.lock().unwrap().push(delivery_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conveyor_core::{JobId, JobType};

    fn message(id: i64) -> QueueMessage {
        QueueMessage {
            id: JobId(id),
            name: format!("job-{id}"),
            job_type: JobType::Other("test_job".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_then_fetch_preserves_order() {
        let queue = InMemoryQueue::new();
        queue.publish(&message(1)).await.unwrap();
        queue.publish(&message(2)).await.unwrap();

        let first = queue.fetch().await.unwrap();
        let second = queue.fetch().await.unwrap();

        let a: QueueMessage = serde_json::from_slice(&first[0].payload).unwrap();
        let b: QueueMessage = serde_json::from_slice(&second[0].payload).unwrap();
        assert_eq!(a.id, JobId(1));
        assert_eq!(b.id, JobId(2));
    }

    #[tokio::test]
    async fn fetch_on_empty_queue_returns_nothing() {
        let queue = InMemoryQueue::new();
        assert!(queue.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acks_are_recorded() {
        let queue = InMemoryQueue::new();
        queue.publish(&message(1)).await.unwrap();

        let deliveries = queue.fetch().await.unwrap();
        queue.ack(&deliveries[0].id).await.unwrap();

        assert_eq!(queue.acked(), vec![deliveries[0].id.clone()]);
    }
}
