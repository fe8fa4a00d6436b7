//! Redis Streams-backed job queue (durable, at-least-once delivery).
//!
//! - XADD publishes; entries persist until acknowledged
//! - XREADGROUP delivers each entry to exactly one member of the group
//! - XACK commits consumption; unacked entries stay pending
//! - XPENDING/XCLAIM hand entries idle past the claim window to a live
//!   member, so a crashed worker's deliveries replay elsewhere

use redis::aio::Connection;
use tokio::sync::Mutex;
use uuid::Uuid;

use conveyor_core::QueueMessage;

use super::{Delivery, JobConsumer, JobProducer, QueueError};

/// Blocking window of one XREADGROUP call.
const DEFAULT_BLOCK_MS: u64 = 1000;

/// Entries pending longer than this are reclaimed from their consumer.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

/// Entries fetched per poll.
const READ_COUNT: usize = 10;

pub struct RedisStreamsQueue {
    conn: Mutex<Connection>,
    stream_key: String,
    group: String,
    consumer: String,
    block_ms: u64,
    pending_timeout_ms: u64,
}

impl RedisStreamsQueue {
    /// Connect and ensure the stream + consumer group exist.
    pub async fn connect(
        url: &str,
        stream_key: impl Into<String>,
        group: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let conn = client
            .get_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let queue = Self {
            conn: Mutex::new(conn),
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: format!("worker-{}", Uuid::now_v7()),
            block_ms: DEFAULT_BLOCK_MS,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        };
        queue.ensure_group().await?;
        Ok(queue)
    }

    /// Create the consumer group (idempotent).
    ///
    /// XGROUP CREATE with MKSTREAM creates the stream if it doesn't exist;
    /// "0" starts the group at the beginning of the stream. A BUSYGROUP
    /// reply means the group already exists and is ignored.
    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.lock().await;
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    /// This member's name within the group.
    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    /// Reclaim entries another consumer left pending past the claim window.
    async fn claim_stale(&self) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.conn.lock().await;

        // XPENDING summary entries: (id, consumer, idle_ms, delivery_count)
        let pending: Vec<(String, String, u64, u64)> = match redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(READ_COUNT)
            .query_async(&mut *conn)
            .await
        {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let stale: Vec<String> = pending
            .into_iter()
            .filter(|(_, _, idle, _)| *idle >= self.pending_timeout_ms)
            .map(|(id, _, _, _)| id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.pending_timeout_ms)
            .arg(&stale)
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Command(format!("XCLAIM failed: {e}")))?;

        Ok(parse_entries(claimed))
    }

    /// Read new entries for this consumer (blocking up to the poll window).
    async fn read_new(&self) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.conn.lock().await;

        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {e}")))?;

        // Reply: nil on timeout, else [[stream_key, [entry, ...]], ...].
        let entries = match reply {
            redis::Value::Nil => return Ok(Vec::new()),
            redis::Value::Bulk(streams) => streams
                .into_iter()
                .filter_map(|stream| match stream {
                    redis::Value::Bulk(mut pair) if pair.len() == 2 => Some(pair.remove(1)),
                    _ => None,
                })
                .flat_map(parse_entries)
                .collect(),
            _ => Vec::new(),
        };

        Ok(entries)
    }
}

#[async_trait::async_trait]
impl JobProducer for RedisStreamsQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.conn.lock().await;
        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("job_id")
            .arg(message.id.to_string())
            .arg("payload")
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobConsumer for RedisStreamsQueue {
    async fn fetch(&self) -> Result<Vec<Delivery>, QueueError> {
        let reclaimed = self.claim_stale().await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }
        self.read_new().await
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.lock().await;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(delivery_id)
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }
}

fn parse_entries(value: redis::Value) -> Vec<Delivery> {
    match value {
        redis::Value::Bulk(entries) => entries.into_iter().filter_map(parse_entry).collect(),
        _ => Vec::new(),
    }
}

/// Entry format: [entry_id, [field, value, field, value, ...]].
fn parse_entry(entry: redis::Value) -> Option<Delivery> {
    let mut parts = match entry {
        redis::Value::Bulk(parts) if parts.len() == 2 => parts,
        _ => return None,
    };

    let fields = parts.remove(1);
    let id = match parts.remove(0) {
        redis::Value::Data(data) => String::from_utf8_lossy(&data).into_owned(),
        _ => return None,
    };

    let fields = match fields {
        redis::Value::Bulk(fields) => fields,
        _ => return None,
    };

    let mut payload = None;
    for pair in fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
            if key.as_slice() == b"payload" {
                payload = Some(value.clone());
            }
        }
    }

    payload.map(|payload| Delivery { id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(bytes: &[u8]) -> redis::Value {
        redis::Value::Data(bytes.to_vec())
    }

    fn entry(id: &str, payload: &[u8]) -> redis::Value {
        redis::Value::Bulk(vec![
            data(id.as_bytes()),
            redis::Value::Bulk(vec![
                data(b"job_id"),
                data(b"7"),
                data(b"payload"),
                data(payload),
            ]),
        ])
    }

    #[test]
    fn parses_a_well_formed_entry() {
        let delivery = parse_entry(entry("1700000000000-0", b"{\"id\":7}")).unwrap();
        assert_eq!(delivery.id, "1700000000000-0");
        assert_eq!(delivery.payload, b"{\"id\":7}");
    }

    #[test]
    fn entry_without_payload_field_is_skipped() {
        let malformed = redis::Value::Bulk(vec![
            data(b"1-0"),
            redis::Value::Bulk(vec![data(b"job_id"), data(b"7")]),
        ]);
        assert!(parse_entry(malformed).is_none());
    }

    #[test]
    fn parses_a_batch_of_entries() {
        let batch = redis::Value::Bulk(vec![
            entry("1-0", b"a"),
            redis::Value::Nil,
            entry("2-0", b"b"),
        ]);

        let deliveries = parse_entries(batch);
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].id, "1-0");
        assert_eq!(deliveries[1].id, "2-0");
    }
}
