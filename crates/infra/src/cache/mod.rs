//! Status/payload/result cache.
//!
//! Key layout: `job:{id}` holds the freshest status during a job's active
//! window; `job:{id}:payload` and `job:{id}:result` hold the staged payload
//! and the final result with the staging TTL. The durable store remains
//! authoritative after the TTL. Single-writer per key by convention.

mod memory;
mod redis;

pub use memory::InMemoryCache;
pub use redis::RedisCache;

use std::time::Duration;

use async_trait::async_trait;

use conveyor_core::{JobId, JobStatus};

pub fn status_key(id: JobId) -> String {
    format!("job:{id}")
}

pub fn payload_key(id: JobId) -> String {
    format!("job:{id}:payload")
}

pub fn result_key(id: JobId) -> String {
    format!("job:{id}:result")
}

#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), CacheError>;

    async fn get_status(&self, id: JobId) -> Result<Option<JobStatus>, CacheError>;

    async fn set_payload(&self, id: JobId, payload: &[u8], ttl: Duration)
        -> Result<(), CacheError>;

    async fn get_payload(&self, id: JobId) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_result(&self, id: JobId, result: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn get_result(&self, id: JobId) -> Result<Option<Vec<u8>>, CacheError>;

    /// Drop every key for a job (used when a failed create is reconciled).
    async fn clear(&self, id: JobId) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),

    #[error("cache decode error: {0}")]
    Decode(String),
}
