//! Redis-backed status cache.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use conveyor_core::{JobId, JobStatus};

use super::{payload_key, result_key, status_key, CacheError, StatusCache};

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect to redis; fails fast so the process can exit on unreachable
    /// infrastructure.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait::async_trait]
impl StatusCache for RedisCache {
    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), CacheError> {
        // Status keys carry no TTL: the entry lives for the job's active
        // window and is simply overwritten on the next transition.
        self.conn()
            .set(status_key(id), status.as_str())
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn get_status(&self, id: JobId) -> Result<Option<JobStatus>, CacheError> {
        let value: Option<String> = self
            .conn()
            .get(status_key(id))
            .await
            .map_err(|e| CacheError::Command(e.to_string()))?;

        value
            .map(|s| s.parse().map_err(CacheError::Decode))
            .transpose()
    }

    async fn set_payload(
        &self,
        id: JobId,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.conn()
            .set_ex(payload_key(id), payload, ttl.as_secs() as usize)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn get_payload(&self, id: JobId) -> Result<Option<Vec<u8>>, CacheError> {
        self.conn()
            .get(payload_key(id))
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn set_result(&self, id: JobId, result: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.conn()
            .set_ex(result_key(id), result, ttl.as_secs() as usize)
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn get_result(&self, id: JobId) -> Result<Option<Vec<u8>>, CacheError> {
        self.conn()
            .get(result_key(id))
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }

    async fn clear(&self, id: JobId) -> Result<(), CacheError> {
        self.conn()
            .del(&[status_key(id), payload_key(id), result_key(id)])
            .await
            .map_err(|e| CacheError::Command(e.to_string()))
    }
}
