//! In-memory status cache for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use conveyor_core::{JobId, JobStatus};

use super::{payload_key, result_key, status_key, CacheError, StatusCache};

#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, key: String, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;
        entries.insert(
            key,
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;

        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(entry.value.clone()))
                }
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl StatusCache for InMemoryCache {
    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), CacheError> {
        self.set(status_key(id), status.as_str().as_bytes().to_vec(), None)
    }

    async fn get_status(&self, id: JobId) -> Result<Option<JobStatus>, CacheError> {
        let value = self.get(&status_key(id))?;
        value
            .map(|bytes| {
                let s = String::from_utf8(bytes)
                    .map_err(|e| CacheError::Decode(e.to_string()))?;
                s.parse().map_err(CacheError::Decode)
            })
            .transpose()
    }

    async fn set_payload(
        &self,
        id: JobId,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set(payload_key(id), payload.to_vec(), Some(ttl))
    }

    async fn get_payload(&self, id: JobId) -> Result<Option<Vec<u8>>, CacheError> {
        self.get(&payload_key(id))
    }

    async fn set_result(&self, id: JobId, result: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.set(result_key(id), result.to_vec(), Some(ttl))
    }

    async fn get_result(&self, id: JobId) -> Result<Option<Vec<u8>>, CacheError> {
        self.get(&result_key(id))
    }

    async fn clear(&self, id: JobId) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Command("lock poisoned".to_string()))?;
        entries.remove(&status_key(id));
        entries.remove(&payload_key(id));
        entries.remove(&result_key(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_round_trips() {
        let cache = InMemoryCache::new();
        let id = JobId(1);

        assert!(cache.get_status(id).await.unwrap().is_none());

        cache.set_status(id, JobStatus::Pending).await.unwrap();
        assert_eq!(
            cache.get_status(id).await.unwrap(),
            Some(JobStatus::Pending)
        );

        cache.set_status(id, JobStatus::Completed).await.unwrap();
        assert_eq!(
            cache.get_status(id).await.unwrap(),
            Some(JobStatus::Completed)
        );
    }

    #[tokio::test]
    async fn payload_expires_after_ttl() {
        let cache = InMemoryCache::new();
        let id = JobId(2);

        cache
            .set_payload(id, b"{}", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(cache.get_payload(id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get_payload(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_drops_every_key() {
        let cache = InMemoryCache::new();
        let id = JobId(3);

        cache.set_status(id, JobStatus::Pending).await.unwrap();
        cache
            .set_payload(id, b"{}", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set_result(id, b"{}", Duration::from_secs(60))
            .await
            .unwrap();

        cache.clear(id).await.unwrap();
        assert!(cache.get_status(id).await.unwrap().is_none());
        assert!(cache.get_payload(id).await.unwrap().is_none());
        assert!(cache.get_result(id).await.unwrap().is_none());
    }
}
