//! In-memory job store for tests/dev.
//!
//! Unlike the Postgres store, this one enforces the monotonic status
//! lifecycle on writes so misordered transitions fail fast in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use chrono::Utc;

use conveyor_core::{Job, JobId, JobStatus, NewJob};

use super::{JobStore, JobStoreError};

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<i64, Job>>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Job {
            id: JobId(id),
            name: new.name,
            job_type: new.job_type,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            payload: new.payload,
            response: None,
        };

        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?
            .insert(id, job.clone());

        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        Ok(jobs.get(&id.as_i64()).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;

        let mut result: Vec<_> = jobs.values().cloned().collect();
        // Newest first; ids break timestamp ties deterministically.
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<(), JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;

        let job = jobs.get_mut(&id.as_i64()).ok_or(JobStoreError::NotFound(id))?;
        if !job.status.can_advance_to(status) {
            return Err(JobStoreError::InvalidTransition {
                from: job.status,
                to: status,
            });
        }
        job.status = status;
        Ok(())
    }

    async fn update_response(&self, id: JobId, response: &str) -> Result<(), JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;

        let job = jobs.get_mut(&id.as_i64()).ok_or(JobStoreError::NotFound(id))?;
        job.response = Some(response.to_string());
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        jobs.remove(&id.as_i64());
        Ok(())
    }
}
