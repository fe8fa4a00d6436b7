//! Durable job storage.

mod memory;
mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

use async_trait::async_trait;

use conveyor_core::{Job, JobId, JobStatus, NewJob};

/// Job store abstraction.
///
/// Writes to a single row are serialized by convention: the submission
/// service writes first (insert), then only the worker writes until the
/// status is terminal.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job with status `pending`, returning the stored row.
    ///
    /// The returned identifier is the commit point for the job's existence.
    async fn insert(&self, new: NewJob) -> Result<Job, JobStoreError>;

    /// Get a job by identifier.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// All jobs, newest first.
    async fn list(&self) -> Result<Vec<Job>, JobStoreError>;

    /// Overwrite the status column.
    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<(), JobStoreError>;

    /// Overwrite the result column.
    async fn update_response(&self, id: JobId, response: &str) -> Result<(), JobStoreError>;

    /// Remove a row whose queue publication never happened.
    async fn delete(&self, id: JobId) -> Result<(), JobStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("storage error: {0}")]
    Storage(String),
}
