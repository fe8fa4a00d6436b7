//! The message published to the job topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobId, JobType};

/// Queue message identifying a job.
///
/// Kept small and self-contained: on replay, the identifier alone is enough
/// to look up the staged payload and re-run the handler. The value on the
/// wire is the UTF-8 JSON encoding of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: JobId,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub created_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn for_job(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            job_type: job.job_type.clone(),
            created_at: job.created_at,
        }
    }
}
