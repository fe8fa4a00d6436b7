//! Core job types shared by the submission service and the workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique job identifier.
///
/// Assigned by the durable store at insert; stable once assigned and never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job type tag for routing to the appropriate handler.
///
/// The set is closed from the producer's point of view but deliberately
/// open on the wire: consumers may receive tags they do not know yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobType {
    /// PDF document parsing via the document-parse pipeline
    PdfParse,
    /// Outbound email delivery (handled by an external collaborator)
    SendEmail,
    /// Any other tag carried through verbatim
    Other(String),
}

impl JobType {
    pub const PDF_PARSE: &'static str = "pdf_parse";
    pub const SEND_EMAIL: &'static str = "send_email";

    pub fn as_str(&self) -> &str {
        match self {
            JobType::PdfParse => Self::PDF_PARSE,
            JobType::SendEmail => Self::SEND_EMAIL,
            JobType::Other(tag) => tag,
        }
    }
}

impl From<&str> for JobType {
    fn from(tag: &str) -> Self {
        match tag {
            Self::PDF_PARSE => JobType::PdfParse,
            Self::SEND_EMAIL => JobType::SendEmail,
            other => JobType::Other(other.to_string()),
        }
    }
}

impl From<String> for JobType {
    fn from(tag: String) -> Self {
        JobType::from(tag.as_str())
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(JobType::from)
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and queued, waiting for a worker
    Pending,
    /// A worker is executing the handler
    Processing,
    /// Handler succeeded; result is stored
    Completed,
    /// Handler failed after exhausting the retry budget
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a status write from `self` to `next` respects the lifecycle.
    ///
    /// `pending → processing → (completed | failed)`, plus `failed →
    /// processing` for an explicit replay. Writing the current status again
    /// is allowed (status writes are overwrites).
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (JobStatus::Pending, _) => true,
            (JobStatus::Processing, JobStatus::Completed | JobStatus::Failed) => true,
            (JobStatus::Failed, JobStatus::Processing) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Type-specific payload; large payloads are staged out-of-band and this
    /// stays small.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Final result, set iff the terminal status is `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// A job as submitted, before the store assigns its identifier.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub job_type: JobType,
    pub payload: Option<serde_json::Value>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, job_type: JobType) -> Self {
        Self {
            name: name.into(),
            job_type,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
