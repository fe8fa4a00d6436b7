//! Shared data contracts and configuration for conveyor.
//!
//! Everything the submission service and the workers agree on lives here:
//! the durable job record, the queue message, the document-parse payload,
//! and the environment-driven configuration.

pub mod config;
pub mod job;
pub mod message;
pub mod parse;

pub use config::Config;
pub use job::{Job, JobId, JobStatus, JobType, NewJob};
pub use message::QueueMessage;
pub use parse::{
    ParseDocumentPayload, ParseOptions, SourceKind, StagedParsePayload, MAX_PDF_SIZE,
};
