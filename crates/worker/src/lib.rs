//! The consumer worker: receives queue deliveries within a consumer group,
//! dispatches each to a typed handler with retries, and advances persistent
//! state before committing consumption.

pub mod registry;
pub mod worker;

pub use registry::{HandlerError, HandlerRegistry, HandlerResult, JobContext};
pub use worker::{Worker, WorkerConfig};
