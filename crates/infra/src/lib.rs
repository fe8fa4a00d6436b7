//! Infrastructure: durable store, status cache, job queue, staging storage.
//!
//! Every component is a trait with a production implementation (Postgres,
//! Redis) and an in-memory implementation for tests and development. The
//! services receive these as `Arc<dyn ...>` dependencies at construction.

pub mod cache;
pub mod job_store;
pub mod queue;
pub mod storage;

pub use cache::{CacheError, InMemoryCache, RedisCache, StatusCache};
pub use job_store::{InMemoryJobStore, JobStore, JobStoreError, PostgresJobStore};
pub use queue::{
    Delivery, InMemoryQueue, JobConsumer, JobProducer, QueueError, RedisStreamsQueue,
};
pub use storage::{LocalStorage, StorageError};
