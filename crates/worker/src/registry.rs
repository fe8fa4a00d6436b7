//! Handler registry: job type tag → handler function.
//!
//! Populated at startup; the worker resolves the tag of every delivery
//! against it. Unknown tags fail the job with "unknown job type".

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use conveyor_core::QueueMessage;

/// Failure of one handler invocation.
///
/// Handlers that run their own retry loop report `terminal` failures once
/// their budget is spent; the worker must not retry those.
#[derive(Debug, Clone)]
pub struct HandlerError {
    message: String,
    retryable: bool,
}

impl HandlerError {
    /// A transient failure; the worker may retry within its budget.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A terminal failure; retrying cannot succeed or already happened
    /// inside the handler.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of one handler invocation: optional result value on success,
/// a [`HandlerError`] on failure.
pub type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

type JobHandlerFn = Arc<dyn Fn(JobContext) -> HandlerFuture + Send + Sync>;

/// Everything a handler gets for one invocation.
#[derive(Clone)]
pub struct JobContext {
    pub message: QueueMessage,
    pub cancel: CancellationToken,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type tag.
    pub fn register<F, Fut>(&mut self, type_tag: impl Into<String>, handler: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers
            .insert(type_tag.into(), Arc::new(move |ctx| Box::pin(handler(ctx))));
    }

    pub fn resolve(&self, type_tag: &str) -> Option<JobHandlerFn> {
        self.handlers.get(type_tag).cloned()
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conveyor_core::{JobId, JobType};

    fn context(tag: &str) -> JobContext {
        JobContext {
            message: QueueMessage {
                id: JobId(1),
                name: "job".to_string(),
                job_type: JobType::from(tag),
                created_at: Utc::now(),
            },
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn registered_handler_resolves_and_runs() {
        let mut registry = HandlerRegistry::new();
        registry.register("test_job", |ctx: JobContext| async move {
            Ok(Some(serde_json::json!({"id": ctx.message.id})))
        });

        let handler = registry.resolve("test_job").unwrap();
        let outcome = handler(context("test_job")).await.unwrap().unwrap();
        assert_eq!(outcome["id"], 1);
    }

    #[tokio::test]
    async fn unknown_tag_does_not_resolve() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve("mystery").is_none());
    }
}
