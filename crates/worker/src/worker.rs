//! The consumer loop.
//!
//! Per-delivery protocol: parse the message, resolve the handler, run it
//! with retries, write the terminal status (and any result) to the durable
//! row and the cache, and only then ack the delivery. A crash between
//! handler success and the ack replays the message (at-least-once);
//! handlers are idempotent on the job identifier.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use conveyor_core::{JobId, JobStatus, QueueMessage};
use conveyor_infra::{Delivery, JobConsumer, JobStore, JobStoreError, StatusCache};

use crate::registry::{HandlerError, HandlerRegistry, HandlerResult, JobContext};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Retries after the first attempt (attempts = retry_max + 1).
    pub retry_max: u32,
    /// Fixed sleep between attempts.
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_max: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// One consumer-group member.
pub struct Worker {
    consumer: Arc<dyn JobConsumer>,
    store: Arc<dyn JobStore>,
    cache: Arc<dyn StatusCache>,
    registry: HandlerRegistry,
    config: WorkerConfig,
    cancel: CancellationToken,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        consumer: Arc<dyn JobConsumer>,
        store: Arc<dyn JobStore>,
        cache: Arc<dyn StatusCache>,
        registry: HandlerRegistry,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            consumer,
            store,
            cache,
            registry,
            config,
            cancel,
            ready_tx,
            ready_rx,
        }
    }

    /// Fires once the consume loop is live.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// Consume until cancelled. In-flight deliveries finish before return.
    pub async fn run(&self) {
        tracing::info!(types = ?self.registry.registered_types(), "worker started");
        let _ = self.ready_tx.send(true);

        loop {
            let deliveries = tokio::select! {
                _ = self.cancel.cancelled() => break,
                fetched = self.consumer.fetch() => fetched,
            };

            match deliveries {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        self.process_delivery(&delivery).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "queue fetch failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        tracing::info!("worker stopped");
    }

    /// Run the per-message protocol for one delivery.
    pub async fn process_delivery(&self, delivery: &Delivery) {
        // Malformed messages carry no durable state to update; commit and
        // move on.
        let message: QueueMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "malformed queue message; skipping"
                );
                self.ack(delivery).await;
                return;
            }
        };

        let job_id = message.id;
        tracing::info!(job_id = %job_id, job_type = %message.job_type, "delivery received");

        let handler = match self.registry.resolve(message.job_type.as_str()) {
            Some(handler) => handler,
            None => {
                tracing::warn!(
                    job_id = %job_id,
                    job_type = %message.job_type,
                    "unknown job type"
                );
                if self.write_terminal(job_id, JobStatus::Failed, None).await {
                    self.ack(delivery).await;
                }
                return;
            }
        };

        self.write_status(job_id, JobStatus::Processing).await;

        let attempts = self.config.retry_max + 1;
        let mut outcome: HandlerResult = Err(HandlerError::retryable("no attempts were made"));

        for attempt in 1..=attempts {
            // Stop opening new attempts once shutdown is requested.
            if attempt > 1 && self.cancel.is_cancelled() {
                break;
            }

            let ctx = JobContext {
                message: message.clone(),
                cancel: self.cancel.child_token(),
            };

            // A panicking handler counts as a failed attempt.
            outcome = match std::panic::AssertUnwindSafe(handler(ctx)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(HandlerError::retryable(format!(
                    "handler panicked: {}",
                    panic_message(panic)
                ))),
            };

            match &outcome {
                Ok(_) => {
                    tracing::info!(job_id = %job_id, attempt, "job handled");
                    break;
                }
                Err(error) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %error, "job attempt failed");
                    // Handlers with their own retry loop report terminal
                    // failures; re-running them cannot succeed.
                    if !error.is_retryable() {
                        break;
                    }
                    if attempt < attempts {
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.retry_backoff) => {}
                            _ = self.cancel.cancelled() => {}
                        }
                    }
                }
            }
        }

        // The offset commits only after the durable status write.
        let advanced = match &outcome {
            Ok(result) => {
                self.write_terminal(job_id, JobStatus::Completed, result.as_ref())
                    .await
            }
            Err(error) => {
                tracing::error!(job_id = %job_id, error = %error, "job failed after retries");
                self.write_terminal(job_id, JobStatus::Failed, None).await
            }
        };

        if advanced {
            self.ack(delivery).await;
        }
    }

    async fn write_status(&self, job_id: JobId, status: JobStatus) {
        match self.store.update_status(job_id, status).await {
            Ok(()) => {
                if let Err(e) = self.cache.set_status(job_id, status).await {
                    tracing::warn!(job_id = %job_id, status = %status, error = %e, "cache status write failed");
                }
            }
            // A replayed delivery for a row that already moved on; the row
            // (and its cache entry) keep the later status.
            Err(JobStoreError::InvalidTransition { from, to }) => {
                tracing::warn!(job_id = %job_id, %from, %to, "status write skipped");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, status = %status, error = %e, "status write failed");
            }
        }
    }

    /// Write the terminal status (and result, when present) durably.
    /// Returns false when the durable write failed, leaving the delivery
    /// unacked for redelivery.
    async fn write_terminal(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<&serde_json::Value>,
    ) -> bool {
        if let Some(result) = result {
            if let Err(e) = self.store.update_response(job_id, &result.to_string()).await {
                match e {
                    JobStoreError::NotFound(_) => {
                        tracing::warn!(job_id = %job_id, "result write for a missing row");
                    }
                    e => {
                        tracing::error!(job_id = %job_id, error = %e, "result write failed");
                        return false;
                    }
                }
            }
        }

        match self.store.update_status(job_id, status).await {
            Ok(()) => {
                if let Err(e) = self.cache.set_status(job_id, status).await {
                    tracing::warn!(job_id = %job_id, error = %e, "cache status write failed");
                }
            }
            // The row was reconciled away; there is nothing left to advance
            // and redelivering would loop forever.
            Err(JobStoreError::NotFound(_)) => {
                tracing::warn!(job_id = %job_id, "terminal write for a missing row");
            }
            // A replayed delivery for a row that is already terminal. The
            // earlier terminal status stands (once completed, it stays
            // completed); committing avoids an endless redelivery loop.
            Err(JobStoreError::InvalidTransition { from, to }) => {
                tracing::warn!(job_id = %job_id, %from, %to, "terminal write skipped");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "terminal status write failed");
                return false;
            }
        }

        true
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.consumer.ack(&delivery.id).await {
            // Redelivery is safe: handlers are idempotent on the job id.
            tracing::error!(delivery_id = %delivery.id, error = %e, "ack failed");
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
