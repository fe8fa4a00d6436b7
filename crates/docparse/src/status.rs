//! Per-document parsing lifecycle, subscribers, webhooks, and metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::webhook::WebhookSink;

/// Stage of a document inside the parse pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStage {
    /// Accepted and waiting to be processed
    Uploaded,
    /// Text extraction in progress
    Parsing,
    /// Extracted text being structured by the LLM
    Converting,
    /// Parsed and persisted
    Complete,
    /// The current attempt failed
    Failed,
    /// A failed attempt is being retried
    Retrying,
}

impl DocumentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStage::Uploaded => "uploaded",
            DocumentStage::Parsing => "parsing",
            DocumentStage::Converting => "converting",
            DocumentStage::Complete => "complete",
            DocumentStage::Failed => "failed",
            DocumentStage::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for DocumentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change in a document's parsing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub document_id: String,
    pub status: DocumentStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// Aggregate parsing metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsingMetrics {
    pub total_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub total_processing_time_ms: i64,
    pub average_processing_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Per-document retry budget; a document is terminal-failed once its
    /// retry count reaches this.
    pub max_retries: u32,
    /// Default webhook target; a per-document URL overrides it.
    pub webhook_url: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no status found for document {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    update: StatusUpdate,
    /// Timestamp of the first update, for processing-time metrics.
    first_seen: DateTime<Utc>,
    /// Whether this document already counted towards `failure_count`.
    /// Replayed deliveries re-run the pipeline for the same identifier; a
    /// terminal failure is counted once per document, not once per run.
    failure_counted: bool,
}

#[derive(Default)]
struct TrackerState {
    records: HashMap<String, DocumentRecord>,
    /// Per-document webhook targets, overriding the configured default.
    webhooks: HashMap<String, String>,
    subscribers: Vec<mpsc::Sender<StatusUpdate>>,
    metrics: ParsingMetrics,
}

/// Tracks document parsing status and fans changes out to subscribers and
/// webhooks.
///
/// One exclusion domain covers the record map, the subscriber list, and the
/// metrics; webhook dispatch and subscriber delivery happen outside it.
pub struct ParsingTracker {
    state: Mutex<TrackerState>,
    webhook: Arc<dyn WebhookSink>,
    config: TrackerConfig,
}

impl ParsingTracker {
    pub fn new(config: TrackerConfig, webhook: Arc<dyn WebhookSink>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            webhook,
            config,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Register a per-document webhook target (from the job payload).
    pub fn set_webhook(&self, document_id: &str, url: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.webhooks.insert(document_id.to_string(), url.into());
    }

    /// Install a new status for a document and fan it out.
    ///
    /// A transition to `retrying` increments the retry count; every other
    /// transition preserves it.
    pub fn update_status(
        &self,
        document_id: &str,
        status: DocumentStage,
        error: Option<String>,
    ) {
        let (update, webhook_target, subscribers) = {
            let mut state = self.state.lock().unwrap();
            let now = Utc::now();

            let previous = state.records.get(document_id).cloned();
            let retry_count = match &previous {
                Some(record) if status == DocumentStage::Retrying => {
                    record.update.retry_count + 1
                }
                Some(record) => record.update.retry_count,
                None => 0,
            };

            let update = StatusUpdate {
                document_id: document_id.to_string(),
                status,
                error,
                timestamp: now,
                retry_count,
            };

            let first_seen = previous.as_ref().map(|r| r.first_seen).unwrap_or(now);
            let mut failure_counted = previous
                .as_ref()
                .map(|r| r.failure_counted)
                .unwrap_or(false);
            Self::advance_metrics(
                &mut state.metrics,
                &self.config,
                previous.as_ref(),
                &update,
                first_seen,
                &mut failure_counted,
            );

            let webhook_url = state
                .webhooks
                .get(document_id)
                .cloned()
                .or_else(|| self.config.webhook_url.clone());

            state.records.insert(
                document_id.to_string(),
                DocumentRecord {
                    update: update.clone(),
                    first_seen,
                    failure_counted,
                },
            );

            let subscribers = state.subscribers.clone();
            (update, webhook_url, subscribers)
        };

        // Best-effort webhook, outside the exclusion domain; the update
        // never blocks on the outcome.
        if let Some(url) = webhook_target {
            let webhook = Arc::clone(&self.webhook);
            let notified = update.clone();
            tokio::spawn(async move {
                if let Err(e) = webhook.send(&url, &notified).await {
                    tracing::warn!(
                        document_id = %notified.document_id,
                        error = %e,
                        "webhook notification failed"
                    );
                }
            });
        }

        // Non-blocking delivery: subscribers that cannot accept are skipped.
        for subscriber in subscribers {
            let _ = subscriber.try_send(update.clone());
        }
    }

    /// Current record for a document.
    pub fn get_status(&self, document_id: &str) -> Result<StatusUpdate, TrackerError> {
        let state = self.state.lock().unwrap();
        state
            .records
            .get(document_id)
            .map(|r| r.update.clone())
            .ok_or_else(|| TrackerError::NotFound(document_id.to_string()))
    }

    /// True iff the document failed and has retry budget left.
    pub fn should_retry(&self, document_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        match state.records.get(document_id) {
            Some(record) => {
                record.update.status == DocumentStage::Failed
                    && record.update.retry_count < self.config.max_retries
            }
            None => false,
        }
    }

    pub fn metrics(&self) -> ParsingMetrics {
        self.state.lock().unwrap().metrics.clone()
    }

    pub fn subscribe(&self, subscriber: mpsc::Sender<StatusUpdate>) {
        self.state.lock().unwrap().subscribers.push(subscriber);
    }

    /// Remove the first matching subscriber; no-op if absent.
    pub fn unsubscribe(&self, subscriber: &mpsc::Sender<StatusUpdate>) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state
            .subscribers
            .iter()
            .position(|s| s.same_channel(subscriber))
        {
            state.subscribers.remove(index);
        }
    }

    fn advance_metrics(
        metrics: &mut ParsingMetrics,
        config: &TrackerConfig,
        previous: Option<&DocumentRecord>,
        update: &StatusUpdate,
        first_seen: DateTime<Utc>,
        failure_counted: &mut bool,
    ) {
        if previous.is_none() {
            metrics.total_count += 1;
        }

        match update.status {
            DocumentStage::Complete => {
                metrics.success_count += 1;
                let elapsed = (update.timestamp - first_seen).num_milliseconds().max(0);
                metrics.total_processing_time_ms += elapsed;
                metrics.average_processing_time_ms =
                    metrics.total_processing_time_ms / metrics.success_count as i64;
            }
            // Terminal failure only: earlier failures still have budget,
            // and a document counts at most once however often its
            // delivery replays.
            DocumentStage::Failed
                if update.retry_count >= config.max_retries && !*failure_counted =>
            {
                metrics.failure_count += 1;
                *failure_counted = true;
            }
            DocumentStage::Retrying => {
                metrics.retry_count += 1;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::RecordingWebhook;

    fn tracker_with(max_retries: u32) -> (Arc<ParsingTracker>, Arc<RecordingWebhook>) {
        let webhook = Arc::new(RecordingWebhook::new());
        let tracker = Arc::new(ParsingTracker::new(
            TrackerConfig {
                max_retries,
                webhook_url: None,
            },
            webhook.clone(),
        ));
        (tracker, webhook)
    }

    #[tokio::test]
    async fn get_status_reflects_the_latest_update() {
        let (tracker, _) = tracker_with(3);

        assert!(tracker.get_status("doc-1").is_err());

        tracker.update_status("doc-1", DocumentStage::Uploaded, None);
        tracker.update_status("doc-1", DocumentStage::Parsing, None);

        let status = tracker.get_status("doc-1").unwrap();
        assert_eq!(status.status, DocumentStage::Parsing);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test]
    async fn retrying_increments_the_retry_count_and_nothing_else_does() {
        let (tracker, _) = tracker_with(3);

        tracker.update_status("doc-1", DocumentStage::Uploaded, None);
        tracker.update_status(
            "doc-1",
            DocumentStage::Failed,
            Some("extraction error".to_string()),
        );
        assert_eq!(tracker.get_status("doc-1").unwrap().retry_count, 0);

        tracker.update_status("doc-1", DocumentStage::Retrying, None);
        assert_eq!(tracker.get_status("doc-1").unwrap().retry_count, 1);

        tracker.update_status("doc-1", DocumentStage::Parsing, None);
        assert_eq!(tracker.get_status("doc-1").unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn should_retry_honours_the_budget() {
        let (tracker, _) = tracker_with(2);

        assert!(!tracker.should_retry("doc-1"));

        tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));
        assert!(tracker.should_retry("doc-1"));

        tracker.update_status("doc-1", DocumentStage::Retrying, None);
        tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));
        assert!(tracker.should_retry("doc-1"));

        tracker.update_status("doc-1", DocumentStage::Retrying, None);
        tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));
        // Retry count reached the budget.
        assert!(!tracker.should_retry("doc-1"));
    }

    #[tokio::test]
    async fn metrics_for_a_retried_success() {
        let (tracker, _) = tracker_with(3);

        for (stage, error) in [
            (DocumentStage::Uploaded, None),
            (DocumentStage::Parsing, None),
            (DocumentStage::Failed, Some("extract failed".to_string())),
            (DocumentStage::Retrying, None),
            (DocumentStage::Parsing, None),
            (DocumentStage::Converting, None),
            (DocumentStage::Complete, None),
        ] {
            tracker.update_status("doc-1", stage, error);
        }

        let metrics = tracker.metrics();
        assert_eq!(metrics.total_count, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
        assert!(metrics.retry_count >= 1);
        assert!(metrics.average_processing_time_ms >= 0);
    }

    #[tokio::test]
    async fn metrics_count_terminal_failures_only() {
        let (tracker, _) = tracker_with(1);

        tracker.update_status("doc-1", DocumentStage::Uploaded, None);
        tracker.update_status("doc-1", DocumentStage::Parsing, None);
        tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));
        assert_eq!(tracker.metrics().failure_count, 0);

        tracker.update_status("doc-1", DocumentStage::Retrying, None);
        tracker.update_status("doc-1", DocumentStage::Parsing, None);
        tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));

        let metrics = tracker.metrics();
        assert_eq!(metrics.total_count, 1);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.retry_count, 1);
    }

    #[tokio::test]
    async fn replayed_terminal_failure_counts_once() {
        let (tracker, _) = tracker_with(1);

        let fail_to_exhaustion = |tracker: &ParsingTracker| {
            tracker.update_status("doc-1", DocumentStage::Uploaded, None);
            tracker.update_status("doc-1", DocumentStage::Parsing, None);
            tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));
            tracker.update_status("doc-1", DocumentStage::Retrying, None);
            tracker.update_status("doc-1", DocumentStage::Parsing, None);
            tracker.update_status("doc-1", DocumentStage::Failed, Some("boom".to_string()));
        };

        fail_to_exhaustion(&tracker);
        assert_eq!(tracker.metrics().failure_count, 1);

        // The delivery replays and the pipeline re-runs for the same
        // document identifier.
        fail_to_exhaustion(&tracker);

        let metrics = tracker.metrics();
        assert_eq!(metrics.total_count, 1);
        assert_eq!(metrics.failure_count, 1);
    }

    #[tokio::test]
    async fn subscribers_receive_updates_in_order() {
        let (tracker, _) = tracker_with(3);
        let (tx, mut rx) = mpsc::channel(16);
        tracker.subscribe(tx);

        tracker.update_status("doc-1", DocumentStage::Uploaded, None);
        tracker.update_status("doc-1", DocumentStage::Parsing, None);

        assert_eq!(rx.recv().await.unwrap().status, DocumentStage::Uploaded);
        assert_eq!(rx.recv().await.unwrap().status, DocumentStage::Parsing);
    }

    #[tokio::test]
    async fn full_subscribers_are_skipped_without_blocking() {
        let (tracker, _) = tracker_with(3);
        let (tx, mut rx) = mpsc::channel(1);
        tracker.subscribe(tx);

        tracker.update_status("doc-1", DocumentStage::Uploaded, None);
        tracker.update_status("doc-1", DocumentStage::Parsing, None); // dropped

        assert_eq!(rx.recv().await.unwrap().status, DocumentStage::Uploaded);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_first_match() {
        let (tracker, _) = tracker_with(3);
        let (tx, mut rx) = mpsc::channel(16);
        tracker.subscribe(tx.clone());
        tracker.unsubscribe(&tx);

        tracker.update_status("doc-1", DocumentStage::Uploaded, None);
        assert!(rx.try_recv().is_err());

        // Unsubscribing again is a no-op.
        tracker.unsubscribe(&tx);
    }

    #[tokio::test]
    async fn per_document_webhook_receives_updates() {
        let (tracker, webhook) = tracker_with(3);
        tracker.set_webhook("doc-1", "https://hooks.example.com/parse");

        tracker.update_status("doc-1", DocumentStage::Parsing, None);

        // Webhook dispatch is spawned; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let calls = webhook.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://hooks.example.com/parse");
        assert_eq!(calls[0].1.status, DocumentStage::Parsing);
    }
}
