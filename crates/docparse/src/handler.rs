//! The document-parse pipeline: fetch payload → stage → extract text →
//! structure via LLM → persist, with tracker-driven per-document retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use conveyor_core::{JobId, SourceKind, StagedParsePayload};
use conveyor_infra::{JobStore, LocalStorage, StatusCache};

use crate::extract::{ExtractError, TextExtractor};
use crate::llm::{LlmError, SchemaLlm};
use crate::status::{DocumentStage, ParsingTracker};

/// Pause between attempts of one document.
const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to get job payload: {0}")]
    PayloadFetch(String),

    #[error("failed to decode job payload: {0}")]
    PayloadDecode(String),

    #[error("failed to stage document: {0}")]
    Staging(String),

    #[error("text extraction error: {0}")]
    Extraction(#[from] ExtractError),

    #[error("LLM processing error: {0}")]
    Llm(#[from] LlmError),

    #[error("failed to persist result: {0}")]
    Persist(String),

    #[error("cancelled")]
    Cancelled,
}

/// Executes PDF-parse jobs.
///
/// Safe to run twice for the same job identifier: the document identifier
/// is derived from the job id, result writes are overwrites, and a missing
/// staged file is re-staged from the source.
pub struct ParseDocumentHandler {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn StatusCache>,
    storage: Arc<LocalStorage>,
    extractor: Arc<dyn TextExtractor>,
    llm: Arc<dyn SchemaLlm>,
    tracker: Arc<ParsingTracker>,
    result_ttl: Duration,
}

impl ParseDocumentHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn StatusCache>,
        storage: Arc<LocalStorage>,
        extractor: Arc<dyn TextExtractor>,
        llm: Arc<dyn SchemaLlm>,
        tracker: Arc<ParsingTracker>,
        result_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            storage,
            extractor,
            llm,
            tracker,
            result_ttl,
        }
    }

    pub fn tracker(&self) -> &Arc<ParsingTracker> {
        &self.tracker
    }

    /// Run the pipeline for a job, returning the structured result.
    pub async fn handle(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ParseError> {
        let document_id = format!("doc-{job_id}");
        self.tracker
            .update_status(&document_id, DocumentStage::Uploaded, None);

        let max_attempts = self.tracker.max_retries() + 1;
        let mut last_error = ParseError::PayloadFetch("no attempts were made".to_string());

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ParseError::Cancelled);
            }
            if attempt > 1 {
                self.tracker
                    .update_status(&document_id, DocumentStage::Retrying, None);
                tokio::time::sleep(RETRY_DELAY).await;
            }

            match self.attempt(job_id, &document_id, cancel).await {
                Ok(value) => {
                    self.tracker
                        .update_status(&document_id, DocumentStage::Complete, None);
                    tracing::info!(job_id = %job_id, attempt, "document parsed");
                    return Ok(value);
                }
                Err(error) => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %error,
                        "parse attempt failed"
                    );
                    self.tracker.update_status(
                        &document_id,
                        DocumentStage::Failed,
                        Some(error.to_string()),
                    );
                    last_error = error;

                    if !self.tracker.should_retry(&document_id) {
                        break;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        job_id: JobId,
        document_id: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ParseError> {
        self.tracker
            .update_status(document_id, DocumentStage::Parsing, None);

        let bytes = self
            .cache
            .get_payload(job_id)
            .await
            .map_err(|e| ParseError::PayloadFetch(e.to_string()))?
            .ok_or_else(|| ParseError::PayloadFetch("payload missing or expired".to_string()))?;
        let staged: StagedParsePayload =
            serde_json::from_slice(&bytes).map_err(|e| ParseError::PayloadDecode(e.to_string()))?;

        if let Some(url) = &staged.payload.webhook_url {
            self.tracker.set_webhook(document_id, url.clone());
        }

        let (pdf_path, staged_here) = self.ensure_staged(&staged).await?;

        let result = self
            .run_stages(job_id, document_id, &staged, &pdf_path, cancel)
            .await;

        // Files this handler staged are its responsibility on every exit path.
        if staged_here {
            if let Err(e) = self.storage.delete(&pdf_path).await {
                tracing::warn!(path = %pdf_path.display(), error = %e, "staged file cleanup failed");
            }
        }

        result
    }

    async fn run_stages(
        &self,
        job_id: JobId,
        document_id: &str,
        staged: &StagedParsePayload,
        pdf_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ParseError> {
        let text = self
            .extractor
            .extract(pdf_path, staged.payload.max_pages())
            .await?;
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }

        self.tracker
            .update_status(document_id, DocumentStage::Converting, None);

        let schema = staged
            .payload
            .expected_schema
            .clone()
            .unwrap_or(serde_json::Value::Null);
        let description = staged.payload.description.as_deref().unwrap_or("");
        let structured = self.llm.structure(&text, &schema, description).await?;
        if cancel.is_cancelled() {
            return Err(ParseError::Cancelled);
        }

        // Overwrite semantics keep the replay path safe.
        self.store
            .update_response(job_id, &structured)
            .await
            .map_err(|e| ParseError::Persist(e.to_string()))?;
        self.cache
            .set_result(job_id, structured.as_bytes(), self.result_ttl)
            .await
            .map_err(|e| ParseError::Persist(e.to_string()))?;

        serde_json::from_str(&structured).map_err(|e| LlmError::InvalidJson(e.to_string()).into())
    }

    /// Use the staged file from submission when it still exists, otherwise
    /// re-stage from the source. Returns whether this handler staged it.
    async fn ensure_staged(
        &self,
        staged: &StagedParsePayload,
    ) -> Result<(PathBuf, bool), ParseError> {
        if let Some(path) = &staged.pdf_path {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok((path, false));
            }
        }

        match staged.payload.kind() {
            SourceKind::Url => {
                let path = self
                    .storage
                    .store_from_url(&staged.payload.pdf_source)
                    .await
                    .map_err(|e| ParseError::Staging(e.to_string()))?;
                Ok((path, true))
            }
            SourceKind::Base64 => {
                let bytes = staged
                    .payload
                    .decode_base64()
                    .map_err(|e| ParseError::Staging(e.to_string()))?;
                let path = self
                    .storage
                    .store_from_bytes(&bytes)
                    .await
                    .map_err(|e| ParseError::Staging(e.to_string()))?;
                Ok((path, true))
            }
            SourceKind::Path => {
                let path = PathBuf::from(&staged.payload.pdf_source);
                if !path.exists() {
                    return Err(ParseError::Staging(format!(
                        "source file not found: {}",
                        path.display()
                    )));
                }
                Ok((path, false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use conveyor_core::{JobStatus, JobType, NewJob, ParseDocumentPayload};
    use conveyor_infra::{InMemoryCache, InMemoryJobStore};

    use crate::status::{StatusUpdate, TrackerConfig};
    use crate::webhook::RecordingWebhook;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyExtractor {
        failures: AtomicU32,
    }

    impl FlakyExtractor {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl TextExtractor for FlakyExtractor {
        async fn extract(
            &self,
            _path: &Path,
            _max_pages: Option<u32>,
        ) -> Result<String, ExtractError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ExtractError::Parse("simulated extraction failure".into()));
            }
            Ok("Invoice 42 from ACME, total 10.50".to_string())
        }
    }

    struct FencedLlm {
        calls: Mutex<Vec<String>>,
    }

    impl FencedLlm {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SchemaLlm for FencedLlm {
        async fn structure(
            &self,
            text: &str,
            _schema: &serde_json::Value,
            _description: &str,
        ) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(text.to_string());
            crate::llm::validate_response("```json\n{\"invoice\": 42, \"total\": 10.5}\n```")
        }
    }

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        cache: Arc<InMemoryCache>,
        storage: Arc<LocalStorage>,
        tracker: Arc<ParsingTracker>,
        updates: mpsc::Receiver<StatusUpdate>,
    }

    impl Fixture {
        fn new(max_retries: u32) -> Self {
            let dir =
                std::env::temp_dir().join(format!("conveyor-parse-{}", uuid::Uuid::now_v7()));
            let storage = Arc::new(LocalStorage::new(dir, 10 * 1024 * 1024).unwrap());
            let tracker = Arc::new(ParsingTracker::new(
                TrackerConfig {
                    max_retries,
                    webhook_url: None,
                },
                Arc::new(RecordingWebhook::new()),
            ));

            let (tx, updates) = mpsc::channel(64);
            tracker.subscribe(tx);

            Self {
                store: Arc::new(InMemoryJobStore::new()),
                cache: Arc::new(InMemoryCache::new()),
                storage,
                tracker,
                updates,
            }
        }

        fn handler(&self, extractor: Arc<dyn TextExtractor>) -> ParseDocumentHandler {
            ParseDocumentHandler::new(
                self.store.clone(),
                self.cache.clone(),
                self.storage.clone(),
                extractor,
                Arc::new(FencedLlm::new()),
                self.tracker.clone(),
                Duration::from_secs(60),
            )
        }

        /// Insert a job and stage its payload the way the submission
        /// service does.
        async fn staged_job(&self) -> JobId {
            let job = self
                .store
                .insert(NewJob::new("PDF Parse Job", JobType::PdfParse))
                .await
                .unwrap();

            let pdf_path = self.storage.store_from_bytes(b"%PDF-1.4 test").await.unwrap();
            let staged = StagedParsePayload {
                payload: ParseDocumentPayload {
                    pdf_source: "https://example.com/invoice.pdf".to_string(),
                    source_kind: Some(SourceKind::Url),
                    expected_schema: Some(json!({"type": "object"})),
                    description: Some("Extract invoice details.".to_string()),
                    options: None,
                    webhook_url: None,
                },
                pdf_path: Some(pdf_path.to_string_lossy().into_owned()),
            };
            self.cache
                .set_payload(
                    job.id,
                    &serde_json::to_vec(&staged).unwrap(),
                    Duration::from_secs(60),
                )
                .await
                .unwrap();

            job.id
        }

        fn drain_stages(&mut self) -> Vec<DocumentStage> {
            let mut stages = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                stages.push(update.status);
            }
            stages
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_a_flaky_extraction() {
        let mut fx = Fixture::new(3);
        let job_id = fx.staged_job().await;

        let handler = fx.handler(Arc::new(FlakyExtractor::new(1)));
        let cancel = CancellationToken::new();
        let value = handler.handle(job_id, &cancel).await.unwrap();
        assert_eq!(value["invoice"], 42);

        assert_eq!(
            fx.drain_stages(),
            vec![
                DocumentStage::Uploaded,
                DocumentStage::Parsing,
                DocumentStage::Failed,
                DocumentStage::Retrying,
                DocumentStage::Parsing,
                DocumentStage::Converting,
                DocumentStage::Complete,
            ]
        );

        let job = fx.store.get(job_id).await.unwrap().unwrap();
        assert!(job.response.is_some());
        assert!(fx.cache.get_result(job_id).await.unwrap().is_some());

        let metrics = fx.tracker.metrics();
        assert_eq!(metrics.total_count, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
        assert!(metrics.retry_count >= 1);
    }

    #[tokio::test]
    async fn retries_exhaust_into_an_error() {
        let mut fx = Fixture::new(1);
        let job_id = fx.staged_job().await;

        let handler = fx.handler(Arc::new(FlakyExtractor::new(u32::MAX)));
        let cancel = CancellationToken::new();
        let error = handler.handle(job_id, &cancel).await.unwrap_err();
        assert!(matches!(error, ParseError::Extraction(_)));

        let stages = fx.drain_stages();
        assert_eq!(stages.last(), Some(&DocumentStage::Failed));
        assert_eq!(
            stages
                .iter()
                .filter(|s| **s == DocumentStage::Parsing)
                .count(),
            2
        );

        let metrics = fx.tracker.metrics();
        assert_eq!(metrics.total_count, 1);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.failure_count, 1);

        let job = fx.store.get(job_id).await.unwrap().unwrap();
        assert!(job.response.is_none());
        // The worker owns the job-level failure write.
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn replay_overwrites_the_previous_result() {
        let mut fx = Fixture::new(0);
        let job_id = fx.staged_job().await;

        let handler = fx.handler(Arc::new(FlakyExtractor::new(0)));
        let cancel = CancellationToken::new();

        handler.handle(job_id, &cancel).await.unwrap();
        let first = fx.store.get(job_id).await.unwrap().unwrap().response;

        handler.handle(job_id, &cancel).await.unwrap();
        let second = fx.store.get(job_id).await.unwrap().unwrap().response;

        assert_eq!(first, second);
        assert!(first.is_some());
        fx.drain_stages();
    }

    #[tokio::test]
    async fn missing_staged_file_is_restaged_from_a_base64_source() {
        let fx = Fixture::new(0);
        let job = fx
            .store
            .insert(NewJob::new("PDF Parse Job", JobType::PdfParse))
            .await
            .unwrap();

        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let staged = StagedParsePayload {
            payload: ParseDocumentPayload {
                pdf_source: STANDARD.encode(b"%PDF-1.4 restaged"),
                source_kind: Some(SourceKind::Base64),
                expected_schema: Some(json!({"type": "object"})),
                description: None,
                options: None,
                webhook_url: None,
            },
            // Points at a file that no longer exists.
            pdf_path: Some(
                fx.storage
                    .temp_dir()
                    .join("pdf-gone.pdf")
                    .to_string_lossy()
                    .into_owned(),
            ),
        };
        fx.cache
            .set_payload(
                job.id,
                &serde_json::to_vec(&staged).unwrap(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let handler = fx.handler(Arc::new(FlakyExtractor::new(0)));
        let cancel = CancellationToken::new();
        handler.handle(job.id, &cancel).await.unwrap();

        // The re-staged copy was cleaned up after the attempt.
        let leftovers: Vec<_> = std::fs::read_dir(fx.storage.temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_payload_is_a_retryable_fetch_error() {
        let fx = Fixture::new(0);
        let job = fx
            .store
            .insert(NewJob::new("PDF Parse Job", JobType::PdfParse))
            .await
            .unwrap();

        let handler = fx.handler(Arc::new(FlakyExtractor::new(0)));
        let cancel = CancellationToken::new();
        let error = handler.handle(job.id, &cancel).await.unwrap_err();
        assert!(matches!(error, ParseError::PayloadFetch(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_between_attempts() {
        let fx = Fixture::new(3);
        let job_id = fx.staged_job().await;

        let handler = fx.handler(Arc::new(FlakyExtractor::new(u32::MAX)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = handler.handle(job_id, &cancel).await.unwrap_err();
        assert!(matches!(error, ParseError::Cancelled));
    }
}
