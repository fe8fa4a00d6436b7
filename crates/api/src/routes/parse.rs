use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use serde_json::json;

use conveyor_core::{
    JobType, NewJob, ParseDocumentPayload, QueueMessage, SourceKind, StagedParsePayload,
};

use crate::app::AppState;
use crate::errors::ApiError;
use crate::routes::jobs::reconcile;

/// POST /api/jobs/parse-document: create a PDF-parse job.
///
/// The PDF is staged before the row exists; every later failure deletes the
/// staged file (and the row, once inserted). A deferred cleanup of the
/// staged file runs after the staging TTL regardless of outcome.
pub async fn create_parse_job(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<ParseDocumentPayload>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = body.map_err(|_| ApiError::InvalidBody)?;

    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let pdf_path: Option<PathBuf> = match payload.kind() {
        SourceKind::Url => {
            let path = state
                .storage
                .store_from_url(&payload.pdf_source)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "PDF staging from URL failed");
                    ApiError::internal(format!("Failed to store PDF: {e}"))
                })?;
            Some(path)
        }
        SourceKind::Base64 => {
            // Validation already proved the source decodes.
            let bytes = payload
                .decode_base64()
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            let path = state.storage.store_from_bytes(&bytes).await.map_err(|e| {
                tracing::error!(error = %e, "PDF staging from bytes failed");
                ApiError::internal(format!("Failed to store PDF: {e}"))
            })?;
            Some(path)
        }
        SourceKind::Path => None,
    };

    let cleanup_staged = |path: Option<PathBuf>| {
        let storage = state.storage.clone();
        async move {
            if let Some(path) = path {
                let _ = storage.delete(&path).await;
            }
        }
    };

    let job = match state
        .store
        .insert(NewJob::new("PDF Parse Job", JobType::PdfParse))
        .await
    {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %e, "job insert failed");
            cleanup_staged(pdf_path).await;
            return Err(ApiError::internal("Failed to create job"));
        }
    };

    let staged = StagedParsePayload {
        payload,
        pdf_path: pdf_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
    };
    let staged_bytes = match serde_json::to_vec(&staged) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "payload encoding failed");
            reconcile(&state, job.id).await;
            cleanup_staged(pdf_path).await;
            return Err(ApiError::internal("Failed to store job payload"));
        }
    };

    if let Err(e) = state
        .cache
        .set_payload(job.id, &staged_bytes, state.staging_ttl)
        .await
    {
        tracing::error!(job_id = %job.id, error = %e, "payload staging failed");
        reconcile(&state, job.id).await;
        cleanup_staged(pdf_path).await;
        return Err(ApiError::internal("Failed to store job payload"));
    }

    if let Err(e) = state.cache.set_status(job.id, job.status).await {
        tracing::error!(job_id = %job.id, error = %e, "initial status write failed");
        reconcile(&state, job.id).await;
        cleanup_staged(pdf_path).await;
        return Err(ApiError::internal("Failed to set job status"));
    }

    let message = QueueMessage::for_job(&job);
    if let Err(e) = state.producer.publish(&message).await {
        tracing::error!(job_id = %job.id, error = %e, "queue publish failed");
        reconcile(&state, job.id).await;
        cleanup_staged(pdf_path).await;
        return Err(ApiError::internal("Failed to queue job"));
    }

    // Staged files never outlive the staging TTL.
    if let Some(path) = pdf_path {
        state.storage.schedule_cleanup(path, state.staging_ttl);
    }

    tracing::info!(job_id = %job.id, "parse-document job created");

    Ok(Json(json!({
        "job_id": job.id,
        "status": job.status,
    })))
}
