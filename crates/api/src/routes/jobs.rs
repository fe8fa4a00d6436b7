use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use conveyor_core::{Job, JobId, NewJob, QueueMessage};

use crate::app::AppState;
use crate::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    job_type: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// POST /api/jobs: create a generic job.
///
/// Consistency protocol: insert the row (commit point for existence), set
/// the cache status, publish. Any failure after the insert deletes the row
/// so workers never see a job whose message was never sent; success
/// guarantees the message was accepted.
pub async fn create_job(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body.map_err(|_| ApiError::InvalidBody)?;

    if req.name.is_empty() {
        return Err(ApiError::Validation("Job name is required".to_string()));
    }
    if req.job_type.is_empty() {
        return Err(ApiError::Validation("Job type is required".to_string()));
    }

    let mut new_job = NewJob::new(req.name, req.job_type.as_str().into());
    if let Some(payload) = req.payload {
        new_job = new_job.with_payload(payload);
    }

    let job = state.store.insert(new_job).await.map_err(|e| {
        tracing::error!(error = %e, "job insert failed");
        ApiError::internal("Failed to create job")
    })?;

    if let Err(e) = state.cache.set_status(job.id, job.status).await {
        tracing::error!(job_id = %job.id, error = %e, "initial status write failed");
        reconcile(&state, job.id).await;
        return Err(ApiError::internal("Failed to set job status"));
    }

    let message = QueueMessage::for_job(&job);
    if let Err(e) = state.producer.publish(&message).await {
        tracing::error!(job_id = %job.id, error = %e, "queue publish failed");
        reconcile(&state, job.id).await;
        return Err(ApiError::internal("Failed to queue job"));
    }

    tracing::info!(job_id = %job.id, job_type = %job.job_type, "job created");

    Ok(Json(json!({ "job": job })))
}

/// GET /api/jobs/:id: fetch a job, overlaying the fresher cache status.
pub async fn get_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id: i64 = id.parse().map_err(|_| ApiError::InvalidJobId)?;
    let id = JobId(id);

    let mut job = state
        .store
        .get(id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %id, error = %e, "job fetch failed");
            ApiError::internal("Failed to fetch job")
        })?
        .ok_or(ApiError::NotFound)?;

    overlay_cache_status(&state, &mut job).await;

    Ok(Json(json!({ "job": job })))
}

/// GET /api/jobs: all jobs, newest first, statuses overlaid from cache.
pub async fn list_jobs(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut jobs = state.store.list().await.map_err(|e| {
        tracing::error!(error = %e, "job list failed");
        ApiError::internal("Failed to fetch jobs")
    })?;

    for job in &mut jobs {
        overlay_cache_status(&state, job).await;
    }

    Ok(Json(json!({ "jobs": jobs })))
}

/// The cache is fresher than the row during a job's active window; when an
/// entry exists it replaces the persisted status in the response.
async fn overlay_cache_status(state: &AppState, job: &mut Job) {
    if let Ok(Some(status)) = state.cache.get_status(job.id).await {
        job.status = status;
    }
}

/// Remove the partial state of a create that could not complete.
pub(crate) async fn reconcile(state: &AppState, id: JobId) {
    if let Err(e) = state.store.delete(id).await {
        tracing::error!(job_id = %id, error = %e, "reconcile: row delete failed");
    }
    if let Err(e) = state.cache.clear(id).await {
        tracing::warn!(job_id = %id, error = %e, "reconcile: cache clear failed");
    }
}
