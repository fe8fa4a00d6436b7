//! Postgres-backed job store.
//!
//! Single `jobs` table; no transactions beyond single-statement atomicity.
//! The `status` column carries the same closed tag set the check constraint
//! enforces, so a bad write fails loudly at the database.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use conveyor_core::{Job, JobId, JobStatus, NewJob};

use super::{JobStore, JobStoreError};

/// Job store over a shared `PgPool` (one pool per process).
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `jobs` table if it does not exist yet.
    ///
    /// Schema management is otherwise external; this keeps fresh
    /// environments and tests bootable.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                type TEXT NOT NULL,
                payload JSON,
                response TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (name, status, type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(&new.name)
        .bind(JobStatus::Pending.as_str())
        .bind(new.job_type.as_str())
        .bind(&new.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(Job {
            id: JobId(id),
            name: new.name,
            job_type: new.job_type,
            status: JobStatus::Pending,
            created_at,
            payload: new.payload,
            response: None,
        })
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, status, created_at, type, payload, response
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(job_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, status, created_at, type, payload, response
            FROM jobs
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.into_iter().map(job_from_row).collect()
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<(), JobStoreError> {
        // The WHERE clause encodes the status lifecycle (the same rule the
        // in-memory store enforces): pending may move anywhere, processing
        // only to a terminal status, failed back to processing for an
        // explicit replay, and overwriting with the same status is allowed.
        // A replayed delivery against an already-terminal row matches no
        // row instead of regressing it.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1
            WHERE id = $2
              AND (
                  status = $1
                  OR status = 'pending'
                  OR (status = 'processing' AND $1 IN ('completed', 'failed'))
                  OR (status = 'failed' AND $1 = 'processing')
              )
            "#,
        )
        .bind(status.as_str())
        .bind(id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 0 {
            // Missing row and rejected transition are different failures.
            let row = sqlx::query("SELECT status FROM jobs WHERE id = $1")
                .bind(id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("update_status", e))?;

            return Err(match row {
                None => JobStoreError::NotFound(id),
                Some(row) => {
                    let from: String = row.try_get("status").map_err(decode_error)?;
                    let from = from
                        .parse()
                        .map_err(|e: String| JobStoreError::Storage(e))?;
                    JobStoreError::InvalidTransition { from, to: status }
                }
            });
        }
        Ok(())
    }

    async fn update_response(&self, id: JobId, response: &str) -> Result<(), JobStoreError> {
        let result = sqlx::query("UPDATE jobs SET response = $1 WHERE id = $2")
            .bind(response)
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_response", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<(), JobStoreError> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(())
    }
}

fn job_from_row(row: sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_error)?;
    let job_type: String = row.try_get("type").map_err(decode_error)?;
    let payload: Option<serde_json::Value> = row.try_get("payload").map_err(decode_error)?;
    let response: Option<String> = row.try_get("response").map_err(decode_error)?;

    let status = status
        .parse()
        .map_err(|e: String| JobStoreError::Storage(e))?;

    Ok(Job {
        id: JobId(id),
        name,
        job_type: job_type.into(),
        status,
        created_at,
        payload,
        response,
    })
}

fn decode_error(e: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("failed to decode job row: {e}"))
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{operation}: {e}"))
}
