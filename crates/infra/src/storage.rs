//! Staging storage for source documents.
//!
//! Stages a PDF coming from a URL or raw bytes into the configured staging
//! directory so handlers can read it, and guarantees cleanup. Every delete
//! is confined to the staging directory.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to download file: {0}")]
    Network(String),

    #[error("failed to download file: status {0}")]
    Download(u16),

    #[error("file exceeds the configured maximum size")]
    TooLarge,

    #[error("invalid file path: must be within the staging directory")]
    OutsideStagingDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local filesystem staging rooted at the configured directory.
pub struct LocalStorage {
    temp_dir: PathBuf,
    max_size: u64,
    http: reqwest::Client,
}

impl LocalStorage {
    /// Create the staging root if missing.
    pub fn new(temp_dir: impl Into<PathBuf>, max_size: u64) -> Result<Self, StorageError> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            temp_dir,
            max_size,
            http: reqwest::Client::new(),
        })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Download a URL body into a staged file.
    pub async fn store_from_url(&self, url: &str) -> Result<PathBuf, StorageError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Download(response.status().as_u16()));
        }
        if response.content_length().is_some_and(|len| len > self.max_size) {
            return Err(StorageError::TooLarge);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        if body.len() as u64 > self.max_size {
            return Err(StorageError::TooLarge);
        }

        self.store_from_bytes(&body).await
    }

    /// Write raw bytes into a staged file.
    pub async fn store_from_bytes(&self, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.staged_path();
        if let Err(e) = tokio::fs::write(&path, data).await {
            // Nothing should be left behind on a failed write.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        Ok(path)
    }

    /// Remove a previously staged file. Idempotent; refuses any path not
    /// rooted in the staging directory.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        delete_confined(&self.temp_dir, path).await
    }

    /// Delete the staged file after the TTL, best effort.
    pub fn schedule_cleanup(&self, path: PathBuf, ttl: Duration) {
        let temp_dir = self.temp_dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = delete_confined(&temp_dir, &path).await {
                tracing::warn!(path = %path.display(), error = %e, "staged file cleanup failed");
            }
        });
    }

    fn staged_path(&self) -> PathBuf {
        self.temp_dir.join(format!("pdf-{}.pdf", Uuid::now_v7()))
    }
}

/// Confined delete: rooted in the staging directory, no parent hops,
/// idempotent on missing files.
async fn delete_confined(temp_dir: &Path, path: &Path) -> Result<(), StorageError> {
    let confined = path.starts_with(temp_dir)
        && !path.components().any(|c| matches!(c, Component::ParentDir));
    if !confined {
        return Err(StorageError::OutsideStagingDir);
    }

    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
