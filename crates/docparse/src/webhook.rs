//! Webhook notifications for status changes.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::status::StatusUpdate;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to send webhook request: {0}")]
    Transport(String),

    #[error("webhook request failed with status {0}")]
    Status(u16),
}

/// Delivers status updates to an external endpoint.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn send(&self, url: &str, update: &StatusUpdate) -> Result<(), WebhookError>;
}

/// HTTP webhook delivery.
pub struct HttpWebhook {
    client: reqwest::Client,
}

impl HttpWebhook {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn send(&self, url: &str, update: &StatusUpdate) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .json(update)
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WebhookError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Records calls instead of sending them, for tests.
#[derive(Debug, Default)]
pub struct RecordingWebhook {
    calls: Mutex<Vec<(String, StatusUpdate)>>,
}

impl RecordingWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, StatusUpdate)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookSink for RecordingWebhook {
    async fn send(&self, url: &str, update: &StatusUpdate) -> Result<(), WebhookError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), update.clone()));
        Ok(())
    }
}
