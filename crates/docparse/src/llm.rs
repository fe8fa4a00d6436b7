//! LLM structuring: turn extracted text into schema-shaped JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key is not configured")]
    MissingApiKey,

    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM returned status {0}")]
    Status(u16),

    #[error("no response generated")]
    EmptyResponse,

    #[error("invalid JSON response from LLM: {0}")]
    InvalidJson(String),
}

/// Structures document text against a caller-provided JSON schema.
///
/// The response is expected to be a single JSON object; implementations
/// strip markdown fences before validating.
#[async_trait]
pub trait SchemaLlm: Send + Sync {
    async fn structure(
        &self,
        text: &str,
        schema: &serde_json::Value,
        description: &str,
    ) -> Result<String, LlmError>;
}

/// Gemini REST client.
///
/// A missing key is reported at call time, not construction, so the worker
/// still boots and the handler fails (and retries) per attempt.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[async_trait]
impl SchemaLlm for GeminiClient {
    async fn structure(
        &self,
        text: &str,
        schema: &serde_json::Value,
        description: &str,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;

        let prompt = build_prompt(text, schema, description);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let url = format!(
            "{GEMINI_API_URL}/{}:generateContent?key={api_key}",
            self.model
        );
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Status(response.status().as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let raw = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(LlmError::EmptyResponse)?;

        validate_response(&raw)
    }
}

/// Build the extraction prompt from the description, the schema, and the
/// document text.
pub fn build_prompt(text: &str, schema: &serde_json::Value, description: &str) -> String {
    let schema = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());

    format!(
        "Extract structured data from the following document text according to \
         the provided JSON schema.\nUse the description to guide your extraction.\n\n\
         DESCRIPTION:\n{description}\n\n\
         JSON SCHEMA:\n{schema}\n\n\
         DOCUMENT TEXT:\n{text}\n\n\
         Respond with ONLY a valid JSON object matching the schema. \
         Do not include any explanations or markdown formatting.\n"
    )
}

/// Strip markdown fences and surrounding whitespace from an LLM response.
pub fn clean_response(raw: &str) -> &str {
    let cleaned = raw.trim();
    let cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    let cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    cleaned.trim()
}

/// Clean a raw response and require that it parses as JSON.
pub fn validate_response(raw: &str) -> Result<String, LlmError> {
    let cleaned = clean_response(raw);
    serde_json::from_str::<serde_json::Value>(cleaned)
        .map_err(|e| LlmError::InvalidJson(e.to_string()))?;
    Ok(cleaned.to_string())
}
