//! Document parsing: extract text from a PDF, structure it against a
//! caller-provided JSON schema via an LLM, and persist the result, with a
//! per-document status tracker, retries, webhooks, and metrics.

pub mod extract;
pub mod handler;
pub mod llm;
pub mod status;
pub mod webhook;

pub use extract::{ExtractError, PdfTextExtractor, TextExtractor};
pub use handler::{ParseDocumentHandler, ParseError};
pub use llm::{GeminiClient, LlmError, SchemaLlm};
pub use status::{
    DocumentStage, ParsingMetrics, ParsingTracker, StatusUpdate, TrackerConfig, TrackerError,
};
pub use webhook::{HttpWebhook, RecordingWebhook, WebhookError, WebhookSink};
