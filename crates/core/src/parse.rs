//! Document-parse payload and its validation rules.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted inline (base64) PDF, in bytes.
pub const MAX_PDF_SIZE: usize = 10 * 1024 * 1024;

/// Where the source document comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Base64,
    Path,
}

/// Optional parsing parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Expected language of the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Whether to use OCR for image-based PDFs
    #[serde(default)]
    pub ocr_enabled: bool,
    /// Minimum confidence for extracted fields (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    /// Limit processing to the first N pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

/// Incoming payload for a PDF-parse job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseDocumentPayload {
    /// URL, base64-encoded bytes, or a local path
    pub pdf_source: String,
    /// Source kind; auto-detected from the source when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<SourceKind>,
    /// Expected output structure for the parsed result
    #[serde(default)]
    pub expected_schema: Option<serde_json::Value>,
    /// Additional context to guide the LLM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ParseOptions>,
    /// Endpoint notified on every status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("pdf_source is required")]
    MissingSource,

    #[error("invalid PDF URL")]
    InvalidUrl,

    #[error("invalid base64-encoded PDF data")]
    InvalidBase64,

    #[error("PDF size exceeds maximum allowed size of 10MB")]
    PdfTooLarge,

    #[error("invalid PDF format")]
    NotAPdf,

    #[error("expected_schema is required")]
    MissingSchema,

    #[error("invalid JSON schema")]
    InvalidSchema,

    #[error("confidence_threshold must be between 0.0 and 1.0")]
    ConfidenceOutOfRange,

    #[error("invalid webhook URL")]
    InvalidWebhookUrl,
}

impl ParseDocumentPayload {
    /// The effective source kind, auto-detecting when the request left it out.
    pub fn kind(&self) -> SourceKind {
        self.source_kind.unwrap_or_else(|| detect_kind(&self.pdf_source))
    }

    /// Validate the payload before any state is created for it.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.pdf_source.is_empty() {
            return Err(PayloadError::MissingSource);
        }

        match self.kind() {
            SourceKind::Url => {
                let url = url::Url::parse(&self.pdf_source).map_err(|_| PayloadError::InvalidUrl)?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(PayloadError::InvalidUrl);
                }
            }
            SourceKind::Base64 => {
                self.decode_base64()?;
            }
            SourceKind::Path => {}
        }

        match &self.expected_schema {
            None | Some(serde_json::Value::Null) => return Err(PayloadError::MissingSchema),
            Some(serde_json::Value::Object(map)) if map.is_empty() => {
                return Err(PayloadError::InvalidSchema)
            }
            Some(serde_json::Value::Object(_)) => {}
            Some(_) => return Err(PayloadError::InvalidSchema),
        }

        if let Some(options) = &self.options {
            if let Some(threshold) = options.confidence_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(PayloadError::ConfidenceOutOfRange);
                }
            }
        }

        if let Some(webhook) = &self.webhook_url {
            url::Url::parse(webhook).map_err(|_| PayloadError::InvalidWebhookUrl)?;
        }

        Ok(())
    }

    /// Decode a base64 source, enforcing the size cap and the PDF magic.
    pub fn decode_base64(&self) -> Result<Vec<u8>, PayloadError> {
        let decoded = BASE64
            .decode(self.pdf_source.as_bytes())
            .map_err(|_| PayloadError::InvalidBase64)?;

        if decoded.len() > MAX_PDF_SIZE {
            return Err(PayloadError::PdfTooLarge);
        }
        if decoded.len() < 4 || &decoded[..4] != b"%PDF" {
            return Err(PayloadError::NotAPdf);
        }

        Ok(decoded)
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.options.as_ref().and_then(|o| o.max_pages)
    }
}

fn detect_kind(source: &str) -> SourceKind {
    if source.starts_with("http://") || source.starts_with("https://") {
        SourceKind::Url
    } else {
        SourceKind::Base64
    }
}

/// Payload as staged by the submission service: the original payload plus
/// the staging location chosen for the PDF, cached under `job:{id}:payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedParsePayload {
    #[serde(flatten)]
    pub payload: ParseDocumentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pdf_base64(len: usize) -> String {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(len, b' ');
        BASE64.encode(bytes)
    }

    fn payload(source: &str) -> ParseDocumentPayload {
        ParseDocumentPayload {
            pdf_source: source.to_string(),
            source_kind: None,
            expected_schema: Some(json!({"type": "object", "properties": {}})),
            description: Some("Extract invoice details.".to_string()),
            options: None,
            webhook_url: None,
        }
    }

    #[test]
    fn url_sources_are_detected_and_validated() {
        let p = payload("https://example.com/resume.pdf");
        assert_eq!(p.kind(), SourceKind::Url);
        assert!(p.validate().is_ok());

        let p = payload("ftp://example.com/resume.pdf");
        // ftp is parseable as a URL but not an accepted scheme; without an
        // http prefix it is treated as base64 and fails to decode.
        assert!(p.validate().is_err());
    }

    #[test]
    fn base64_source_must_carry_the_pdf_magic() {
        let p = payload(&BASE64.encode(b"not a pdf at all"));
        assert_eq!(p.kind(), SourceKind::Base64);
        assert_eq!(p.validate(), Err(PayloadError::NotAPdf));

        let p = payload(&pdf_base64(64));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn oversize_base64_is_rejected_with_the_exact_message() {
        let p = payload(&pdf_base64(MAX_PDF_SIZE + 1));
        let err = p.validate().unwrap_err();
        assert_eq!(err, PayloadError::PdfTooLarge);
        assert_eq!(
            err.to_string(),
            "PDF size exceeds maximum allowed size of 10MB"
        );
    }

    #[test]
    fn empty_source_is_rejected() {
        let p = payload("");
        assert_eq!(p.validate(), Err(PayloadError::MissingSource));
    }

    #[test]
    fn schema_must_be_a_non_empty_object() {
        let mut p = payload(&pdf_base64(64));
        p.expected_schema = None;
        assert_eq!(p.validate(), Err(PayloadError::MissingSchema));

        p.expected_schema = Some(json!({}));
        assert_eq!(p.validate(), Err(PayloadError::InvalidSchema));

        p.expected_schema = Some(json!("string schema"));
        assert_eq!(p.validate(), Err(PayloadError::InvalidSchema));
    }

    #[test]
    fn confidence_threshold_is_bounded() {
        let mut p = payload(&pdf_base64(64));
        p.options = Some(ParseOptions {
            confidence_threshold: Some(1.5),
            ..Default::default()
        });
        assert_eq!(p.validate(), Err(PayloadError::ConfidenceOutOfRange));

        p.options = Some(ParseOptions {
            confidence_threshold: Some(0.7),
            ..Default::default()
        });
        assert!(p.validate().is_ok());
    }

    #[test]
    fn webhook_url_must_be_absolute() {
        let mut p = payload(&pdf_base64(64));
        p.webhook_url = Some("/relative/hook".to_string());
        assert_eq!(p.validate(), Err(PayloadError::InvalidWebhookUrl));

        p.webhook_url = Some("https://hooks.example.com/parse".to_string());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn staged_payload_flattens_the_original_fields() {
        let staged = StagedParsePayload {
            payload: payload(&pdf_base64(64)),
            pdf_path: Some("/tmp/conveyor/pdf-abc.pdf".to_string()),
        };

        let value = serde_json::to_value(&staged).unwrap();
        assert!(value["pdf_source"].is_string());
        assert_eq!(value["pdf_path"], "/tmp/conveyor/pdf-abc.pdf");

        let back: StagedParsePayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.pdf_path.as_deref(), Some("/tmp/conveyor/pdf-abc.pdf"));
    }
}
