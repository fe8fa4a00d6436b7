//! PDF text extraction behind a mockable seam.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read PDF file: {0}")]
    Io(String),

    #[error("failed to parse PDF: {0}")]
    Parse(String),

    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Extracts plain text from a staged PDF.
///
/// An interface so the extractor can be swapped for a remote parser service
/// or a test double.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path, max_pages: Option<u32>) -> Result<String, ExtractError>;
}

/// Local extractor over `lopdf`.
///
/// Parsing is CPU-bound and runs on the blocking pool.
#[derive(Debug, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, path: &Path, max_pages: Option<u32>) -> Result<String, ExtractError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || extract_text_blocking(&path, max_pages))
            .await
            .map_err(|e| ExtractError::Task(e.to_string()))?
    }
}

fn extract_text_blocking(path: &Path, max_pages: Option<u32>) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load(path).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let mut pages: Vec<u32> = doc.get_pages().keys().cloned().collect();
    pages.sort();
    if let Some(max) = max_pages {
        if max > 0 {
            pages.truncate(max as usize);
        }
    }

    let mut text = String::new();
    for page in &pages {
        let page_text = doc.extract_text(&[*page]).unwrap_or_default();
        text.push_str(&page_text);
        if !page_text.ends_with('\n') && !page_text.is_empty() {
            text.push('\n');
        }
    }

    tracing::debug!(
        chars = text.len(),
        pages = pages.len(),
        "extracted text from PDF"
    );

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a minimal PDF, one page per text.
    fn build_test_pdf(page_texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut page_ids = Vec::new();
        for text in page_texts {
            let content = format!(
                "BT /F1 12 Tf 100 700 Td ({}) Tj ET",
                text.replace('\\', "\\\\")
                    .replace('(', "\\(")
                    .replace(')', "\\)")
            );
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_texts.len() as i64),
        });

        for page_id in &page_ids {
            if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*page_id) {
                dict.set("Parent", pages_id);
            }
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn write_test_pdf(page_texts: &[&str]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("conveyor-pdf-{}.pdf", uuid::Uuid::now_v7()));
        std::fs::write(&path, build_test_pdf(page_texts)).unwrap();
        path
    }

    #[tokio::test]
    async fn extracts_text_from_a_single_page() {
        let path = write_test_pdf(&["Invoice 42 from ACME"]);

        let extractor = PdfTextExtractor::new();
        let text = extractor.extract(&path, None).await.unwrap();
        assert!(text.contains("Invoice 42 from ACME"));

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn max_pages_limits_extraction() {
        let path = write_test_pdf(&["page one text", "page two text"]);

        let extractor = PdfTextExtractor::new();
        let limited = extractor.extract(&path, Some(1)).await.unwrap();
        assert!(limited.contains("page one text"));
        assert!(!limited.contains("page two text"));

        let full = extractor.extract(&path, None).await.unwrap();
        assert!(full.contains("page two text"));

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let extractor = PdfTextExtractor::new();
        let result = extractor
            .extract(Path::new("/nonexistent/doc.pdf"), None)
            .await;
        assert!(result.is_err());
    }
}
