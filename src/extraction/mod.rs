//! Page text extraction.
//!
//! An extractor turns a document location into per-page text. The pipeline
//! holds an optional extractor handle; without one, papers are analyzed from
//! their abstract only.

#[cfg(feature = "pdf")]
pub mod pdf;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::PageText;

#[cfg(feature = "pdf")]
pub use pdf::PdfUrlExtractor;

/// Errors that can occur during page extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Document could not be downloaded or read
    #[error("Failed to fetch document: {0}")]
    Fetch(String),

    /// Document bytes could not be parsed
    #[error("Failed to parse document: {0}")]
    Parse(String),

    /// Document parsed but yielded no text
    #[error("No text pages extracted from {0}")]
    NoPages(String),
}

/// Result type for extraction operations.
pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Document-level info found alongside the pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    /// Non-empty pages in page order
    pub pages: Vec<PageText>,
    pub metadata: Option<DocumentMetadata>,
}

/// Trait for page text extractors.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Extract per-page text from the document at `url`.
    ///
    /// # Errors
    /// - `ExtractionError::Fetch` if the document cannot be retrieved
    /// - `ExtractionError::Parse` if it is not a readable document
    /// - `ExtractionError::NoPages` if no page has any text
    async fn extract(&self, url: &str) -> ExtractionResult<ExtractedDocument>;

    /// Whether the extractor finished initialization and can be used.
    fn is_ready(&self) -> bool {
        true
    }
}
