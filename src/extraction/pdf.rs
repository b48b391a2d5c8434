//! PDF page extraction backed by lopdf.
//!
//! Documents are fetched over HTTP(S) or read from a local path, parsed on the
//! blocking pool, and split into per-page text. Pages whose text is blank are
//! dropped; page numbers of the remaining pages are preserved.

use std::time::Duration;

use async_trait::async_trait;
use lopdf::{Document, Object};
use reqwest::Client;
use tracing::{debug, warn};

use super::{DocumentMetadata, ExtractedDocument, ExtractionError, ExtractionResult, PageExtractor};
use crate::models::PageText;

/// Extractor handle for PDF URLs and paths.
///
/// Created once through [`PdfUrlExtractor::init`] and shared with the
/// pipeline.
#[derive(Debug, Clone)]
pub struct PdfUrlExtractor {
    client: Client,
}

impl PdfUrlExtractor {
    /// Build the HTTP client used for downloads.
    ///
    /// # Errors
    /// Returns `ExtractionError::Fetch` if the client cannot be built
    pub fn init(timeout: Duration) -> ExtractionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("paper-critique/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtractionError::Fetch(format!("failed to build HTTP client: {}", e)))?;
        debug!("PDF extractor initialized with {:?} timeout", timeout);
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> ExtractionResult<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ExtractionError::Fetch(format!("{}: {}", url, e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ExtractionError::Fetch(format!("{} returned {}", url, status)));
            }
            let bytes = response.bytes().await.map_err(|e| ExtractionError::Fetch(format!("{}: {}", url, e)))?;
            Ok(bytes.to_vec())
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            tokio::fs::read(path)
                .await
                .map_err(|e| ExtractionError::Fetch(format!("{}: {}", path, e)))
        }
    }
}

#[async_trait]
impl PageExtractor for PdfUrlExtractor {
    async fn extract(&self, url: &str) -> ExtractionResult<ExtractedDocument> {
        let bytes = self.fetch(url).await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);

        let label = url.to_string();
        tokio::task::spawn_blocking(move || extract_pages(&bytes, &label))
            .await
            .map_err(|e| ExtractionError::Parse(format!("extraction task failed: {}", e)))?
    }
}

/// Parse PDF bytes into non-empty pages plus document info.
///
/// `label` names the document in error messages.
///
/// # Errors
/// - `ExtractionError::Parse` if the bytes are not a PDF
/// - `ExtractionError::NoPages` if every page is blank
pub fn extract_pages(bytes: &[u8], label: &str) -> ExtractionResult<ExtractedDocument> {
    let doc = Document::load_mem(bytes).map_err(|e| ExtractionError::Parse(format!("{}: {}", label, e)))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys().copied() {
        match doc.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => pages.push(PageText::new(page_number, text)),
            Ok(_) => {}
            Err(e) => warn!("Skipping page {} of {}: {}", page_number, label, e),
        }
    }

    if pages.is_empty() {
        return Err(ExtractionError::NoPages(label.to_string()));
    }
    Ok(ExtractedDocument { pages, metadata: document_metadata(&doc) })
}

fn document_metadata(doc: &Document) -> Option<DocumentMetadata> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let field = |key: &[u8]| {
        info.get(key)
            .ok()
            .and_then(|value| value.as_str().ok())
            .map(decode_pdf_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let metadata = DocumentMetadata { title: field(b"Title"), author: field(b"Author") };
    if metadata == DocumentMetadata::default() {
        None
    } else {
        Some(metadata)
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise byte-wise.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    fn build_pdf(page_texts: &[&str], title: Option<&str>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in page_texts {
            let operations = if text.is_empty() {
                Vec::new()
            } else {
                vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ]
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(title) = title {
            let info_id = doc.add_object(dictionary! { "Title" => Object::string_literal(title) });
            doc.trailer.set("Info", info_id);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_blank_pages_are_dropped() {
        let bytes = build_pdf(&["Introduction to the method", "", "Results table"], Some("A Test Paper"));
        let extracted = extract_pages(&bytes, "test.pdf").unwrap();

        let numbers: Vec<u32> = extracted.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert!(extracted.pages[0].text.contains("Introduction"));
        assert_eq!(extracted.metadata.and_then(|m| m.title).as_deref(), Some("A Test Paper"));
    }

    #[test]
    fn test_all_blank_is_no_pages() {
        let bytes = build_pdf(&["", ""], None);
        assert!(matches!(extract_pages(&bytes, "blank.pdf"), Err(ExtractionError::NoPages(_))));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(extract_pages(b"not a pdf", "junk"), Err(ExtractionError::Parse(_))));
    }

    #[test]
    fn test_decode_utf16_title() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42]), "AB");
        assert_eq!(decode_pdf_string(b"Plain"), "Plain");
    }

    #[tokio::test]
    async fn test_local_path_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, build_pdf(&["Abstract text here"], None)).unwrap();

        let extractor = PdfUrlExtractor::init(Duration::from_secs(5)).unwrap();
        assert!(extractor.is_ready());
        let extracted = extractor.extract(path.to_str().unwrap()).await.unwrap();
        assert_eq!(extracted.pages.len(), 1);
        assert!(extracted.metadata.is_none());

        let missing = extractor.extract("/definitely/not/here.pdf").await;
        assert!(matches!(missing, Err(ExtractionError::Fetch(_))));
    }
}
