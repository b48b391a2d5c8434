//! Core data models for the paper critique pipeline.
//!
//! This module contains the records that flow between the chunker, the
//! embedding providers, the retriever and the generation backends: paper
//! identity and library metadata, text chunks, stored embeddings and the
//! options that shape an analysis run. The structured critique itself lives
//! in [`analysis`].
//!
//! Records serialize with camelCase field names so that stored rows and the
//! JSON contract with generation backends share one vocabulary.

pub mod analysis;

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use analysis::{
    Analysis, AnalysisPaper, EvidenceLocation, EvidenceSpan, KeyClaim, MissingAblation, ModelMeta,
    PotentialIssue, Question, Severity, StoredAnalysis, ANALYSIS_VERSION,
};

/// Errors raised while constructing or parsing model values.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Identifier does not match any accepted paper id format
    #[error("Invalid paper id: {0}")]
    InvalidPaperId(String),

    /// Unrecognized enum label (tone, privacy mode, source, relation)
    #[error("Unknown value '{value}' for {field}")]
    UnknownValue { field: &'static str, value: String },
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

static ARXIV_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^arxiv:[0-9]{4}\.[0-9]{4,5}(v[0-9]+)?$").expect("static pattern compiles"));
static OPENREVIEW_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^openreview:[a-zA-Z0-9_-]+$").expect("static pattern compiles"));
static URLHASH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^urlhash:[a-f0-9]{64}$").expect("static pattern compiles"));
static ARXIV_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arxiv\.org/(?:abs|pdf)/([0-9]{4}\.[0-9]{4,5}(?:v[0-9]+)?)").expect("static pattern compiles")
});
static OPENREVIEW_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"openreview\.net/(?:forum|pdf)\?id=([a-zA-Z0-9_-]+)").expect("static pattern compiles")
});

/// Validated paper identifier.
///
/// Three formats are accepted:
/// - `arxiv:2301.01234` (optionally with a `v2` version suffix)
/// - `openreview:<forum id>`
/// - `urlhash:<sha256 hex of the source url>` for arbitrary PDFs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId(String);

impl PaperId {
    /// Parse and validate a paper id string.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidPaperId` if the value matches none of the
    /// accepted formats
    pub fn parse(value: &str) -> ModelResult<Self> {
        let value = value.trim();
        if ARXIV_ID.is_match(value) || OPENREVIEW_ID.is_match(value) || URLHASH_ID.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ModelError::InvalidPaperId(value.to_string()))
        }
    }

    /// Derive a paper id from a hosting-site URL.
    ///
    /// arXiv abstract/PDF links and OpenReview forum links map to their native
    /// ids; any other URL falls back to a content-independent URL hash.
    pub fn from_url(url: &str) -> Self {
        if let Some(caps) = ARXIV_URL.captures(url) {
            return Self(format!("arxiv:{}", &caps[1]));
        }
        if let Some(caps) = OPENREVIEW_URL.captures(url) {
            return Self(format!("openreview:{}", &caps[1]));
        }
        Self::for_url_hash(url)
    }

    /// Build a `urlhash:` id from the SHA-256 of the given URL.
    pub fn for_url_hash(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self(format!("urlhash:{}", hex::encode(digest)))
    }

    /// The source family implied by the id prefix.
    pub fn source(&self) -> PaperSource {
        if self.0.starts_with("arxiv:") {
            PaperSource::Arxiv
        } else if self.0.starts_with("openreview:") {
            PaperSource::Openreview
        } else {
            PaperSource::Pdf
        }
    }

    /// The portion after the `prefix:` separator.
    pub fn local_part(&self) -> &str {
        self.0.split_once(':').map(|(_, rest)| rest).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PaperId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PaperId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PaperId> for String {
    fn from(id: PaperId) -> Self {
        id.0
    }
}

/// Where a paper was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSource {
    Arxiv,
    Openreview,
    Pdf,
    Manual,
}

impl PaperSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperSource::Arxiv => "arxiv",
            PaperSource::Openreview => "openreview",
            PaperSource::Pdf => "pdf",
            PaperSource::Manual => "manual",
        }
    }

    /// Whether papers from this source usually have a fetchable PDF.
    pub fn has_pdf(&self) -> bool {
        !matches!(self, PaperSource::Manual)
    }
}

impl FromStr for PaperSource {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arxiv" => Ok(PaperSource::Arxiv),
            "openreview" => Ok(PaperSource::Openreview),
            "pdf" => Ok(PaperSource::Pdf),
            "manual" => Ok(PaperSource::Manual),
            other => Err(ModelError::UnknownValue { field: "source", value: other.to_string() }),
        }
    }
}

/// Library record for a paper the user has opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaperMetadata {
    pub paper_id: PaperId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub source: PaperSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    pub source_url: String,
    pub first_seen_at: i64,
    pub last_opened_at: i64,
    #[serde(default)]
    pub open_count: u32,
    #[serde(default)]
    pub saved: bool,
    #[serde(default)]
    pub analyzed: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PaperMetadata {
    /// Create a fresh library record first seen now.
    pub fn new(paper_id: PaperId, title: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            source: paper_id.source(),
            paper_id,
            title: title.into(),
            authors: Vec::new(),
            abstract_text: None,
            venue: None,
            year: None,
            pdf_url: None,
            source_url: source_url.into(),
            first_seen_at: now,
            last_opened_at: now,
            open_count: 1,
            saved: false,
            analyzed: false,
            starred: false,
            tags: Vec::new(),
        }
    }

    /// Build a record from a hosting-site URL, deriving the id and PDF link.
    ///
    /// arXiv and OpenReview papers get their canonical PDF URL; any other URL
    /// is assumed to point at a PDF directly.
    pub fn from_url(url: &str, title: impl Into<String>, authors: Vec<String>) -> Self {
        let paper_id = PaperId::from_url(url);
        let pdf_url = match paper_id.source() {
            PaperSource::Arxiv => format!("https://arxiv.org/pdf/{}.pdf", paper_id.local_part()),
            PaperSource::Openreview => format!("https://openreview.net/pdf?id={}", paper_id.local_part()),
            _ => url.to_string(),
        };
        let mut paper = Self::new(paper_id, title, url);
        paper.authors = authors;
        paper.pdf_url = Some(pdf_url);
        paper
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = Some(abstract_text.into());
        self
    }

    /// Record another visit to this paper.
    pub fn touch(&mut self) {
        self.open_count = self.open_count.saturating_add(1);
        self.last_opened_at = now_millis();
    }

    /// Abstract text if present and non-blank.
    pub fn abstract_content(&self) -> Option<&str> {
        self.abstract_text.as_deref().filter(|a| !a.trim().is_empty())
    }
}

/// Extracted text of a single document page (1-based numbering).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self { page_number, text: text.into() }
    }
}

/// A bounded span of a paper's text; the unit of retrieval and citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub paper_id: String,
    pub chunk_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl Chunk {
    /// Human-readable page label such as `3` or `3-4`.
    pub fn page_label(&self) -> Option<String> {
        let start = self.page_start?;
        match self.page_end {
            Some(end) if end != start => Some(format!("{}-{}", start, end)),
            _ => Some(start.to_string()),
        }
    }
}

/// Stored vector for one chunk under one embedding model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    pub paper_id: String,
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: i64,
}

/// Reviewer stance requested from the generation backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Critical,
    #[default]
    Balanced,
    Experimental,
}

impl Tone {
    /// Instruction line appended to the analysis prompt.
    pub fn instruction(&self) -> &'static str {
        match self {
            Tone::Critical => "Be more critical and skeptical. Focus on potential weaknesses.",
            Tone::Balanced => "Provide balanced, constructive feedback.",
            Tone::Experimental => "Focus on experimental rigor and reproducibility.",
        }
    }
}

impl FromStr for Tone {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Tone::Critical),
            "balanced" => Ok(Tone::Balanced),
            "experimental" => Ok(Tone::Experimental),
            other => Err(ModelError::UnknownValue { field: "tone", value: other.to_string() }),
        }
    }
}

/// How much paper text may be sent to the generation backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivacyMode {
    /// Only title, authors and abstract
    AbstractOnly,
    /// Short excerpts of retrieved chunks
    Snippets,
    /// Full retrieved excerpts
    #[default]
    FullText,
}

impl PrivacyMode {
    /// Maximum characters of each chunk included in the prompt.
    pub fn excerpt_chars(&self) -> usize {
        match self {
            PrivacyMode::AbstractOnly => 0,
            PrivacyMode::Snippets => 200,
            PrivacyMode::FullText => 500,
        }
    }
}

impl FromStr for PrivacyMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abstract-only" => Ok(PrivacyMode::AbstractOnly),
            "snippets" => Ok(PrivacyMode::Snippets),
            "full-text" => Ok(PrivacyMode::FullText),
            other => Err(ModelError::UnknownValue { field: "privacy mode", value: other.to_string() }),
        }
    }
}

/// Options consumed by prompt construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub tone: Tone,
    pub privacy_mode: PrivacyMode,
}

/// Kind of relationship between two papers in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationType {
    SimilarTheme,
    MethodAnalogy,
    Contrast,
    CitationMention,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::SimilarTheme => "similar-theme",
            RelationType::MethodAnalogy => "method-analogy",
            RelationType::Contrast => "contrast",
            RelationType::CitationMention => "citation-mention",
        }
    }
}

impl FromStr for RelationType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "similar-theme" => Ok(RelationType::SimilarTheme),
            "method-analogy" => Ok(RelationType::MethodAnalogy),
            "contrast" => Ok(RelationType::Contrast),
            "citation-mention" => Ok(RelationType::CitationMention),
            other => Err(ModelError::UnknownValue { field: "relation", value: other.to_string() }),
        }
    }
}

/// A user-recorded relation between two papers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaperLink {
    pub from_paper_id: PaperId,
    pub to_paper_id: PaperId,
    pub relation_type: RelationType,
    pub rationale: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_id_accepts_known_formats() {
        assert!(PaperId::parse("arxiv:2301.01234").is_ok());
        assert!(PaperId::parse("arxiv:2301.01234v3").is_ok());
        assert!(PaperId::parse("openreview:abc_DEF-12").is_ok());
        let hash = "a".repeat(64);
        assert!(PaperId::parse(&format!("urlhash:{}", hash)).is_ok());
    }

    #[test]
    fn test_paper_id_rejects_malformed() {
        assert!(PaperId::parse("arxiv:123.45").is_err());
        assert!(PaperId::parse("doi:10.1000/xyz").is_err());
        assert!(PaperId::parse("urlhash:XYZ").is_err());
        assert!(PaperId::parse("").is_err());
    }

    #[test]
    fn test_paper_id_from_url() {
        assert_eq!(PaperId::from_url("https://arxiv.org/abs/2301.01234v2").as_str(), "arxiv:2301.01234v2");
        assert_eq!(PaperId::from_url("https://arxiv.org/pdf/2301.01234.pdf").as_str(), "arxiv:2301.01234");
        assert_eq!(
            PaperId::from_url("https://openreview.net/forum?id=Xy_z-9").as_str(),
            "openreview:Xy_z-9"
        );

        let hashed = PaperId::from_url("https://example.org/paper.pdf");
        assert_eq!(hashed.source(), PaperSource::Pdf);
        assert!(PaperId::parse(hashed.as_str()).is_ok());
        assert_eq!(hashed, PaperId::for_url_hash("https://example.org/paper.pdf"));
    }

    #[test]
    fn test_url_hash_is_sha256_hex() {
        // sha256("abc")
        assert_eq!(
            PaperId::for_url_hash("abc").as_str(),
            "urlhash:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_metadata_from_url_derives_pdf_link() {
        let paper = PaperMetadata::from_url("https://arxiv.org/abs/2301.01234", "T", vec!["A".into()]);
        assert_eq!(paper.source, PaperSource::Arxiv);
        assert_eq!(paper.pdf_url.as_deref(), Some("https://arxiv.org/pdf/2301.01234.pdf"));

        let paper = PaperMetadata::from_url("https://openreview.net/forum?id=abc", "T", vec![]);
        assert_eq!(paper.pdf_url.as_deref(), Some("https://openreview.net/pdf?id=abc"));
    }

    #[test]
    fn test_touch_increments_open_count() {
        let mut paper = PaperMetadata::new(PaperId::for_url_hash("x"), "Title", "x");
        let first = paper.last_opened_at;
        paper.touch();
        assert_eq!(paper.open_count, 2);
        assert!(paper.last_opened_at >= first);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let paper = PaperMetadata::new(PaperId::for_url_hash("x"), "Title", "x").with_abstract("Abs");
        let json = serde_json::to_value(&paper).unwrap();
        assert_eq!(json["abstract"], "Abs");
        assert!(json.get("openCount").is_some());
        assert!(json.get("paperId").is_some());
    }

    #[test]
    fn test_chunk_page_label() {
        let mut chunk = Chunk {
            paper_id: "p".into(),
            chunk_id: "p-chunk-0".into(),
            text: "t".into(),
            section: None,
            page_start: Some(3),
            page_end: Some(3),
            token_count: None,
        };
        assert_eq!(chunk.page_label().as_deref(), Some("3"));
        chunk.page_end = Some(4);
        assert_eq!(chunk.page_label().as_deref(), Some("3-4"));
        chunk.page_start = None;
        assert_eq!(chunk.page_label(), None);
    }

    #[test]
    fn test_option_enums_parse() {
        assert_eq!("critical".parse::<Tone>().unwrap(), Tone::Critical);
        assert_eq!("abstract-only".parse::<PrivacyMode>().unwrap(), PrivacyMode::AbstractOnly);
        assert!("loud".parse::<Tone>().is_err());
        assert_eq!(AnalysisOptions::default().tone, Tone::Balanced);
        assert_eq!(AnalysisOptions::default().privacy_mode, PrivacyMode::FullText);
    }
}
