//! Analysis prompt construction.

use serde_json::Value;

use super::response::AnalysisBounds;
use crate::models::{now_millis, AnalysisOptions, Chunk, PaperMetadata, PrivacyMode};
use crate::retrieval::TaskChunks;

/// Paper details rendered into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPrompt {
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub paper_id: Option<String>,
}

impl PaperPrompt {
    pub fn new(title: impl Into<String>, authors: Vec<String>) -> Self {
        Self { title: title.into(), authors, abstract_text: None, paper_id: None }
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = Some(abstract_text.into());
        self
    }

    pub fn with_paper_id(mut self, paper_id: impl Into<String>) -> Self {
        self.paper_id = Some(paper_id.into());
        self
    }

    pub fn from_metadata(metadata: &PaperMetadata) -> Self {
        Self {
            title: metadata.title.clone(),
            authors: metadata.authors.clone(),
            abstract_text: metadata.abstract_content().map(String::from),
            paper_id: Some(metadata.paper_id.to_string()),
        }
    }

    /// Source label derived from the id prefix.
    fn source_label(&self) -> &'static str {
        match self.paper_id.as_deref() {
            Some(id) if id.starts_with("arxiv:") => "arxiv",
            Some(id) if id.starts_with("openreview:") => "openreview",
            _ => "pdf",
        }
    }
}

/// Backend identity and cardinality pre-filled into the JSON template.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTarget {
    pub provider: String,
    pub model: String,
    pub bounds: AnalysisBounds,
    pub timestamp: i64,
}

impl PromptTarget {
    pub fn new(provider: &str, model: &str, bounds: AnalysisBounds) -> Self {
        Self { provider: provider.to_string(), model: model.to_string(), bounds, timestamp: now_millis() }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn json_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn render_chunk(chunk: &Chunk, excerpt_chars: usize) -> String {
    let mut location = Vec::with_capacity(2);
    if let Some(section) = &chunk.section {
        location.push(format!("Section: {}", section));
    }
    if let Some(pages) = chunk.page_label() {
        location.push(format!("Page: {}", pages));
    }
    let prefix = if location.is_empty() { String::new() } else { format!("[{}] ", location.join(", ")) };
    let excerpt: String = chunk.text.chars().take(excerpt_chars).collect();
    format!("[{}] {}{}...", chunk.chunk_id, prefix, excerpt)
}

fn render_evidence(retrieved: &[TaskChunks], privacy: PrivacyMode) -> String {
    if privacy == PrivacyMode::AbstractOnly {
        return "Only the abstract is available for this paper; no full-text excerpts are shared.".to_string();
    }
    let excerpt_chars = privacy.excerpt_chars();
    retrieved
        .iter()
        .map(|task| {
            let lines: Vec<String> = task.chunks.iter().map(|c| render_chunk(c, excerpt_chars)).collect();
            format!("## {}\n{}", task.task, lines.join("\n\n"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render the user prompt for one analysis request.
///
/// Tasks appear in the order given. Under [`PrivacyMode::AbstractOnly`] no
/// chunk text is included at all.
pub fn build_analysis_prompt(
    paper: &PaperPrompt,
    retrieved: &[TaskChunks],
    options: &AnalysisOptions,
    target: &PromptTarget,
) -> String {
    let range = format!("{}-{}", target.bounds.min_items, target.bounds.max_items);
    let abstract_line = match paper.abstract_text.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(text) => format!("Abstract: {}", text),
        None => String::new(),
    };
    let authors = Value::from(paper.authors.clone()).to_string();
    let paper_id = paper.paper_id.as_deref().unwrap_or("paper-id");

    format!(
        r#"Analyze this research paper and generate a structured critique.

Paper:
Title: {title}
Authors: {author_list}
{abstract_line}

Retrieved Evidence Chunks:
{evidence}

Instructions:
{tone}
Focus on quality over quantity. Generate only the most important and impactful items ({range} per section). Be selective and prioritize the most significant insights.

Generate a JSON object with the following structure:
{{
  "paper": {{
    "title": {title_json},
    "authors": {authors},
    "source": "{source}",
    "id": {id_json}
  }},
  "summaryBullets": ["bullet 1", "bullet 2", ...], // {range} bullets
  "keyClaims": [
    {{
      "claim": "claim text",
      "evidence": [{{"chunkId": "...", "quote": "...", "location": {{...}}}}]
    }}
  ], // {range} claims
  "questions": [
    {{
      "question": "question text",
      "evidence": [{{"chunkId": "...", "quote": "...", "location": {{...}}}}]
    }}
  ], // {range} questions
  "missingAblations": [
    {{
      "description": "description",
      "suggestedExperiment": "experiment",
      "evidence": [{{"chunkId": "...", "quote": "...", "location": {{...}}}}]
    }}
  ], // {range} items
  "potentialIssues": [
    {{
      "issue": "issue description",
      "severity": "Low|Med|High",
      "confidence": 0.0-1.0,
      "evidence": [{{"chunkId": "...", "quote": "...", "location": {{...}}}}],
      "suggestedCheck": "what to check"
    }}
  ], // {range} items
  "replicationChecklist": ["item 1", "item 2", ...], // {range} items
  "nextWeekTests": ["test 1", "test 2", ...], // {range} items
  "modelMeta": {{
    "provider": {provider_json},
    "model": {model_json},
    "timestamp": {timestamp}
  }}
}}

IMPORTANT: Every critique item MUST include at least one evidence span with chunkId, quote, and location."#,
        title = paper.title,
        author_list = paper.authors.join(", "),
        abstract_line = abstract_line,
        evidence = render_evidence(retrieved, options.privacy_mode),
        tone = options.tone.instruction(),
        range = range,
        title_json = json_string(&paper.title),
        authors = authors,
        source = paper.source_label(),
        id_json = json_string(paper_id),
        provider_json = json_string(&target.provider),
        model_json = json_string(&target.model),
        timestamp = target.timestamp,
    )
}
