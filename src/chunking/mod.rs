//! Token-bounded, overlapping text chunking.
//!
//! Text is split into whitespace-delimited words, each priced by a pluggable
//! token estimator. Words accumulate into a chunk until the next word would
//! push it past `chunk_size`; the chunk is then sealed and the next one is
//! seeded with trailing words of the sealed chunk worth roughly
//! `overlap / 2` tokens. Chunk boundaries always fall between words.
//!
//! # Example
//!
//! ```ignore
//! use paper_critique::chunking::{chunk_pdf_pages, ChunkingOptions};
//!
//! let chunks = chunk_pdf_pages(&pages, "arxiv:2301.01234", &ChunkingOptions::default());
//! for chunk in &chunks {
//!     println!("{} {:?} {:?}", chunk.chunk_id, chunk.section, chunk.token_count);
//! }
//! ```

pub mod section;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::models::{Chunk, PageText};

pub use section::detect_section;

/// Default chunk budget in estimated tokens.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap budget; half of it is carried into the next chunk.
pub const DEFAULT_OVERLAP: usize = 150;

/// Token cost function applied to a single word.
pub type TokenEstimator = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Roughly four UTF-8 bytes per token, rounded up.
pub fn default_token_estimate(word: &str) -> usize {
    word.len().div_ceil(4)
}

/// Chunk size, overlap and token estimator.
#[derive(Clone)]
pub struct ChunkingOptions {
    /// Maximum estimated tokens per chunk (a single oversized word still
    /// forms its own chunk)
    pub chunk_size: usize,

    /// Overlap budget; `overlap / 2` tokens are carried forward
    pub overlap: usize,

    estimator: Option<TokenEstimator>,
}

impl ChunkingOptions {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self { chunk_size, overlap, estimator: None }
    }

    /// Replace the default estimator.
    pub fn with_estimator<F>(mut self, estimator: F) -> Self
    where
        F: Fn(&str) -> usize + Send + Sync + 'static,
    {
        self.estimator = Some(Arc::new(estimator));
        self
    }

    /// Estimated token cost of one word.
    pub fn estimate(&self, word: &str) -> usize {
        match &self.estimator {
            Some(estimator) => estimator(word),
            None => default_token_estimate(word),
        }
    }
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP)
    }
}

impl fmt::Debug for ChunkingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkingOptions")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .field("custom_estimator", &self.estimator.is_some())
            .finish()
    }
}

/// Identity and location stamped onto every chunk of one text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkMetadata<'a> {
    pub paper_id: &'a str,
    pub page_start: Option<u32>,
    pub page_end: Option<u32>,
    /// Sequence number of the first chunk produced
    pub first_index: usize,
}

impl<'a> ChunkMetadata<'a> {
    pub fn for_paper(paper_id: &'a str) -> Self {
        Self { paper_id, ..Self::default() }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page_start = Some(page);
        self.page_end = Some(page);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
    tokens: usize,
}

fn split_words(text: &str, options: &ChunkingOptions) -> Vec<Word> {
    let mut words = Vec::new();
    let mut word_start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_whitespace(), word_start) {
            (true, Some(start)) => {
                words.push(Word { start, end: idx, tokens: options.estimate(&text[start..idx]) });
                word_start = None;
            }
            (false, None) => word_start = Some(idx),
            _ => {}
        }
    }
    if let Some(start) = word_start {
        words.push(Word { start, end: text.len(), tokens: options.estimate(&text[start..]) });
    }
    words
}

/// Split `text` into overlapping chunks.
///
/// Chunk ids are `{paper_id}-chunk-{n}` with `n` counting from
/// `metadata.first_index`; an empty paper id is rendered as `paper`. Empty or
/// whitespace-only text yields no chunks.
pub fn chunk_text(text: &str, options: &ChunkingOptions, metadata: &ChunkMetadata<'_>) -> Vec<Chunk> {
    let words = split_words(text, options);
    if words.is_empty() {
        return Vec::new();
    }

    let overlap_target = options.overlap / 2;
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut current_tokens = 0;

    for (idx, word) in words.iter().enumerate() {
        if current_tokens + word.tokens > options.chunk_size && idx > start {
            chunks.push(seal_chunk(text, &words[start..idx], metadata, chunks.len()));

            // Carry trailing words forward, never the sealed chunk's first word.
            let mut next_start = idx;
            let mut carried = 0;
            while next_start > start + 1 && carried < overlap_target {
                next_start -= 1;
                carried += words[next_start].tokens;
            }
            start = next_start;
            current_tokens = carried;
        }
        current_tokens += word.tokens;
    }
    chunks.push(seal_chunk(text, &words[start..], metadata, chunks.len()));

    debug!(
        "Chunked {} words into {} chunks for '{}'",
        words.len(),
        chunks.len(),
        metadata.paper_id
    );
    chunks
}

fn seal_chunk(text: &str, words: &[Word], metadata: &ChunkMetadata<'_>, ordinal: usize) -> Chunk {
    let (first, last) = match (words.first(), words.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => (0, 0),
    };
    let body = &text[first..last];
    let id_prefix = if metadata.paper_id.is_empty() { "paper" } else { metadata.paper_id };

    Chunk {
        paper_id: metadata.paper_id.to_string(),
        chunk_id: format!("{}-chunk-{}", id_prefix, metadata.first_index + ordinal),
        text: body.to_string(),
        section: detect_section(body),
        page_start: metadata.page_start,
        page_end: metadata.page_end,
        token_count: Some(words.iter().map(|w| w.tokens).sum()),
    }
}

/// Chunk each page in order, stamping `page_start = page_end = page_number`.
///
/// Chunk numbering continues across pages so ids stay unique per paper.
pub fn chunk_pdf_pages(pages: &[PageText], paper_id: &str, options: &ChunkingOptions) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for page in pages {
        let metadata = ChunkMetadata {
            first_index: chunks.len(),
            ..ChunkMetadata::for_paper(paper_id).with_page(page.page_number)
        };
        chunks.extend(chunk_text(&page.text, options, &metadata));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn numbered_words(count: usize, width: usize) -> String {
        (0..count)
            .map(|i| format!("w{:0width$}", i, width = width))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Reassemble the word stream by dropping each chunk's overlap prefix.
    fn deoverlap(chunks: &[Chunk]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for chunk in chunks {
            for word in chunk.text.split_whitespace() {
                if seen.insert(word.to_string()) {
                    out.push(word.to_string());
                }
            }
        }
        out
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        let opts = ChunkingOptions::default();
        assert!(chunk_text("", &opts, &ChunkMetadata::for_paper("p")).is_empty());
        assert!(chunk_text("  \n\t ", &opts, &ChunkMetadata::for_paper("p")).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let opts = ChunkingOptions::default();
        let chunks = chunk_text("hello world", &opts, &ChunkMetadata::for_paper("arxiv:2301.01234"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "arxiv:2301.01234-chunk-0");
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].token_count, Some(4));
    }

    #[test]
    fn test_empty_paper_id_uses_placeholder() {
        let chunks = chunk_text("some words", &ChunkingOptions::default(), &ChunkMetadata::default());
        assert_eq!(chunks[0].chunk_id, "paper-chunk-0");
        assert_eq!(chunks[0].paper_id, "");
    }

    #[test]
    fn test_four_thousand_chars_split_with_overlap() {
        // 400 words of 9 chars plus separators: 4000 chars, 3 tokens per word
        let text = numbered_words(400, 8);
        assert_eq!(text.len() + 1, 4000);

        let opts = ChunkingOptions::new(1000, 150);
        let chunks = chunk_text(&text, &opts, &ChunkMetadata::for_paper("p"));
        assert!(chunks.len() >= 2);

        for chunk in &chunks {
            assert!(chunk.token_count.unwrap_or(0) <= 1000);
        }
        for pair in chunks.windows(2) {
            let prev: HashSet<&str> = pair[0].text.split_whitespace().collect();
            let shared = pair[1].text.split_whitespace().filter(|w| prev.contains(w)).count();
            assert!(shared > 0, "consecutive chunks should overlap");
        }
    }

    #[test]
    fn test_overlap_reaches_half_budget() {
        // 1 token per word, chunk of 10, overlap 6 -> 3 words carried
        let text = numbered_words(25, 1);
        let opts = ChunkingOptions::new(10, 6).with_estimator(|_| 1);
        let chunks = chunk_text(&text, &opts, &ChunkMetadata::for_paper("p"));

        let first: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second: Vec<&str> = chunks[1].text.split_whitespace().collect();
        assert_eq!(first.len(), 10);
        assert_eq!(&second[..3], &first[7..]);
    }

    #[test]
    fn test_zero_overlap_has_no_shared_words() {
        let text = numbered_words(50, 2);
        let opts = ChunkingOptions::new(10, 0).with_estimator(|_| 1);
        let chunks = chunk_text(&text, &opts, &ChunkMetadata::for_paper("p"));
        assert_eq!(chunks.len(), 5);
        let total: usize = chunks.iter().map(|c| c.text.split_whitespace().count()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_chunking_is_lossless() {
        let text = numbered_words(737, 3);
        let opts = ChunkingOptions::new(120, 40);
        let chunks = chunk_text(&text, &opts, &ChunkMetadata::for_paper("p"));
        let original: Vec<String> = text.split_whitespace().map(String::from).collect();
        assert_eq!(deoverlap(&chunks), original);
    }

    #[test]
    fn test_token_count_matches_estimator() {
        let text = "Short a longerword ünïcödé mixed words of varying lengths ".repeat(60);
        let opts = ChunkingOptions::new(80, 20);
        let chunks = chunk_text(&text, &opts, &ChunkMetadata::for_paper("p"));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let expected: usize = chunk.text.split_whitespace().map(default_token_estimate).sum();
            assert_eq!(chunk.token_count, Some(expected));
        }
    }

    #[test]
    fn test_oversized_word_forms_own_chunk() {
        let opts = ChunkingOptions::new(2, 2);
        let chunks = chunk_text("tiny enormousword tiny", &opts, &ChunkMetadata::for_paper("p"));
        assert!(chunks.iter().any(|c| c.text == "enormousword"));
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn test_chunk_text_preserves_line_breaks_for_sections() {
        let text = "1. Introduction\nTransformers dominate sequence modeling.";
        let chunks = chunk_text(text, &ChunkingOptions::default(), &ChunkMetadata::for_paper("p"));
        assert_eq!(chunks[0].section.as_deref(), Some("introduction"));
        assert!(chunks[0].text.contains('\n'));
    }

    #[test]
    fn test_chunk_pdf_pages_stamps_pages_and_unique_ids() {
        let pages = vec![
            PageText::new(1, numbered_words(30, 2)),
            PageText::new(2, ""),
            PageText::new(3, "Conclusion\nWe are done."),
        ];
        let opts = ChunkingOptions::new(10, 0).with_estimator(|_| 1);
        let chunks = chunk_pdf_pages(&pages, "p", &opts);

        assert_eq!(chunks.len(), 4);
        assert!(chunks[..3].iter().all(|c| c.page_start == Some(1) && c.page_end == Some(1)));
        assert_eq!(chunks[3].page_start, Some(3));
        assert_eq!(chunks[3].section.as_deref(), Some("conclusion"));

        let ids: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids.len(), chunks.len());
        assert_eq!(chunks[3].chunk_id, "p-chunk-3");
    }
}
