//! Storage layer abstraction and implementations.
//!
//! This module defines the interface for persisting the paper library:
//! metadata, chunks, embeddings, analyses and user-recorded links. Two
//! backends are provided:
//!
//! - [`memory::MemoryStore`]: process-local, used by tests and one-shot runs
//! - [`sqlite::SqliteStore`]: a single SQLite file
//!
//! Deleting a paper cascades to everything recorded for it.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Chunk, Embedding, PaperId, PaperLink, PaperMetadata, StoredAnalysis};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or migration error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Library listing filter.
///
/// All set conditions must hold. The default matches every paper.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaperFilter {
    pub starred_only: bool,
    pub analyzed_only: bool,
    /// Case-insensitive exact tag match
    pub tag: Option<String>,
}

impl PaperFilter {
    pub fn matches(&self, paper: &PaperMetadata) -> bool {
        if self.starred_only && !paper.starred {
            return false;
        }
        if self.analyzed_only && !paper.analyzed {
            return false;
        }
        match &self.tag {
            Some(tag) => paper.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
            None => true,
        }
    }
}

/// Position of a chunk within its paper, parsed from the `-chunk-{n}` suffix.
///
/// Chunk ids that do not follow the convention sort after numbered ones.
pub(crate) fn chunk_ordinal(chunk_id: &str) -> u64 {
    chunk_id
        .rsplit_once("-chunk-")
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(u64::MAX)
}

/// Trait for paper library backends.
///
/// Bulk writes are upserts: saving a chunk or embedding with an existing
/// `(paper_id, chunk_id)` replaces it, and an analysis replaces any earlier
/// one with the same `(paper_id, analysis_version)`.
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Insert or replace a paper's metadata.
    ///
    /// # Errors
    /// Returns `StorageError` if the write fails
    async fn save_paper(&self, paper: &PaperMetadata) -> StorageResult<()>;

    /// Look up a paper by id.
    ///
    /// # Returns
    /// The paper if present, `None` otherwise
    ///
    /// # Errors
    /// Returns `StorageError` if the read fails
    async fn get_paper(&self, paper_id: &PaperId) -> StorageResult<Option<PaperMetadata>>;

    /// List papers matching `filter`, most recently opened first.
    ///
    /// # Errors
    /// Returns `StorageError` if the read fails
    async fn list_papers(&self, filter: &PaperFilter) -> StorageResult<Vec<PaperMetadata>>;

    /// Upsert chunks by `(paper_id, chunk_id)`.
    async fn save_chunks(&self, chunks: &[Chunk]) -> StorageResult<()>;

    /// A paper's chunks in chunk order.
    async fn get_chunks(&self, paper_id: &PaperId) -> StorageResult<Vec<Chunk>>;

    /// Remove a paper's chunks together with their embeddings.
    async fn delete_chunks(&self, paper_id: &PaperId) -> StorageResult<()>;

    /// Upsert embeddings by `(paper_id, chunk_id)`.
    async fn save_embeddings(&self, embeddings: &[Embedding]) -> StorageResult<()>;

    async fn get_embeddings(&self, paper_id: &PaperId) -> StorageResult<Vec<Embedding>>;

    /// Upsert by `(paper_id, analysis_version)`.
    async fn save_analysis(&self, analysis: &StoredAnalysis) -> StorageResult<()>;

    async fn get_analysis(&self, paper_id: &PaperId, version: &str) -> StorageResult<Option<StoredAnalysis>>;

    async fn save_link(&self, link: &PaperLink) -> StorageResult<()>;

    /// Links where the paper is either endpoint, newest first.
    async fn get_links(&self, paper_id: &PaperId) -> StorageResult<Vec<PaperLink>>;

    /// Delete a paper and everything recorded for it.
    ///
    /// # Returns
    /// `true` if the paper existed
    async fn delete_paper(&self, paper_id: &PaperId) -> StorageResult<bool>;

    /// Remove every record from the store.
    async fn clear_all(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_filter() {
        let mut paper = PaperMetadata::new(PaperId::parse("arxiv:2301.01234").unwrap(), "T", "u");
        assert!(PaperFilter::default().matches(&paper));

        let starred = PaperFilter { starred_only: true, ..Default::default() };
        assert!(!starred.matches(&paper));
        paper.starred = true;
        assert!(starred.matches(&paper));

        paper.tags = vec!["Vision".into()];
        let tagged = PaperFilter { tag: Some("vision".into()), ..Default::default() };
        assert!(tagged.matches(&paper));
        let analyzed = PaperFilter { analyzed_only: true, ..tagged };
        assert!(!analyzed.matches(&paper));
    }

    #[test]
    fn test_chunk_ordinal() {
        assert_eq!(chunk_ordinal("arxiv:2301.01234-chunk-12"), 12);
        assert!(chunk_ordinal("arxiv:2301.01234-chunk-2") < chunk_ordinal("arxiv:2301.01234-chunk-10"));
        assert_eq!(chunk_ordinal("custom"), u64::MAX);
    }
}
