//! Similarity ranking and task-specific retrieval.
//!
//! Chunks are ranked by cosine similarity between their stored embedding and
//! a query vector. [`retrieve_for_task`] adds a case-insensitive section
//! allow-list before ranking and an optional score floor after it. The
//! per-task budgets live in [`tasks::TaskRetrievalTable`].
//!
//! # Usage
//!
//! ```ignore
//! use paper_critique::retrieval::{retrieve_all, TaskRetrievalTable};
//!
//! let by_id = embeddings.into_iter().map(|e| (e.chunk_id.clone(), e)).collect();
//! let retrieved = retrieve_all(&TaskRetrievalTable::default(), &centroid, &chunks, &by_id)?;
//! for task in &retrieved {
//!     println!("{}: {} chunks", task.task, task.chunks.len());
//! }
//! ```

pub mod tasks;

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::models::{Chunk, Embedding};

pub use tasks::{retrieve_all, AnalysisTask, TaskChunks, TaskRetrievalConfig, TaskRetrievalTable};

/// Errors that can occur during retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Query and candidate vectors have different lengths
    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A vector holds NaN or an infinite component
    #[error("Vector contains non-finite values")]
    NonFiniteVector,
}

/// Result type for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// A ranked chunk. Borrowed from the caller's chunk and embedding sets.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalHit<'a> {
    pub chunk: &'a Chunk,
    pub embedding: &'a Embedding,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Filters applied by [`retrieve_for_task`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRetrievalOptions {
    /// Section substrings; a chunk qualifies if its section contains any of them
    pub sections: Vec<String>,

    /// Drop selected hits scoring below this value
    pub min_score: Option<f32>,
}

/// Compute cosine similarity between two vectors.
///
/// It ranges from -1 to 1, where 1 means the vectors point in the same
/// direction. Accumulation happens in f64.
///
/// # Returns
/// The similarity, or 0.0 when either vector has zero magnitude
///
/// # Errors
/// Returns `RetrievalError::DimensionMismatch` if the lengths differ, or
/// `RetrievalError::NonFiniteVector` if either vector holds NaN or infinity
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> RetrievalResult<f32> {
    if a.len() != b.len() {
        return Err(RetrievalError::DimensionMismatch { expected: a.len(), got: b.len() });
    }
    if !is_finite(a) || !is_finite(b) {
        return Err(RetrievalError::NonFiniteVector);
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / denominator) as f32)
}

fn is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
}

fn rank<'a, I>(
    query: &[f32],
    chunks: I,
    embeddings: &'a HashMap<String, Embedding>,
    k: usize,
) -> RetrievalResult<Vec<RetrievalHit<'a>>>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    if k == 0 {
        return Ok(Vec::new());
    }
    if !is_finite(query) {
        return Err(RetrievalError::NonFiniteVector);
    }

    let mut hits = Vec::new();
    for chunk in chunks {
        let Some(embedding) = embeddings.get(&chunk.chunk_id) else {
            continue;
        };
        let score = match cosine_similarity(query, &embedding.vector) {
            Ok(score) => score,
            Err(RetrievalError::NonFiniteVector) => {
                warn!("Skipping chunk {} with a non-finite embedding", chunk.chunk_id);
                continue;
            }
            Err(e) => return Err(e),
        };
        hits.push(RetrievalHit { chunk, embedding, score });
    }

    // Stable: equal scores keep chunk order.
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    Ok(hits)
}

/// Rank chunks by similarity to `query` and keep the best `k`.
///
/// Chunks without an entry in `embeddings` (keyed by chunk id) are skipped.
///
/// # Errors
/// Returns `RetrievalError::DimensionMismatch` if any candidate vector's
/// length differs from the query's
pub fn retrieve_top_k<'a>(
    query: &[f32],
    chunks: &'a [Chunk],
    embeddings: &'a HashMap<String, Embedding>,
    k: usize,
) -> RetrievalResult<Vec<RetrievalHit<'a>>> {
    rank(query, chunks, embeddings, k)
}

/// Whether a chunk's section contains any of the lowercase needles.
fn section_matches(chunk: &Chunk, needles: &[String]) -> bool {
    match &chunk.section {
        Some(section) => {
            let section = section.to_lowercase();
            needles.iter().any(|needle| section.contains(needle.as_str()))
        }
        None => false,
    }
}

/// Top-k retrieval restricted to matching sections, then trimmed by score.
///
/// With a non-empty `sections` list, only chunks whose section contains one
/// of the entries (case-insensitive) are ranked; unlabeled chunks are
/// excluded. `min_score` is applied after the top-k cut, so it can only
/// shrink the result.
///
/// # Errors
/// Returns `RetrievalError::DimensionMismatch` as for [`retrieve_top_k`]
pub fn retrieve_for_task<'a>(
    query: &[f32],
    chunks: &'a [Chunk],
    embeddings: &'a HashMap<String, Embedding>,
    k: usize,
    options: &TaskRetrievalOptions,
) -> RetrievalResult<Vec<RetrievalHit<'a>>> {
    let needles: Vec<String> = options
        .sections
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    let mut hits = if needles.is_empty() {
        rank(query, chunks, embeddings, k)?
    } else {
        rank(query, chunks.iter().filter(|c| section_matches(c, &needles)), embeddings, k)?
    };

    if let Some(min_score) = options.min_score {
        hits.retain(|hit| hit.score >= min_score);
    }
    Ok(hits)
}
