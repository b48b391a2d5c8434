//! Per-task retrieval budgets.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{retrieve_for_task, RetrievalResult, TaskRetrievalOptions};
use crate::models::{Chunk, Embedding, ModelError};

/// The critique categories evidence is gathered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalysisTask {
    MissingAblations,
    PotentialIssues,
    Questions,
    KeyClaims,
}

impl AnalysisTask {
    pub const ALL: [AnalysisTask; 4] = [
        AnalysisTask::MissingAblations,
        AnalysisTask::PotentialIssues,
        AnalysisTask::Questions,
        AnalysisTask::KeyClaims,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisTask::MissingAblations => "missingAblations",
            AnalysisTask::PotentialIssues => "potentialIssues",
            AnalysisTask::Questions => "questions",
            AnalysisTask::KeyClaims => "keyClaims",
        }
    }
}

impl fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisTask {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisTask::ALL
            .into_iter()
            .find(|task| task.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownValue { field: "task", value: s.to_string() })
    }
}

/// How much evidence one task gets, and from where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRetrievalConfig {
    pub task: AnalysisTask,
    pub k: usize,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl TaskRetrievalConfig {
    pub fn new(task: AnalysisTask, k: usize, sections: &[&str]) -> Self {
        Self { task, k, sections: sections.iter().map(|s| s.to_string()).collect(), min_score: None }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn options(&self) -> TaskRetrievalOptions {
        TaskRetrievalOptions { sections: self.sections.clone(), min_score: self.min_score }
    }
}

/// Ordered task table. Order is preserved into the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskRetrievalTable {
    entries: Vec<TaskRetrievalConfig>,
}

impl Default for TaskRetrievalTable {
    fn default() -> Self {
        Self {
            entries: vec![
                TaskRetrievalConfig::new(
                    AnalysisTask::MissingAblations,
                    12,
                    &["experiments", "ablations", "results", "appendix"],
                ),
                TaskRetrievalConfig::new(
                    AnalysisTask::PotentialIssues,
                    14,
                    &["evaluation", "data", "metrics", "limitations"],
                ),
                TaskRetrievalConfig::new(AnalysisTask::Questions, 10, &["limitations", "discussion", "future work"]),
                TaskRetrievalConfig::new(AnalysisTask::KeyClaims, 8, &["abstract", "introduction", "conclusion"]),
            ],
        }
    }
}

impl TaskRetrievalTable {
    /// Add an entry, replacing any existing entry for the same task in place.
    pub fn with_task(mut self, config: TaskRetrievalConfig) -> Self {
        match self.entries.iter_mut().find(|e| e.task == config.task) {
            Some(existing) => *existing = config,
            None => self.entries.push(config),
        }
        self
    }

    pub fn get(&self, task: AnalysisTask) -> Option<&TaskRetrievalConfig> {
        self.entries.iter().find(|e| e.task == task)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRetrievalConfig> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Chunks selected for one task, in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChunks {
    pub task: AnalysisTask,
    pub chunks: Vec<Chunk>,
}

/// Run every table entry against the same query vector.
///
/// # Errors
/// Returns the first `RetrievalError` hit by any task
pub fn retrieve_all(
    table: &TaskRetrievalTable,
    query: &[f32],
    chunks: &[Chunk],
    embeddings: &HashMap<String, Embedding>,
) -> RetrievalResult<Vec<TaskChunks>> {
    let mut retrieved = Vec::with_capacity(table.len());
    for config in table.iter() {
        let hits = retrieve_for_task(query, chunks, embeddings, config.k, &config.options())?;
        debug!("Task {} retrieved {} chunks", config.task, hits.len());
        retrieved.push(TaskChunks { task: config.task, chunks: hits.into_iter().map(|h| h.chunk.clone()).collect() });
    }
    Ok(retrieved)
}
