//! Structured critique produced by a generation backend.
//!
//! These types mirror the JSON object the backend is instructed to emit.
//! Deserialization checks shape and enum membership; cardinality, numeric
//! ranges and evidence requirements are checked separately by
//! [`crate::generation::response::validate_analysis`].

use serde::{Deserialize, Serialize};

use super::PaperId;

/// Version stamped on analyses when the backend omits one.
pub const ANALYSIS_VERSION: &str = "1.0.0";

fn default_analysis_version() -> String {
    ANALYSIS_VERSION.to_string()
}

/// Where in the paper a quoted excerpt comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,
}

/// A quoted excerpt justifying a critique item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSpan {
    pub chunk_id: String,
    pub quote: String,
    pub location: EvidenceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyClaim {
    pub claim: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissingAblation {
    pub description: String,
    pub suggested_experiment: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceSpan>,
}

/// Severity of a potential issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Low,
    Med,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Med => "Med",
            Severity::High => "High",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PotentialIssue {
    pub issue: String,
    pub severity: Severity,
    /// Backend's confidence in the issue, within `[0, 1]`
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<EvidenceSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_check: Option<String>,
}

/// Identity block echoed back by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPaper {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub source: String,
    /// Free-form here; the pipeline overwrites it with the requested id.
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelMeta {
    pub provider: String,
    pub model: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Evidence-grounded critique of one paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub paper: AnalysisPaper,
    pub summary_bullets: Vec<String>,
    pub key_claims: Vec<KeyClaim>,
    pub questions: Vec<Question>,
    pub missing_ablations: Vec<MissingAblation>,
    pub potential_issues: Vec<PotentialIssue>,
    pub replication_checklist: Vec<String>,
    pub next_week_tests: Vec<String>,
    pub model_meta: ModelMeta,
    #[serde(default = "default_analysis_version")]
    pub analysis_version: String,
}

/// Persisted analysis, keyed by `(paper_id, analysis_version)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub paper_id: PaperId,
    pub analysis_version: String,
    pub analysis: Analysis,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analysis_version_defaults() {
        let value = json!({
            "paper": {"title": "T", "authors": [], "source": "pdf", "id": "x"},
            "summaryBullets": [],
            "keyClaims": [],
            "questions": [],
            "missingAblations": [],
            "potentialIssues": [],
            "replicationChecklist": [],
            "nextWeekTests": [],
            "modelMeta": {"provider": "openai", "model": "m", "timestamp": 1}
        });
        let analysis: Analysis = serde_json::from_value(value).unwrap();
        assert_eq!(analysis.analysis_version, ANALYSIS_VERSION);
    }

    #[test]
    fn test_severity_rejects_unknown_label() {
        let result: Result<Severity, _> = serde_json::from_value(json!("Critical"));
        assert!(result.is_err());
        let sev: Severity = serde_json::from_value(json!("Med")).unwrap();
        assert_eq!(sev, Severity::Med);
    }

    #[test]
    fn test_missing_evidence_deserializes_empty() {
        let q: Question = serde_json::from_value(json!({"question": "Why?"})).unwrap();
        assert!(q.evidence.is_empty());
    }
}
