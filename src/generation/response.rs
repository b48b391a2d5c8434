//! Parsing and validation of backend replies.
//!
//! Replies are parsed strictly first. Only when that fails is a single
//! fenced ```` ```json ```` block extracted and parsed; nothing else is
//! repaired. The parsed object must then satisfy [`validate_analysis`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{GenerationError, GenerationResult};
use crate::models::{Analysis, EvidenceSpan};

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*\})\s*```").expect("static pattern compiles"));

/// Allowed item count for every list in an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisBounds {
    pub min_items: usize,
    pub max_items: usize,
}

impl Default for AnalysisBounds {
    fn default() -> Self {
        Self { min_items: 2, max_items: 3 }
    }
}

/// Parse and validate raw backend output.
///
/// # Errors
/// - `GenerationError::InvalidResponse` if neither the whole reply nor a
///   fenced block in it is JSON
/// - `GenerationError::SchemaValidation` if the JSON is not a valid analysis
pub fn parse_analysis_response(raw: &str, bounds: &AnalysisBounds) -> GenerationResult<Analysis> {
    let value: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(strict_err) => {
            let block = FENCED_JSON
                .captures(raw)
                .and_then(|caps| caps.get(1))
                .ok_or_else(|| GenerationError::InvalidResponse(strict_err.to_string()))?;
            debug!("Reply was not bare JSON, parsing fenced block");
            serde_json::from_str(block.as_str()).map_err(|e| GenerationError::InvalidResponse(e.to_string()))?
        }
    };

    let analysis: Analysis =
        serde_json::from_value(value).map_err(|e| GenerationError::SchemaValidation(vec![e.to_string()]))?;
    validate_analysis(&analysis, bounds)?;
    Ok(analysis)
}

fn check_evidence(violations: &mut Vec<String>, path: String, evidence: &[EvidenceSpan]) {
    if evidence.is_empty() {
        violations.push(format!("{}: at least one evidence span required", path));
    }
    for (j, span) in evidence.iter().enumerate() {
        if span.chunk_id.trim().is_empty() {
            violations.push(format!("{}.evidence[{}]: chunkId must not be empty", path, j));
        }
    }
}

/// Check cardinality, confidence range and evidence presence.
///
/// # Errors
/// Returns `GenerationError::SchemaValidation` listing every violation found
pub fn validate_analysis(analysis: &Analysis, bounds: &AnalysisBounds) -> GenerationResult<()> {
    let mut violations = Vec::new();

    let lists = [
        ("summaryBullets", analysis.summary_bullets.len()),
        ("keyClaims", analysis.key_claims.len()),
        ("questions", analysis.questions.len()),
        ("missingAblations", analysis.missing_ablations.len()),
        ("potentialIssues", analysis.potential_issues.len()),
        ("replicationChecklist", analysis.replication_checklist.len()),
        ("nextWeekTests", analysis.next_week_tests.len()),
    ];
    for (name, len) in lists {
        if len < bounds.min_items || len > bounds.max_items {
            violations.push(format!(
                "{}: expected {}-{} items, got {}",
                name, bounds.min_items, bounds.max_items, len
            ));
        }
    }

    for (i, claim) in analysis.key_claims.iter().enumerate() {
        check_evidence(&mut violations, format!("keyClaims[{}]", i), &claim.evidence);
    }
    for (i, question) in analysis.questions.iter().enumerate() {
        check_evidence(&mut violations, format!("questions[{}]", i), &question.evidence);
    }
    for (i, ablation) in analysis.missing_ablations.iter().enumerate() {
        check_evidence(&mut violations, format!("missingAblations[{}]", i), &ablation.evidence);
    }
    for (i, issue) in analysis.potential_issues.iter().enumerate() {
        if !issue.confidence.is_finite() || !(0.0..=1.0).contains(&issue.confidence) {
            violations.push(format!("potentialIssues[{}].confidence: {} is outside [0, 1]", i, issue.confidence));
        }
        check_evidence(&mut violations, format!("potentialIssues[{}]", i), &issue.evidence);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(GenerationError::SchemaValidation(violations))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn valid_analysis_json() -> Value {
        let evidence = json!([{"chunkId": "arxiv:2301.01234-chunk-0", "quote": "We claim things.", "location": {"section": "abstract", "pageStart": 1}}]);
        json!({
            "paper": {"title": "A Paper", "authors": ["Ada"], "source": "arxiv", "id": "arxiv:2301.01234"},
            "summaryBullets": ["one", "two"],
            "keyClaims": [
                {"claim": "c1", "evidence": evidence},
                {"claim": "c2", "evidence": evidence}
            ],
            "questions": [
                {"question": "q1", "evidence": evidence},
                {"question": "q2", "evidence": evidence}
            ],
            "missingAblations": [
                {"description": "d1", "suggestedExperiment": "e1", "evidence": evidence},
                {"description": "d2", "suggestedExperiment": "e2", "evidence": evidence}
            ],
            "potentialIssues": [
                {"issue": "i1", "severity": "High", "confidence": 0.8, "evidence": evidence, "suggestedCheck": "check"},
                {"issue": "i2", "severity": "Low", "confidence": 0.3, "evidence": evidence}
            ],
            "replicationChecklist": ["r1", "r2"],
            "nextWeekTests": ["t1", "t2", "t3"],
            "modelMeta": {"provider": "openai", "model": "gpt-5.2", "timestamp": 1700000000000i64}
        })
    }

    fn bounds() -> AnalysisBounds {
        AnalysisBounds::default()
    }

    #[test]
    fn test_strict_json_parses() {
        let analysis = parse_analysis_response(&valid_analysis_json().to_string(), &bounds()).unwrap();
        assert_eq!(analysis.analysis_version, "1.0.0");
        assert_eq!(analysis.potential_issues[0].suggested_check.as_deref(), Some("check"));
        assert_eq!(analysis.next_week_tests.len(), 3);
    }

    #[test]
    fn test_fenced_block_is_extracted() {
        let raw = format!("Here is the critique:\n```json\n{}\n```\nThanks!", valid_analysis_json());
        let analysis = parse_analysis_response(&raw, &bounds()).unwrap();
        assert_eq!(analysis.paper.id, "arxiv:2301.01234");

        let bare_fence = format!("```\n{}\n```", valid_analysis_json());
        assert!(parse_analysis_response(&bare_fence, &bounds()).is_ok());
    }

    #[test]
    fn test_non_json_is_invalid_response() {
        let result = parse_analysis_response("I cannot help with that.", &bounds());
        assert!(matches!(result, Err(GenerationError::InvalidResponse(_))));

        let broken_fence = "```json\n{\"paper\": \n```";
        assert!(matches!(parse_analysis_response(broken_fence, &bounds()), Err(GenerationError::InvalidResponse(_))));
    }

    #[test]
    fn test_empty_evidence_fails_validation() {
        let mut value = valid_analysis_json();
        value["keyClaims"][0]["evidence"] = json!([]);
        match parse_analysis_response(&value.to_string(), &bounds()) {
            Err(GenerationError::SchemaValidation(violations)) => {
                assert_eq!(violations, vec!["keyClaims[0]: at least one evidence span required".to_string()]);
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_confidence_out_of_range_fails_validation() {
        let mut value = valid_analysis_json();
        value["potentialIssues"][1]["confidence"] = json!(1.5);
        let result = parse_analysis_response(&value.to_string(), &bounds());
        assert!(matches!(result, Err(GenerationError::SchemaValidation(v)) if v[0].contains("potentialIssues[1].confidence")));
    }

    #[test]
    fn test_unknown_severity_fails_schema() {
        let mut value = valid_analysis_json();
        value["potentialIssues"][0]["severity"] = json!("Critical");
        assert!(matches!(
            parse_analysis_response(&value.to_string(), &bounds()),
            Err(GenerationError::SchemaValidation(_))
        ));
    }

    #[test]
    fn test_missing_field_fails_schema() {
        let mut value = valid_analysis_json();
        value.as_object_mut().unwrap().remove("nextWeekTests");
        assert!(matches!(
            parse_analysis_response(&value.to_string(), &bounds()),
            Err(GenerationError::SchemaValidation(_))
        ));
    }

    #[test]
    fn test_cardinality_violations_are_all_reported() {
        let mut value = valid_analysis_json();
        value["summaryBullets"] = json!(["only one"]);
        value["nextWeekTests"] = json!(["a", "b", "c", "d"]);
        value["questions"][0]["evidence"][0]["chunkId"] = json!("");
        match parse_analysis_response(&value.to_string(), &bounds()) {
            Err(GenerationError::SchemaValidation(violations)) => {
                assert_eq!(violations.len(), 3);
                assert!(violations[0].starts_with("summaryBullets"));
                assert!(violations[1].starts_with("nextWeekTests"));
                assert_eq!(violations[2], "questions[0].evidence[0]: chunkId must not be empty");
            }
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_looser_bounds_accept_more_items() {
        let mut value = valid_analysis_json();
        value["nextWeekTests"] = json!(["a", "b", "c", "d"]);
        let loose = AnalysisBounds { min_items: 1, max_items: 5 };
        assert!(parse_analysis_response(&value.to_string(), &loose).is_ok());
    }
}
