//! Heuristic section tagging for chunks.
//!
//! Labels are best-effort: a chunk that starts mid-section gets no label, and
//! a line that merely looks like a heading can produce a wrong one. Callers
//! treat `None` as a normal outcome.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of leading lines examined for a heading.
pub const SECTION_SCAN_LINES: usize = 10;

const MAX_LABEL_CHARS: usize = 50;
const MAX_HEADING_WORDS: usize = 6;

static KEYWORD_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(abstract|introduction|related\s+work|background|methodology|methods?|approach|experiments?|experimental\s+setup|evaluation|results?|ablations?|limitations?|discussion|conclusions?|future\s+work|references|bibliography|appendix|appendices|acknowledge?ments?)\b",
    )
    .expect("static pattern compiles")
});

// "1. Introduction", "3.2 Ablation Study", "IV. RESULTS"
static NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+(?:\.\d+)*|[IVX]+)\.?\s+([A-Z][A-Za-z\-]*(?:\s+[A-Za-z][A-Za-z\-]*){0,5})\s*$")
        .expect("static pattern compiles")
});

static ALL_CAPS_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z\s&\-]{2,49}$").expect("static pattern compiles"));

static COLON_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z][A-Za-z\-]*(?:\s+[A-Za-z][A-Za-z\-]*){0,5}):").expect("static pattern compiles")
});

/// Synonym needles mapped to canonical section labels, checked in order.
const CANONICAL_SECTIONS: &[(&[&str], &str)] = &[
    (&["abstract"], "abstract"),
    (&["intro"], "introduction"),
    (&["related work", "background", "prior work"], "related work"),
    (&["ablation"], "ablations"),
    (&["experiment"], "experiments"),
    (&["evaluation"], "evaluation"),
    (&["result"], "results"),
    (&["method", "approach"], "methods"),
    (&["limitation"], "limitations"),
    (&["future work"], "future work"),
    (&["discussion"], "discussion"),
    (&["conclusion"], "conclusion"),
    (&["reference", "bibliography"], "references"),
    (&["appendix", "appendices", "supplementary"], "appendix"),
    (&["acknowledg"], "acknowledgments"),
];

/// Guess the section a chunk belongs to from its leading lines.
///
/// Patterns are tried per line in this order: known section keywords,
/// numbered headings, short ALL-CAPS lines, then colon-terminated
/// capitalized phrases. The first hit wins and is normalized with
/// [`normalize_section`].
pub fn detect_section(text: &str) -> Option<String> {
    for line in text.lines().take(SECTION_SCAN_LINES) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(label) = match_heading(line) {
            return Some(normalize_section(&label));
        }
    }
    None
}

fn match_heading(line: &str) -> Option<String> {
    if let Some(caps) = KEYWORD_HEADING.captures(line) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = NUMBERED_HEADING.captures(line) {
        return Some(caps[1].to_string());
    }
    if ALL_CAPS_HEADING.is_match(line) && line.split_whitespace().count() <= MAX_HEADING_WORDS {
        return Some(line.to_string());
    }
    if let Some(caps) = COLON_HEADING.captures(line) {
        return Some(caps[1].to_string());
    }
    None
}

/// Map a raw heading onto the canonical label set.
///
/// Unrecognized headings are lowercased, whitespace-collapsed and capped at
/// 50 characters.
pub fn normalize_section(raw: &str) -> String {
    let label = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    for (needles, canonical) in CANONICAL_SECTIONS {
        if needles.iter().any(|needle| label.contains(needle)) {
            return (*canonical).to_string();
        }
    }
    label.chars().take(MAX_LABEL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_heading() {
        assert_eq!(detect_section("Introduction\nDeep nets are...").as_deref(), Some("introduction"));
        assert_eq!(detect_section("RELATED WORK\nPrior art").as_deref(), Some("related work"));
        assert_eq!(detect_section("Methodology\nWe train").as_deref(), Some("methods"));
        assert_eq!(detect_section("Acknowledgements\nThanks").as_deref(), Some("acknowledgments"));
    }

    #[test]
    fn test_numbered_heading() {
        assert_eq!(detect_section("4. Experiments\nWe evaluate").as_deref(), Some("experiments"));
        assert_eq!(detect_section("3.2 Ablation Study\nRemoving").as_deref(), Some("ablations"));
        assert_eq!(detect_section("5 Threats to Validity\n...").as_deref(), Some("threats to validity"));
    }

    #[test]
    fn test_all_caps_heading() {
        assert_eq!(detect_section("EXPERIMENTAL RESULTS\nTable 1").as_deref(), Some("experiments"));
        assert_eq!(detect_section("DATASET CONSTRUCTION\nWe crawl").as_deref(), Some("dataset construction"));
    }

    #[test]
    fn test_colon_heading() {
        assert_eq!(detect_section("Limitations: our study only").as_deref(), Some("limitations"));
        assert_eq!(detect_section("Training Details: we use").as_deref(), Some("training details"));
    }

    #[test]
    fn test_heading_after_leading_lines() {
        let text = "the previous paragraph ends here.\n\n2 Related Work\nMany authors";
        assert_eq!(detect_section(text).as_deref(), Some("related work"));
    }

    #[test]
    fn test_heading_beyond_scan_window_ignored() {
        let mut text = String::new();
        for _ in 0..SECTION_SCAN_LINES {
            text.push_str("plain lowercase prose line\n");
        }
        text.push_str("Conclusion\n");
        assert_eq!(detect_section(&text), None);
    }

    #[test]
    fn test_no_heading() {
        assert_eq!(detect_section("we show that the model improves accuracy."), None);
        assert_eq!(detect_section(""), None);
    }

    #[test]
    fn test_normalize_truncates_unknown_labels() {
        let long = "A".repeat(80);
        assert_eq!(normalize_section(&long).chars().count(), MAX_LABEL_CHARS);
        assert_eq!(normalize_section("  Results   and  Discussion "), "results");
    }
}
