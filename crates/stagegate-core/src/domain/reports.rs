//! Structured agent outputs: per-perspective reports and stage synthesis.
//!
//! These are the typed shapes that raw agent JSON is checked against at the
//! agent-caller boundary. Individual findings and recommendations stay as
//! free-form JSON values because their inner shape varies by perspective.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output of one perspective analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerspectiveReport {
    pub perspective_id: String,
    pub perspective_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub findings: Vec<Value>,
    #[serde(default)]
    pub recommendations: Vec<Value>,
    #[serde(default)]
    pub concerns: Vec<Value>,
}

impl PerspectiveReport {
    /// Completeness in `[0, 1]`: half for findings, half for recommendations.
    pub fn completeness(&self) -> f64 {
        let mut score = 0.0;
        if !self.findings.is_empty() {
            score += 0.5;
        }
        if !self.recommendations.is_empty() {
            score += 0.5;
        }
        score
    }
}

/// Agreement across perspectives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Consensus {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub points: Vec<String>,
}

/// A disagreement between perspectives. Unresolved when `resolution` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conflict {
    pub topic: String,
    #[serde(default)]
    pub positions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl Conflict {
    pub fn is_resolved(&self) -> bool {
        self.resolution
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Cross-perspective aggregation for one stage attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SynthesisReport {
    #[serde(default)]
    pub consensus: Consensus,
    #[serde(default)]
    pub key_insights: Vec<Value>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub action_items: Vec<Value>,
}

impl SynthesisReport {
    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }
}

/// Render a free-form report item as a single line of text.
///
/// Strings are used as-is; objects prefer a `title`/`description` pair and
/// fall back to compact JSON.
pub fn item_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let title = map
                .get("title")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str);
            let body = map
                .get("description")
                .or_else(|| map.get("detail"))
                .and_then(Value::as_str);
            match (title, body) {
                (Some(t), Some(b)) => format!("{t}: {b}"),
                (Some(t), None) => t.to_string(),
                (None, Some(b)) => b.to_string(),
                (None, None) => item.to_string(),
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completeness_halves() {
        let mut report = PerspectiveReport {
            perspective_id: "architecture".into(),
            perspective_name: "Architecture Analyst".into(),
            summary: None,
            findings: vec![],
            recommendations: vec![],
            concerns: vec![],
        };
        assert_eq!(report.completeness(), 0.0);
        report.findings.push(json!("layered design"));
        assert_eq!(report.completeness(), 0.5);
        report.recommendations.push(json!("split the gateway"));
        assert_eq!(report.completeness(), 1.0);
    }

    #[test]
    fn test_report_missing_lists_default_to_empty() {
        let report: PerspectiveReport = serde_json::from_value(json!({
            "perspective_id": "security",
            "perspective_name": "Security Reviewer",
            "findings": ["token stored in plain text"]
        }))
        .unwrap();
        assert_eq!(report.findings.len(), 1);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_report_requires_identity_fields() {
        let err = serde_json::from_value::<PerspectiveReport>(json!({"findings": []}));
        assert!(err.is_err());
    }

    #[test]
    fn test_conflict_resolution_blank_is_unresolved() {
        let synthesis: SynthesisReport = serde_json::from_value(json!({
            "consensus": {"score": 80, "points": ["a", "b"]},
            "conflicts": [
                {"topic": "storage", "resolution": "use sqlite"},
                {"topic": "auth", "resolution": "  "},
                {"topic": "cache"}
            ]
        }))
        .unwrap();
        let unresolved: Vec<_> = synthesis
            .unresolved_conflicts()
            .map(|c| c.topic.as_str())
            .collect();
        assert_eq!(unresolved, vec!["auth", "cache"]);
    }

    #[test]
    fn test_item_text_prefers_title_and_description() {
        assert_eq!(item_text(&json!("plain")), "plain");
        assert_eq!(
            item_text(&json!({"title": "Cache", "description": "add LRU"})),
            "Cache: add LRU"
        );
        assert_eq!(item_text(&json!(42)), "42");
    }
}
