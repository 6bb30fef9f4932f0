//! Markdown renderings of perspective and synthesis reports.

use std::fmt::Write;

use serde_json::Value;

use crate::domain::{item_text, PerspectiveReport, Stage, SynthesisReport};

fn push_list(out: &mut String, heading: &str, items: &[Value]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {heading}\n");
    for item in items {
        let _ = writeln!(out, "- {}", item_text(item));
    }
}

pub fn render_perspective(stage: Stage, report: &PerspectiveReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} · {}", stage.title(), report.perspective_name);
    let _ = writeln!(out, "\n_Perspective: `{}`_", report.perspective_id);
    if let Some(summary) = report.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        let _ = writeln!(out, "\n## Summary\n\n{summary}");
    }
    push_list(&mut out, "Findings", &report.findings);
    push_list(&mut out, "Recommendations", &report.recommendations);
    push_list(&mut out, "Concerns", &report.concerns);
    out
}

pub fn render_synthesis(stage: Stage, report: &SynthesisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} · Synthesis", stage.title());
    let _ = writeln!(
        out,
        "\n## Consensus ({:.0}/100)\n",
        report.consensus.score
    );
    if report.consensus.points.is_empty() {
        let _ = writeln!(out, "_No consensus points._");
    }
    for point in &report.consensus.points {
        let _ = writeln!(out, "- {point}");
    }
    push_list(&mut out, "Key Insights", &report.key_insights);

    if !report.conflicts.is_empty() {
        let _ = writeln!(out, "\n## Conflicts\n");
        for conflict in &report.conflicts {
            match conflict.resolution.as_deref().filter(|_| conflict.is_resolved()) {
                Some(resolution) => {
                    let _ = writeln!(out, "- **{}**: resolved by {resolution}", conflict.topic);
                }
                None => {
                    let _ = writeln!(out, "- **{}**: unresolved", conflict.topic);
                }
            }
        }
    }
    push_list(&mut out, "Action Items", &report.action_items);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Conflict, Consensus};
    use serde_json::json;

    #[test]
    fn test_render_perspective_sections() {
        let report = PerspectiveReport {
            perspective_id: "performance".into(),
            perspective_name: "Performance Reviewer".into(),
            summary: Some("Mostly fine".into()),
            findings: vec![json!({"title": "N+1 query", "description": "in list view"})],
            recommendations: vec![json!("batch the lookups")],
            concerns: vec![],
        };
        let md = render_perspective(Stage::Review, &report);
        assert!(md.starts_with("# Review · Performance Reviewer"));
        assert!(md.contains("## Summary\n\nMostly fine"));
        assert!(md.contains("- N+1 query: in list view"));
        assert!(md.contains("- batch the lookups"));
        assert!(!md.contains("## Concerns"));
    }

    #[test]
    fn test_render_synthesis_marks_unresolved() {
        let report = SynthesisReport {
            consensus: Consensus {
                score: 72.4,
                points: vec!["use a queue".into()],
            },
            conflicts: vec![
                Conflict {
                    topic: "retry budget".into(),
                    positions: vec![],
                    resolution: Some("cap at 3".into()),
                },
                Conflict {
                    topic: "storage".into(),
                    positions: vec![],
                    resolution: None,
                },
            ],
            ..SynthesisReport::default()
        };
        let md = render_synthesis(Stage::Research, &report);
        assert!(md.contains("## Consensus (72/100)"));
        assert!(md.contains("**retry budget**: resolved by cap at 3"));
        assert!(md.contains("**storage**: unresolved"));
    }
}
