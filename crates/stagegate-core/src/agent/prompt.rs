//! Prompt assembly and JSON extraction for text-based agents.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::{AgentRequest, ExpectedSchema};

const AGENT_RULES: &str = "\
# Agent Instructions

You are an analysis agent. Think, analyse and return structured results.

## Rules
1. Do not write files or create tasks.
2. Only use read-only tools (Read, Glob, Grep, Bash, WebFetch, WebSearch).
3. Be thorough but concise.";

const OUTPUT_RULES: &str = "\
## Output Format

Return your final answer as valid JSON.
- Start the final answer with ```json and end it with ```.
- Do not put any text outside the JSON block in the final answer.";

fn schema_hint(schema: ExpectedSchema) -> &'static str {
    match schema {
        ExpectedSchema::PerspectiveReport => {
            r#"{"perspective_id": "...", "perspective_name": "...", "summary": "...", "findings": [], "recommendations": [], "concerns": []}"#
        }
        ExpectedSchema::SynthesisReport => {
            r#"{"consensus": {"score": 0, "points": []}, "key_insights": [], "conflicts": [{"topic": "...", "positions": [], "resolution": "..."}], "action_items": []}"#
        }
    }
}

/// Render the full prompt sent to a text agent.
pub fn build_prompt(request: &AgentRequest) -> String {
    let mut parts = vec![AGENT_RULES.to_string()];

    parts.push(format!("\n## Role\n{} ({})\n{}", request.agent_name, request.agent_id, request.role));

    if !request.focus_areas.is_empty() {
        let focus: Vec<String> = request.focus_areas.iter().map(|f| format!("- {f}")).collect();
        parts.push(format!("\n## Focus Areas\n{}", focus.join("\n")));
    }

    if !request.context.is_null() {
        let context = serde_json::to_string_pretty(&request.context)
            .unwrap_or_else(|_| request.context.to_string());
        parts.push(format!("\n## Context\n```json\n{context}\n```"));
    }

    parts.push(format!("\n## Task\n{}", request.task));
    parts.push(format!("\n{OUTPUT_RULES}\n\nExpected shape:\n{}", schema_hint(request.expected_schema)));

    parts.join("\n")
}

fn patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("json fence pattern"),
            Regex::new(r"```\s*([\s\S]*?)\s*```").expect("plain fence pattern"),
            Regex::new(r"(\{[\s\S]*\})").expect("bare object pattern"),
        ]
    })
}

/// Pull the final JSON value out of free-form agent output.
///
/// Tries a ```json fence, then any fence, then the outermost `{...}` span.
/// Within each pattern the last match wins; a match that does not parse
/// falls through to the next pattern.
pub fn extract_json(output: &str) -> Option<Value> {
    for pattern in patterns() {
        let last = pattern
            .captures_iter(output)
            .filter_map(|c| c.get(1))
            .last();
        if let Some(m) = last {
            if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> AgentRequest {
        AgentRequest {
            agent_id: "security".into(),
            agent_name: "Security Reviewer".into(),
            model: "sonnet".into(),
            role: "Audits the implementation for vulnerabilities".into(),
            focus_areas: vec!["Injection".into(), "Access control".into()],
            task: "Review the rate limiter".into(),
            context: json!({"workflow_id": "wf-1", "stage_id": "REVIEW"}),
            expected_schema: ExpectedSchema::PerspectiveReport,
        }
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let prompt = build_prompt(&request());
        let role = prompt.find("## Role").unwrap();
        let focus = prompt.find("## Focus Areas").unwrap();
        let context = prompt.find("## Context").unwrap();
        let task = prompt.find("## Task").unwrap();
        let output = prompt.find("## Output Format").unwrap();
        assert!(role < focus && focus < context && context < task && task < output);
        assert!(prompt.contains("- Access control"));
        assert!(prompt.contains("\"stage_id\": \"REVIEW\""));
        assert!(prompt.contains("perspective_id"));
    }

    #[test]
    fn test_extract_last_json_fence() {
        let out = "draft:\n```json\n{\"a\": 1}\n```\nfinal:\n```json\n{\"a\": 2}\n```\n";
        assert_eq!(extract_json(out), Some(json!({"a": 2})));
    }

    #[test]
    fn test_extract_plain_fence() {
        let out = "here\n```\n{\"ok\": true}\n```";
        assert_eq!(extract_json(out), Some(json!({"ok": true})));
    }

    #[test]
    fn test_extract_bare_object() {
        let out = "Result: {\"findings\": [\"x\"], \"nested\": {\"k\": 1}} done";
        assert_eq!(
            extract_json(out),
            Some(json!({"findings": ["x"], "nested": {"k": 1}}))
        );
    }

    #[test]
    fn test_invalid_fence_falls_through_to_bare_object() {
        let out = "```json\nnot json\n```\n{\"v\": 3}";
        assert_eq!(extract_json(out), Some(json!({"v": 3})));
    }

    #[test]
    fn test_no_json_returns_none() {
        assert_eq!(extract_json("I could not complete the analysis."), None);
    }
}
