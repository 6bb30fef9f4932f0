//! Typed stage evidence read by the quality gate.
//!
//! Evidence is an optional JSON document stored next to a stage's artifacts
//! (`stages/<stage>/evidence.json`). Its `kind` tag selects the shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::Task;

use super::stage::Stage;

/// Well-known artifact id of a stage's evidence document.
pub fn evidence_artifact_id(stage: Stage) -> String {
    format!("stages/{}/evidence.json", stage.dir_name())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageEvidence {
    Plan(PlanEvidence),
    Tasks(TaskEvidence),
    Implementation(ImplementationEvidence),
    Review(ReviewEvidence),
    Verification(VerificationEvidence),
}

impl StageEvidence {
    /// The stage this kind of evidence belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StageEvidence::Plan(_) => Stage::Plan,
            StageEvidence::Tasks(_) => Stage::Tasks,
            StageEvidence::Implementation(_) => Stage::Implement,
            StageEvidence::Review(_) => Stage::Review,
            StageEvidence::Verification(_) => Stage::Verify,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanEvidence {
    #[serde(default)]
    pub components: Vec<Value>,
    #[serde(default)]
    pub risks: Vec<Value>,
    #[serde(default)]
    pub milestones: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskEvidence {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImplementationEvidence {
    pub tasks_total: u32,
    pub tasks_completed: u32,
    pub tests_total: u32,
    pub tests_passed: u32,
}

impl ImplementationEvidence {
    pub fn task_completion(&self) -> f64 {
        ratio(self.tasks_completed, self.tasks_total)
    }

    pub fn test_pass_rate(&self) -> f64 {
        ratio(self.tests_passed, self.tests_total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Blocker,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewEvidence {
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

impl ReviewEvidence {
    pub fn count(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteResult {
    pub total: u32,
    pub passed: u32,
}

impl SuiteResult {
    pub fn all_passed(&self) -> bool {
        self.passed >= self.total
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationEvidence {
    pub functional: SuiteResult,
    pub regression: SuiteResult,
}

impl VerificationEvidence {
    /// Combined pass rate; 0 when no tests were reported.
    pub fn pass_rate(&self) -> f64 {
        ratio(
            u64::from(self.functional.passed) + u64::from(self.regression.passed),
            u64::from(self.functional.total) + u64::from(self.regression.total),
        )
    }
}

fn ratio(part: impl Into<u64>, total: impl Into<u64>) -> f64 {
    let (part, total) = (part.into(), total.into());
    if total == 0 {
        0.0
    } else {
        part.min(total) as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evidence_tag_selects_shape() {
        let evidence: StageEvidence = serde_json::from_value(json!({
            "kind": "review",
            "issues": [
                {"severity": "BLOCKER", "title": "panics on empty input"},
                {"severity": "HIGH", "title": "unbounded retry"}
            ]
        }))
        .unwrap();
        match &evidence {
            StageEvidence::Review(review) => {
                assert_eq!(review.count(IssueSeverity::Blocker), 1);
                assert_eq!(review.count(IssueSeverity::High), 1);
            }
            other => panic!("expected review evidence, got {other:?}"),
        }
        assert_eq!(evidence.stage(), Stage::Review);
    }

    #[test]
    fn test_task_evidence_accepts_blocked_by_alias() {
        let evidence: StageEvidence = serde_json::from_value(json!({
            "kind": "tasks",
            "tasks": [
                {"id": "TEST-01", "title": "write failing test", "type": "test"},
                {"id": "T-F-01", "title": "implement", "blockedBy": ["TEST-01"]}
            ]
        }))
        .unwrap();
        let StageEvidence::Tasks(tasks) = evidence else {
            panic!("expected tasks evidence");
        };
        assert_eq!(tasks.tasks[1].depends_on, vec!["TEST-01".to_string()]);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed = serde_json::from_value::<StageEvidence>(json!({"kind": "deploy"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ratios_handle_zero_totals() {
        let imp = ImplementationEvidence::default();
        assert_eq!(imp.task_completion(), 0.0);
        let ver = VerificationEvidence {
            functional: SuiteResult { total: 10, passed: 10 },
            regression: SuiteResult { total: 10, passed: 9 },
        };
        assert!((ver.pass_rate() - 0.95).abs() < f64::EPSILON);
        assert!(!ver.regression.all_passed());
    }

    #[test]
    fn test_pass_rate_with_counts_beyond_u32() {
        let suite = SuiteResult {
            total: 3_000_000_000,
            passed: 3_000_000_000,
        };
        let ver = VerificationEvidence {
            functional: suite,
            regression: suite,
        };
        assert_eq!(ver.pass_rate(), 1.0);

        let ver = VerificationEvidence {
            functional: suite,
            regression: SuiteResult {
                total: u32::MAX,
                passed: 0,
            },
        };
        assert!(ver.pass_rate() < 0.5);

        let overcounted = ImplementationEvidence {
            tests_total: 4,
            tests_passed: 9,
            ..ImplementationEvidence::default()
        };
        assert_eq!(overcounted.test_pass_rate(), 1.0);
    }

    #[test]
    fn test_evidence_artifact_id() {
        assert_eq!(
            evidence_artifact_id(Stage::Tasks),
            "stages/tasks/evidence.json"
        );
    }
}
