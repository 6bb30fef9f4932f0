//! Stage quality gates.
//!
//! Turns a stage's [`StageResult`] (plus optional typed evidence) into a
//! [`GateCheckResult`]. Every stage checks two generic criteria; each stage
//! then adds its own. The score starts from the stage's quality score and
//! loses 10 points per failed criterion. A gate passes only when the score
//! meets the stage threshold and no criterion failed.
//!
//! Evaluation is pure: the same inputs always yield the same verdict.

use std::collections::BTreeMap;

use crate::dag::{tdd_violations, validate_dag};
use crate::domain::{
    GateCheckResult, IssueSeverity, PipelineError, Result, Stage, StageEvidence, StageResult,
};

/// Points deducted from the score for each failed criterion.
pub const CRITERION_PENALTY: f64 = 10.0;

pub const MIN_CONSENSUS_POINTS: usize = 2;
pub const MIN_TASK_COMPLETION: f64 = 0.9;
pub const MIN_TEST_PASS_RATE: f64 = 0.95;
pub const MAX_HIGH_ISSUES: usize = 2;
pub const MIN_VERIFY_PASS_RATE: f64 = 0.95;

// ---------------------------------------------------------------------------
// Evidence input
// ---------------------------------------------------------------------------

/// What the controller found at a stage's evidence location.
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceState {
    Absent,
    Present(StageEvidence),
    /// The document existed but could not be parsed.
    Malformed(String),
}

impl EvidenceState {
    /// Parse a raw evidence document.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<StageEvidence>(raw) {
            Ok(evidence) => EvidenceState::Present(evidence),
            Err(e) => EvidenceState::Malformed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Stage-aware quality gate with per-stage thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityGate {
    thresholds: BTreeMap<Stage, f64>,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            thresholds: Stage::ALL
                .into_iter()
                .map(|s| (s, s.default_threshold()))
                .collect(),
        }
    }
}

impl QualityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override one stage's threshold. Must lie within `[0, 100]`.
    pub fn with_threshold(mut self, stage: Stage, threshold: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "threshold for {stage} must be within 0-100, got {threshold}"
            )));
        }
        self.thresholds.insert(stage, threshold);
        Ok(self)
    }

    pub fn threshold(&self, stage: Stage) -> f64 {
        self.thresholds
            .get(&stage)
            .copied()
            .unwrap_or_else(|| stage.default_threshold())
    }

    /// Evaluate `result` for `stage`.
    pub fn check(
        &self,
        stage: Stage,
        result: &StageResult,
        evidence: &EvidenceState,
    ) -> GateCheckResult {
        let mut checks = Checks::default();

        checks.record(
            "stage_success",
            result.success,
            format!(
                "{}/{} perspectives succeeded",
                result.perspectives_succeeded, result.perspectives_total
            ),
        );
        checks.record(
            "has_outputs",
            !result.outputs.is_empty(),
            format!("{} outputs recorded", result.outputs.len()),
        );

        let evidence = match evidence {
            EvidenceState::Absent => None,
            EvidenceState::Present(ev) if ev.stage() == stage => Some(ev),
            EvidenceState::Present(ev) => {
                checks.record(
                    "evidence_well_formed",
                    false,
                    format!("expected {stage} evidence, found {} evidence", ev.stage()),
                );
                None
            }
            EvidenceState::Malformed(reason) => {
                checks.record("evidence_well_formed", false, reason.clone());
                None
            }
        };

        check_stage(stage, result, evidence, &mut checks);

        let threshold = self.threshold(stage);
        let failed_criteria: Vec<String> = checks
            .criteria
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.clone())
            .collect();
        let base = result.quality_score.unwrap_or(0.0);
        let score = (base - CRITERION_PENALTY * failed_criteria.len() as f64).max(0.0);
        let passed = score >= threshold && failed_criteria.is_empty();

        GateCheckResult {
            stage,
            passed,
            score,
            threshold,
            criteria: checks.criteria,
            failed_criteria,
            details: checks.details,
        }
    }
}

#[derive(Default)]
struct Checks {
    criteria: BTreeMap<String, bool>,
    details: BTreeMap<String, String>,
}

impl Checks {
    fn record(&mut self, name: &str, ok: bool, detail: String) {
        self.criteria.insert(name.to_string(), ok);
        self.details.insert(name.to_string(), detail);
    }
}

fn check_stage(
    stage: Stage,
    result: &StageResult,
    evidence: Option<&StageEvidence>,
    checks: &mut Checks,
) {
    match stage {
        Stage::Research => {
            checks.record(
                "has_synthesis",
                result.synthesis.is_some(),
                "cross-perspective synthesis produced".to_string(),
            );
            if let Some(synthesis) = &result.synthesis {
                let points = synthesis.consensus.points.len();
                checks.record(
                    "consensus_count",
                    points >= MIN_CONSENSUS_POINTS,
                    format!("{points} consensus points (need {MIN_CONSENSUS_POINTS})"),
                );
                let unresolved: Vec<&str> = synthesis
                    .unresolved_conflicts()
                    .map(|c| c.topic.as_str())
                    .collect();
                checks.record(
                    "no_critical_conflicts",
                    unresolved.is_empty(),
                    format!("unresolved conflicts: [{}]", unresolved.join(", ")),
                );
            }
        }
        Stage::Plan => {
            if let Some(StageEvidence::Plan(plan)) = evidence {
                checks.record(
                    "has_components",
                    !plan.components.is_empty(),
                    format!("{} components", plan.components.len()),
                );
                checks.record(
                    "has_risks",
                    !plan.risks.is_empty(),
                    format!("{} risks", plan.risks.len()),
                );
                checks.record(
                    "has_milestones",
                    !plan.milestones.is_empty(),
                    format!("{} milestones", plan.milestones.len()),
                );
            }
        }
        Stage::Tasks => {
            if let Some(StageEvidence::Tasks(tasks)) = evidence {
                let report = validate_dag(&tasks.tasks);
                checks.record(
                    "dag_valid",
                    report.valid,
                    if report.valid {
                        format!("{} tasks, {} edges", report.stats.total_tasks, report.stats.edge_count)
                    } else {
                        report.errors.join("; ")
                    },
                );
                let violations = tdd_violations(&tasks.tasks);
                checks.record(
                    "tdd_mapping",
                    violations.is_empty(),
                    if violations.is_empty() {
                        "every feature task depends on its test".to_string()
                    } else {
                        violations.join("; ")
                    },
                );
            }
        }
        Stage::Implement => {
            if let Some(StageEvidence::Implementation(imp)) = evidence {
                let completion = imp.task_completion();
                checks.record(
                    "task_completion",
                    completion >= MIN_TASK_COMPLETION,
                    format!(
                        "{}/{} tasks completed ({:.0}%)",
                        imp.tasks_completed,
                        imp.tasks_total,
                        completion * 100.0
                    ),
                );
                let pass_rate = imp.test_pass_rate();
                checks.record(
                    "test_pass_rate",
                    pass_rate >= MIN_TEST_PASS_RATE,
                    format!(
                        "{}/{} tests passed ({:.0}%)",
                        imp.tests_passed,
                        imp.tests_total,
                        pass_rate * 100.0
                    ),
                );
            }
        }
        Stage::Review => {
            let (blockers, high) = match evidence {
                Some(StageEvidence::Review(review)) => (
                    review.count(IssueSeverity::Blocker),
                    review.count(IssueSeverity::High),
                ),
                _ => (0, 0),
            };
            checks.record(
                "no_blockers",
                blockers == 0,
                format!("{blockers} blocker issues"),
            );
            checks.record(
                "high_issues_limit",
                high <= MAX_HIGH_ISSUES,
                format!("{high} high issues (max {MAX_HIGH_ISSUES})"),
            );
        }
        Stage::Verify => {
            if let Some(StageEvidence::Verification(ver)) = evidence {
                checks.record(
                    "functional_tests",
                    ver.functional.all_passed(),
                    format!(
                        "{}/{} functional tests passed",
                        ver.functional.passed, ver.functional.total
                    ),
                );
                checks.record(
                    "regression_tests",
                    ver.regression.all_passed(),
                    format!(
                        "{}/{} regression tests passed",
                        ver.regression.passed, ver.regression.total
                    ),
                );
                let rate = ver.pass_rate();
                checks.record(
                    "pass_rate",
                    rate >= MIN_VERIFY_PASS_RATE,
                    format!("overall pass rate {:.1}%", rate * 100.0),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Task;
    use crate::domain::{
        Consensus, Conflict, ImplementationEvidence, PlanEvidence, ReviewEvidence, ReviewIssue,
        SuiteResult, SynthesisReport, TaskEvidence, VerificationEvidence,
    };
    use serde_json::json;

    fn result(stage: Stage, score: f64) -> StageResult {
        let mut outputs = BTreeMap::new();
        outputs.insert("perspective_a".to_string(), "stages/x/a.json".to_string());
        StageResult {
            stage,
            success: true,
            outputs,
            quality_score: Some(score),
            errors: vec![],
            duration_ms: 10,
            perspectives_total: 4,
            perspectives_succeeded: 4,
            synthesis: None,
        }
    }

    fn synthesis(points: usize) -> SynthesisReport {
        SynthesisReport {
            consensus: Consensus {
                score: 85.0,
                points: (0..points).map(|i| format!("point {i}")).collect(),
            },
            ..SynthesisReport::default()
        }
    }

    fn review(blockers: usize, high: usize) -> EvidenceState {
        let mut issues = Vec::new();
        for i in 0..blockers {
            issues.push(ReviewIssue {
                severity: IssueSeverity::Blocker,
                title: format!("blocker {i}"),
                location: None,
            });
        }
        for i in 0..high {
            issues.push(ReviewIssue {
                severity: IssueSeverity::High,
                title: format!("high {i}"),
                location: None,
            });
        }
        EvidenceState::Present(StageEvidence::Review(ReviewEvidence { issues }))
    }

    #[test]
    fn test_research_passes_with_consensus() {
        let gate = QualityGate::new();
        let mut r = result(Stage::Research, 100.0);
        r.synthesis = Some(synthesis(2));
        let check = gate.check(Stage::Research, &r, &EvidenceState::Absent);
        assert!(check.passed, "{check:?}");
        assert_eq!(check.score, 100.0);
        assert!(check.failed_criteria.is_empty());
        assert_eq!(check.threshold, 70.0);
    }

    #[test]
    fn test_research_without_synthesis_fails() {
        let gate = QualityGate::new();
        let r = result(Stage::Research, 100.0);
        let check = gate.check(Stage::Research, &r, &EvidenceState::Absent);
        assert!(!check.passed);
        assert_eq!(check.failed_criteria, vec!["has_synthesis".to_string()]);
        assert_eq!(check.score, 90.0);
    }

    #[test]
    fn test_unresolved_conflict_fails_research() {
        let gate = QualityGate::new();
        let mut r = result(Stage::Research, 95.0);
        let mut s = synthesis(3);
        s.conflicts.push(Conflict {
            topic: "storage engine".into(),
            positions: vec![json!("sqlite"), json!("postgres")],
            resolution: None,
        });
        r.synthesis = Some(s);
        let check = gate.check(Stage::Research, &r, &EvidenceState::Absent);
        assert!(!check.passed);
        assert_eq!(check.failed_criteria, vec!["no_critical_conflicts".to_string()]);
        assert!(check.details["no_critical_conflicts"].contains("storage engine"));
    }

    #[test]
    fn test_low_score_fails_even_without_failed_criteria() {
        let gate = QualityGate::new();
        let mut r = result(Stage::Research, 50.0);
        r.synthesis = Some(synthesis(2));
        let check = gate.check(Stage::Research, &r, &EvidenceState::Absent);
        assert!(!check.passed);
        assert!(check.failed_criteria.is_empty());
    }

    #[test]
    fn test_score_floors_at_zero_and_null_score_is_zero() {
        let gate = QualityGate::new();
        let mut r = result(Stage::Review, 0.0);
        r.quality_score = None;
        r.success = false;
        r.outputs.clear();
        let check = gate.check(Stage::Review, &r, &review(1, 3));
        assert_eq!(check.score, 0.0);
        assert_eq!(
            check.failed_criteria,
            vec!["has_outputs", "high_issues_limit", "no_blockers", "stage_success"]
        );
    }

    #[test]
    fn test_review_blocker_fails() {
        let gate = QualityGate::new();
        let r = result(Stage::Review, 100.0);
        let check = gate.check(Stage::Review, &r, &review(1, 0));
        assert!(!check.passed);
        assert_eq!(check.failed_criteria, vec!["no_blockers".to_string()]);
        assert_eq!(check.score, 90.0);

        let ok = gate.check(Stage::Review, &r, &review(0, 2));
        assert!(ok.passed);
    }

    #[test]
    fn test_plan_evidence_requires_sections() {
        let gate = QualityGate::new();
        let r = result(Stage::Plan, 100.0);
        let evidence = EvidenceState::Present(StageEvidence::Plan(PlanEvidence {
            components: vec![json!("api")],
            risks: vec![],
            milestones: vec![json!("m1")],
        }));
        let check = gate.check(Stage::Plan, &r, &evidence);
        assert_eq!(check.failed_criteria, vec!["has_risks".to_string()]);
    }

    #[test]
    fn test_tasks_gate_uses_dag_validation() {
        let gate = QualityGate::new();
        let r = result(Stage::Tasks, 100.0);
        let cyclic = EvidenceState::Present(StageEvidence::Tasks(TaskEvidence {
            tasks: vec![
                Task::new("T-F-01").depends_on(["T-F-02"]),
                Task::new("T-F-02").depends_on(["T-F-01"]),
            ],
        }));
        let check = gate.check(Stage::Tasks, &r, &cyclic);
        assert!(!check.criteria["dag_valid"]);
        assert!(!check.criteria["tdd_mapping"]);
        assert!(check.details["dag_valid"].contains("T-F-01 → T-F-02 → T-F-01"));

        let good = EvidenceState::Present(StageEvidence::Tasks(TaskEvidence {
            tasks: vec![
                Task::new("TEST-01"),
                Task::new("T-F-01").depends_on(["TEST-01"]),
            ],
        }));
        assert!(gate.check(Stage::Tasks, &r, &good).passed);
    }

    #[test]
    fn test_empty_task_evidence_fails_dag() {
        let gate = QualityGate::new();
        let r = result(Stage::Tasks, 100.0);
        let empty = EvidenceState::Present(StageEvidence::Tasks(TaskEvidence::default()));
        let check = gate.check(Stage::Tasks, &r, &empty);
        assert!(!check.criteria["dag_valid"]);
        assert!(check.criteria["tdd_mapping"]);
    }

    #[test]
    fn test_implementation_thresholds() {
        let gate = QualityGate::new();
        let r = result(Stage::Implement, 100.0);
        let evidence = EvidenceState::Present(StageEvidence::Implementation(
            ImplementationEvidence {
                tasks_total: 10,
                tasks_completed: 9,
                tests_total: 100,
                tests_passed: 94,
            },
        ));
        let check = gate.check(Stage::Implement, &r, &evidence);
        assert!(check.criteria["task_completion"]);
        assert!(!check.criteria["test_pass_rate"]);
    }

    #[test]
    fn test_verify_requires_all_suites() {
        let gate = QualityGate::new();
        let r = result(Stage::Verify, 100.0);
        let evidence = EvidenceState::Present(StageEvidence::Verification(VerificationEvidence {
            functional: SuiteResult { total: 20, passed: 20 },
            regression: SuiteResult { total: 20, passed: 20 },
        }));
        let check = gate.check(Stage::Verify, &r, &evidence);
        assert!(check.passed);
        assert_eq!(check.threshold, 85.0);
    }

    #[test]
    fn test_verify_with_very_large_suites() {
        let gate = QualityGate::new();
        let r = result(Stage::Verify, 100.0);
        let suite = SuiteResult {
            total: 3_000_000_000,
            passed: 3_000_000_000,
        };
        let evidence = EvidenceState::Present(StageEvidence::Verification(VerificationEvidence {
            functional: suite,
            regression: suite,
        }));
        let check = gate.check(Stage::Verify, &r, &evidence);
        assert!(check.passed);
        assert!(check.criteria["pass_rate"]);
    }

    #[test]
    fn test_malformed_evidence_is_failed_criterion() {
        let gate = QualityGate::new();
        let r = result(Stage::Plan, 100.0);
        let evidence = EvidenceState::parse("{\"kind\": \"plan\", \"components\": 7}");
        assert!(matches!(evidence, EvidenceState::Malformed(_)));
        let check = gate.check(Stage::Plan, &r, &evidence);
        assert_eq!(check.failed_criteria, vec!["evidence_well_formed".to_string()]);
    }

    #[test]
    fn test_evidence_for_wrong_stage_is_rejected() {
        let gate = QualityGate::new();
        let r = result(Stage::Implement, 100.0);
        let check = gate.check(Stage::Implement, &r, &review(0, 0));
        assert!(!check.passed);
        assert!(check.details["evidence_well_formed"].contains("REVIEW"));
    }

    #[test]
    fn test_threshold_override() {
        let gate = QualityGate::new().with_threshold(Stage::Tasks, 95.0).unwrap();
        assert_eq!(gate.threshold(Stage::Tasks), 95.0);
        assert!(QualityGate::new().with_threshold(Stage::Tasks, 120.0).is_err());
    }

    #[test]
    fn test_check_is_pure() {
        let gate = QualityGate::new();
        let r = result(Stage::Review, 80.0);
        let evidence = review(0, 3);
        assert_eq!(
            gate.check(Stage::Review, &r, &evidence),
            gate.check(Stage::Review, &r, &evidence)
        );
    }
}
