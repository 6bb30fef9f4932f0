//! Workflow run state: status, per-stage results, gate outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::reports::SynthesisReport;
use super::stage::{Stage, WorkflowMode};

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    /// Transient: the stage pointer is being moved back.
    Rollback,
    HumanIntervention,
}

impl WorkflowStatus {
    /// Terminal states end a controller run; only an explicit resume leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::HumanIntervention
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Initialized => "INITIALIZED",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Rollback => "ROLLBACK",
            WorkflowStatus::HumanIntervention => "HUMAN_INTERVENTION",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: Stage,
    /// True when at least one perspective succeeded.
    pub success: bool,
    /// Output name → artifact path.
    pub outputs: BTreeMap<String, String>,
    /// Continuous quality score in `[0, 100]`.
    pub quality_score: Option<f64>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub perspectives_total: usize,
    pub perspectives_succeeded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisReport>,
}

/// Result of evaluating a stage's quality gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateCheckResult {
    pub stage: Stage,
    pub passed: bool,
    pub score: f64,
    pub threshold: f64,
    /// Criterion name → satisfied. Ordered so failures list deterministically.
    pub criteria: BTreeMap<String, bool>,
    pub failed_criteria: Vec<String>,
    /// Criterion name → human-readable explanation.
    pub details: BTreeMap<String, String>,
}

impl GateCheckResult {
    /// Stable signature of this failure: sorted failed criteria joined by `,`.
    pub fn failure_signature(&self) -> String {
        let mut failed = self.failed_criteria.clone();
        failed.sort();
        failed.join(",")
    }
}

/// One recorded stage attempt. Attempts are never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageAttempt {
    pub stage: Stage,
    pub iteration: u32,
    pub result: StageResult,
    pub gate: GateCheckResult,
}

/// The single mutable record of a pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub topic: String,
    pub mode: WorkflowMode,
    pub status: WorkflowStatus,
    pub current_stage: Option<Stage>,
    pub iteration: u32,
    /// Latest attempt per stage.
    pub stage_results: BTreeMap<Stage, StageResult>,
    /// Every attempt in execution order.
    pub attempts: Vec<StageAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(topic: impl Into<String>, mode: WorkflowMode) -> Self {
        let topic = topic.into();
        let now = Utc::now();
        Self {
            id: workflow_id(&topic, now),
            topic,
            mode,
            status: WorkflowStatus::Initialized,
            current_stage: None,
            iteration: 0,
            stage_results: BTreeMap::new(),
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    /// Mean of all recorded stage scores; 0 when nothing scored.
    pub fn mean_quality_score(&self) -> f64 {
        let scores: Vec<f64> = self
            .stage_results
            .values()
            .filter_map(|r| r.quality_score)
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

/// Summary returned to the caller once a run reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub success: bool,
    pub final_status: WorkflowStatus,
    pub quality_score: Option<f64>,
    pub stage_results: BTreeMap<Stage, StageResult>,
    pub total_iterations: u32,
    pub duration_seconds: f64,
    /// Errors of unsuccessful stage attempts, followed by the escalation
    /// or failure reason.
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Build a workflow id of the form `<topic-slug>-<YYYYMMDD>-<6 hex>`.
///
/// The slug keeps at most 20 characters of the topic, lower-cased, with
/// whitespace folded to `-`. An empty slug becomes `workflow`.
pub fn workflow_id(topic: &str, now: DateTime<Utc>) -> String {
    let mut slug = String::new();
    for c in topic.chars().take(20) {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if c == '-' || c == '_' || c.is_whitespace() {
            if !slug.ends_with('-') {
                slug.push('-');
            }
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "workflow" } else { slug };

    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update(now.to_rfc3339().as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let suffix = hex::encode(hasher.finalize());

    format!("{}-{}-{}", slug, now.format("%Y%m%d"), &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_result(stage: Stage, score: Option<f64>) -> StageResult {
        StageResult {
            stage,
            success: true,
            outputs: BTreeMap::new(),
            quality_score: score,
            errors: vec![],
            duration_ms: 0,
            perspectives_total: 4,
            perspectives_succeeded: 4,
            synthesis: None,
        }
    }

    #[test]
    fn test_workflow_id_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let id = workflow_id("Design a Cache Layer!", now);
        assert!(id.starts_with("design-a-cache-layer-20260314-"), "{id}");
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_workflow_id_empty_topic_falls_back() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let id = workflow_id("???", now);
        assert!(id.starts_with("workflow-20260102-"), "{id}");
    }

    #[test]
    fn test_workflow_ids_are_unique() {
        let now = Utc::now();
        assert_ne!(workflow_id("same", now), workflow_id("same", now));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::HumanIntervention.is_terminal());
        assert!(!WorkflowStatus::Rollback.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[test]
    fn test_set_status_stamps_completion() {
        let mut run = WorkflowRun::new("topic", WorkflowMode::Quick);
        run.set_status(WorkflowStatus::Running);
        assert!(run.completed_at.is_none());
        run.set_status(WorkflowStatus::Failed);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_mean_quality_score_skips_missing() {
        let mut run = WorkflowRun::new("topic", WorkflowMode::Normal);
        assert_eq!(run.mean_quality_score(), 0.0);
        run.stage_results
            .insert(Stage::Research, sample_result(Stage::Research, Some(80.0)));
        run.stage_results
            .insert(Stage::Plan, sample_result(Stage::Plan, Some(90.0)));
        run.stage_results
            .insert(Stage::Tasks, sample_result(Stage::Tasks, None));
        assert_eq!(run.mean_quality_score(), 85.0);
    }

    #[test]
    fn test_failure_signature_is_sorted() {
        let gate = GateCheckResult {
            stage: Stage::Review,
            passed: false,
            score: 40.0,
            threshold: 75.0,
            criteria: BTreeMap::new(),
            failed_criteria: vec!["no_blockers".into(), "high_issues_limit".into()],
            details: BTreeMap::new(),
        };
        assert_eq!(gate.failure_signature(), "high_issues_limit,no_blockers");
    }
}
