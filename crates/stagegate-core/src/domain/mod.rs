//! Core domain types for the stagegate pipeline.

pub mod error;
pub mod evidence;
pub mod reports;
pub mod run;
pub mod stage;

pub use error::{PipelineError, Result};
pub use evidence::{
    evidence_artifact_id, ImplementationEvidence, IssueSeverity, PlanEvidence, ReviewEvidence,
    ReviewIssue, StageEvidence, SuiteResult, TaskEvidence, VerificationEvidence,
};
pub use reports::{item_text, Conflict, Consensus, PerspectiveReport, SynthesisReport};
pub use run::{
    workflow_id, GateCheckResult, StageAttempt, StageResult, WorkflowOutcome, WorkflowRun,
    WorkflowStatus,
};
pub use stage::{Stage, WorkflowMode};
