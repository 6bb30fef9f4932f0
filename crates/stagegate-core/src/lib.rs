//! Stagegate Core Library
//!
//! A six-stage development pipeline (research, plan, tasks, implement,
//! review, verify) where every stage fans out to parallel expert
//! perspectives, synthesises their reports and must pass a quality gate
//! before the next stage runs. Failed gates roll the workflow back to an
//! earlier stage or escalate to a human.

pub mod agent;
pub mod audit;
pub mod config;
pub mod controller;
pub mod dag;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod gate;
pub mod obs;
pub mod perspectives;
pub mod report;
pub mod rollback;
pub mod store;
pub mod telemetry;

pub use agent::{
    AgentCaller, AgentError, AgentErrorKind, AgentOutput, AgentRequest, AgentResponse,
    CommandAgentCaller, CommandConfig, ExpectedSchema, RetryPolicy,
};
pub use audit::{read_audit_log, AuditEvent, AuditLevel, AuditRecord, AuditSink, JsonlAuditLog};
pub use config::PipelineConfig;
pub use controller::{Collaborators, RunOptions, StageGateController};
pub use dag::{validate_dag, DagReport, DagStats, Task, TaskType};
pub use domain::{
    evidence_artifact_id, workflow_id, GateCheckResult, PerspectiveReport, PipelineError, Result,
    Stage, StageAttempt, StageEvidence, StageResult, SynthesisReport, WorkflowMode,
    WorkflowOutcome, WorkflowRun, WorkflowStatus,
};
pub use executor::{ExecutorConfig, StageContext, StageExecutor};
pub use gate::{EvidenceState, QualityGate};
pub use perspectives::{perspectives_for, Perspective, PERSPECTIVES};
pub use rollback::{EscalationCause, RollbackDecision, RollbackManager, RollbackPolicy};
pub use store::fs::FsArtifactStore;
pub use store::ArtifactStore;
