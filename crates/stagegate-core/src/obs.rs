//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - A workflow-scoped tracing span via [`workflow_span`]
//! - Emission functions for key events: stage start/finish, gate checks,
//!   rollbacks, escalations and workflow completion
//!
//! Events are emitted at `info!` level (configurable via `STAGEGATE_LOG`).

use tracing::{info, warn};

use crate::domain::{Stage, WorkflowStatus};

/// Span tagged with the workflow id. Attach with `Instrument::instrument` so
/// it stays attached across `.await` points.
pub fn workflow_span(workflow_id: &str) -> tracing::Span {
    tracing::info_span!("stagegate.workflow", workflow_id = %workflow_id)
}

pub fn emit_workflow_started(workflow_id: &str, topic: &str, mode: &str) {
    info!(event = "workflow.started", workflow_id = %workflow_id, topic = %topic, mode = %mode);
}

/// Emit event: one stage attempt is starting.
pub fn emit_stage_started(workflow_id: &str, stage: Stage, iteration: u32, perspectives: usize) {
    info!(
        event = "stage.started",
        workflow_id = %workflow_id,
        stage = %stage,
        iteration = iteration,
        perspectives = perspectives,
    );
}

pub fn emit_stage_finished(
    workflow_id: &str,
    stage: Stage,
    succeeded: usize,
    total: usize,
    quality_score: f64,
    duration_ms: u64,
) {
    info!(
        event = "stage.finished",
        workflow_id = %workflow_id,
        stage = %stage,
        succeeded = succeeded,
        total = total,
        quality_score = quality_score,
        duration_ms = duration_ms,
    );
}

/// Emit event: a perspective call failed (warning level).
pub fn emit_perspective_failed(workflow_id: &str, perspective_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "perspective.failed",
        workflow_id = %workflow_id,
        perspective_id = %perspective_id,
        error = %error,
    );
}

/// Emit event: gate evaluation completed.
pub fn emit_gate_checked(workflow_id: &str, stage: Stage, score: f64, threshold: f64, passed: bool) {
    info!(
        event = "gate.checked",
        workflow_id = %workflow_id,
        stage = %stage,
        score = score,
        threshold = threshold,
        passed = passed,
    );
}

pub fn emit_rollback(workflow_id: &str, from: Stage, to: Stage, iteration: u32) {
    warn!(
        event = "rollback.triggered",
        workflow_id = %workflow_id,
        from_stage = %from,
        to_stage = %to,
        iteration = iteration,
    );
}

pub fn emit_escalated(workflow_id: &str, reason: &str) {
    warn!(event = "workflow.escalated", workflow_id = %workflow_id, reason = %reason);
}

pub fn emit_workflow_finished(
    workflow_id: &str,
    status: WorkflowStatus,
    iterations: u32,
    duration_ms: u64,
) {
    info!(
        event = "workflow.finished",
        workflow_id = %workflow_id,
        status = %status,
        iterations = iterations,
        duration_ms = duration_ms,
    );
}

/// Emit event: an artifact could not be persisted (warning level).
pub fn emit_artifact_write_error(workflow_id: &str, artifact_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "artifact.write_error",
        workflow_id = %workflow_id,
        artifact_id = %artifact_id,
        error = %error,
    );
}

pub fn emit_audit_write_error(workflow_id: &str, action: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "audit.write_error",
        workflow_id = %workflow_id,
        action = %action,
        error = %error,
    );
}
