//! Rollback and escalation decisions after a failed quality gate.
//!
//! A [`RollbackManager`] is owned by exactly one controller and remembers, for
//! the lifetime of that run, every failure signature per stage and every
//! rollback transition. Decisions escalate to a human when the run is
//! exhausted, repeating itself, oscillating between two stages, or no longer
//! converging; otherwise they name an earlier stage to resume from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{GateCheckResult, Stage};

/// Bounds applied by the rollback manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPolicy {
    /// Iteration at or above which every failure escalates.
    pub max_iterations: u32,
    /// Prior occurrences of an identical failure signature on the same stage
    /// that trigger escalation.
    pub same_failure_limit: usize,
    /// Iteration at or above which failures escalate as diminishing returns.
    /// `None` disables the check.
    pub escalation_iteration: Option<u32>,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            same_failure_limit: 2,
            escalation_iteration: Some(5),
        }
    }
}

/// Why a decision requires a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCause {
    MaxIterations,
    RepeatedFailure,
    Oscillation,
    DiminishingReturns,
    CannotRollBackFurther,
}

/// The manager's verdict for one gate failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackDecision {
    pub should_rollback: bool,
    pub from_stage: Stage,
    /// Target stage; equals `from_stage` when not rolling back.
    pub to_stage: Stage,
    pub iteration: u32,
    pub reason: String,
    pub require_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<EscalationCause>,
}

impl RollbackDecision {
    fn escalate(from: Stage, iteration: u32, cause: EscalationCause, reason: String) -> Self {
        Self {
            should_rollback: false,
            from_stage: from,
            to_stage: from,
            iteration,
            reason,
            require_human: true,
            cause: Some(cause),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub iteration: u32,
}

/// Snapshot of what the manager has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackHistory {
    pub error_history: BTreeMap<Stage, Vec<String>>,
    pub transitions: Vec<StageTransition>,
}

#[derive(Debug, Default)]
pub struct RollbackManager {
    policy: RollbackPolicy,
    history: RollbackHistory,
}

impl RollbackManager {
    pub fn new(policy: RollbackPolicy) -> Self {
        Self {
            policy,
            history: RollbackHistory::default(),
        }
    }

    pub fn policy(&self) -> &RollbackPolicy {
        &self.policy
    }

    /// Decide what to do after `gate` failed on `stage` at `iteration`.
    pub fn decide(&mut self, stage: Stage, gate: &GateCheckResult, iteration: u32) -> RollbackDecision {
        let signature = gate.failure_signature();
        let seen = self.history.error_history.entry(stage).or_default();
        let prior_identical = seen.iter().filter(|s| **s == signature).count();
        seen.push(signature.clone());

        if iteration >= self.policy.max_iterations {
            return RollbackDecision::escalate(
                stage,
                iteration,
                EscalationCause::MaxIterations,
                format!(
                    "maximum iterations reached ({})",
                    self.policy.max_iterations
                ),
            );
        }

        if prior_identical >= self.policy.same_failure_limit {
            return RollbackDecision::escalate(
                stage,
                iteration,
                EscalationCause::RepeatedFailure,
                format!(
                    "identical failure on {stage} repeated {} times (failed: {})",
                    prior_identical + 1,
                    display_signature(&signature)
                ),
            );
        }

        if let [.., first, second] = self.history.transitions.as_slice() {
            if first.to == second.from && second.to == first.from {
                return RollbackDecision::escalate(
                    stage,
                    iteration,
                    EscalationCause::Oscillation,
                    format!("stage oscillation: {} ↔ {}", first.from, first.to),
                );
            }
        }

        if let Some(limit) = self.policy.escalation_iteration {
            if iteration >= limit {
                return RollbackDecision::escalate(
                    stage,
                    iteration,
                    EscalationCause::DiminishingReturns,
                    format!("no convergence after {iteration} iterations"),
                );
            }
        }

        let mut target = rollback_target(iteration);
        if target >= stage {
            match stage.previous() {
                Some(previous) => target = previous,
                None => {
                    return RollbackDecision::escalate(
                        stage,
                        iteration,
                        EscalationCause::CannotRollBackFurther,
                        format!("{stage} is the first stage; cannot roll back further"),
                    );
                }
            }
        }

        self.history.transitions.push(StageTransition {
            from: stage,
            to: target,
            iteration,
        });

        RollbackDecision {
            should_rollback: true,
            from_stage: stage,
            to_stage: target,
            iteration,
            reason: rollback_reason(stage, target, iteration, &gate.failed_criteria),
            require_human: false,
            cause: None,
        }
    }

    pub fn history(&self) -> &RollbackHistory {
        &self.history
    }

    /// Forget all recorded failures and transitions.
    pub fn reset(&mut self) {
        self.history = RollbackHistory::default();
    }
}

/// Where to resume for a failure at `iteration`: early failures retry
/// implementation, later ones revisit task decomposition, then planning.
pub fn rollback_target(iteration: u32) -> Stage {
    match iteration {
        0..=2 => Stage::Implement,
        3 => Stage::Tasks,
        _ => Stage::Plan,
    }
}

fn rollback_reason(from: Stage, to: Stage, iteration: u32, failed: &[String]) -> String {
    let base = match iteration {
        0 | 1 => format!("first failure at {from}, retrying from {to}"),
        2 => format!("repeated failure at {from}, repairing from {to}"),
        3 => format!("implementation keeps failing, re-planning tasks from {to}"),
        _ => format!("task breakdown may be flawed, revisiting {to}"),
    };
    if failed.is_empty() {
        base
    } else {
        format!("{base} (failed: {})", failed.join(", "))
    }
}

fn display_signature(signature: &str) -> &str {
    if signature.is_empty() {
        "score below threshold"
    } else {
        signature
    }
}
