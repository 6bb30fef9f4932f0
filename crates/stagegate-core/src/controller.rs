//! The stage-gate state machine.
//!
//! [`StageGateController`] owns one [`WorkflowRun`] and drives it through the
//! six stages: execute the stage, check its gate, then advance, roll back,
//! escalate to a human, or fail. Rollback decisions come from a
//! [`RollbackManager`] whose history spans the controller's lifetime, so a
//! resumed run still sees earlier failures.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::Instrument;

use crate::agent::AgentCaller;
use crate::audit::{AuditEvent, AuditSink};
use crate::config::PipelineConfig;
use crate::domain::{
    evidence_artifact_id, PipelineError, Result, Stage, StageAttempt, WorkflowOutcome,
    WorkflowRun, WorkflowStatus,
};
use crate::executor::{PriorStage, StageContext, StageExecutor};
use crate::gate::{EvidenceState, QualityGate};
use crate::obs;
use crate::rollback::{RollbackDecision, RollbackManager};
use crate::store::ArtifactStore;

/// Artifact id of the run snapshot.
pub const META_ARTIFACT: &str = "meta.json";

/// The injected collaborators of one controller.
#[derive(Clone)]
pub struct Collaborators {
    pub agent: Arc<dyn AgentCaller>,
    pub store: Arc<dyn ArtifactStore>,
    pub audit: Arc<dyn AuditSink>,
}

/// Per-invocation overrides for [`StageGateController::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Begin at this stage instead of the first.
    pub start_from: Option<Stage>,
    /// Stages to pass over without executing.
    pub skip: BTreeSet<Stage>,
    /// Resume with this iteration count instead of the current one.
    pub iteration: Option<u32>,
}

impl RunOptions {
    pub fn starting_at(stage: Stage) -> Self {
        Self {
            start_from: Some(stage),
            ..Self::default()
        }
    }
}

pub struct StageGateController {
    run: WorkflowRun,
    executor: StageExecutor,
    gate: QualityGate,
    rollback: RollbackManager,
    store: Arc<dyn ArtifactStore>,
    audit: Arc<dyn AuditSink>,
    max_iterations: u32,
}

/// Why the loop stopped, before it is turned into an outcome.
enum Exit {
    Completed,
    Human { reason: String, context: serde_json::Value },
    Failed { error: String, stage: Option<Stage> },
}

impl StageGateController {
    pub fn new(run: WorkflowRun, config: &PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let executor = StageExecutor::new(
            Arc::clone(&collaborators.agent),
            Arc::clone(&collaborators.store),
            Arc::clone(&collaborators.audit),
            config.executor_config(),
        );
        Ok(Self {
            run,
            executor,
            gate: config.quality_gate()?,
            rollback: RollbackManager::new(config.rollback_policy()),
            store: collaborators.store,
            audit: collaborators.audit,
            max_iterations: config.max_iterations,
        })
    }

    /// Current state of the run.
    pub fn workflow(&self) -> &WorkflowRun {
        &self.run
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    /// Drive the run until it reaches a terminal state.
    pub async fn run(&mut self, options: RunOptions) -> WorkflowOutcome {
        let span = obs::workflow_span(&self.run.id);
        self.run_inner(options).instrument(span).await
    }

    /// Re-enter a run that stopped for human intervention or failed,
    /// keeping its id, results and rollback history.
    pub async fn resume(&mut self, from_stage: Option<Stage>) -> WorkflowOutcome {
        let start_from = from_stage.or(self.run.current_stage);
        self.run(RunOptions {
            start_from,
            ..RunOptions::default()
        })
        .await
    }

    async fn run_inner(&mut self, options: RunOptions) -> WorkflowOutcome {
        let started = Instant::now();

        if self.run.status == WorkflowStatus::Initialized {
            self.audit
                .record(
                    &self.run.id,
                    AuditEvent::WorkflowInit {
                        topic: self.run.topic.clone(),
                        mode: self.run.mode,
                    },
                )
                .await;
        }
        obs::emit_workflow_started(&self.run.id, &self.run.topic, self.run.mode.as_str());

        if let Some(iteration) = options.iteration {
            self.run.iteration = iteration;
        }
        self.run.completed_at = None;
        self.run.set_status(WorkflowStatus::Running);
        self.save_snapshot().await;

        let exit = self.drive(&options).await;
        self.finish(exit, started).await
    }

    async fn drive(&mut self, options: &RunOptions) -> Exit {
        let mut index = options.start_from.map(Stage::index).unwrap_or(0);

        while let Some(stage) = Stage::from_index(index) {
            if options.skip.contains(&stage) {
                index += 1;
                continue;
            }

            self.run.current_stage = Some(stage);
            self.save_snapshot().await;

            let ctx = self.stage_context(stage);
            let result = match self.executor.run(&ctx).await {
                Ok(result) => result,
                Err(e) => return failed(e, stage),
            };

            let evidence = match self.load_evidence(stage).await {
                Ok(evidence) => evidence,
                Err(e) => return failed(e, stage),
            };

            let gate = self.gate.check(stage, &result, &evidence);
            obs::emit_gate_checked(&self.run.id, stage, gate.score, gate.threshold, gate.passed);
            self.audit
                .record(
                    &self.run.id,
                    AuditEvent::GateCheck {
                        stage,
                        passed: gate.passed,
                        score: gate.score,
                        threshold: gate.threshold,
                    },
                )
                .await;

            self.run.stage_results.insert(stage, result.clone());
            self.run.attempts.push(StageAttempt {
                stage,
                iteration: self.run.iteration,
                result,
                gate: gate.clone(),
            });

            if gate.passed {
                index += 1;
                continue;
            }

            self.audit
                .record(
                    &self.run.id,
                    AuditEvent::GateFailed {
                        stage,
                        failed_criteria: gate.failed_criteria.clone(),
                    },
                )
                .await;

            let decision = self.rollback.decide(stage, &gate, self.run.iteration);

            if decision.require_human {
                return Exit::Human {
                    context: decision_context(&decision, &gate.failed_criteria),
                    reason: decision.reason,
                };
            }

            if !decision.should_rollback {
                return Exit::Failed {
                    error: format!("no rollback action for failed gate at {stage}"),
                    stage: Some(stage),
                };
            }

            self.run.set_status(WorkflowStatus::Rollback);
            self.audit
                .record(
                    &self.run.id,
                    AuditEvent::RollbackTriggered {
                        from_stage: stage,
                        to_stage: decision.to_stage,
                        iteration: decision.iteration,
                        reason: decision.reason.clone(),
                    },
                )
                .await;
            obs::emit_rollback(&self.run.id, stage, decision.to_stage, decision.iteration);

            self.run.iteration += 1;
            if self.run.iteration >= self.max_iterations {
                return Exit::Human {
                    reason: format!(
                        "maximum iterations reached ({}) after rollback from {stage} to {}",
                        self.max_iterations, decision.to_stage
                    ),
                    context: decision_context(&decision, &gate.failed_criteria),
                };
            }

            self.run.set_status(WorkflowStatus::Running);
            index = decision.to_stage.index();
        }

        Exit::Completed
    }

    async fn finish(&mut self, exit: Exit, started: Instant) -> WorkflowOutcome {
        // Errors of every unsuccessful attempt, including ones a later
        // rollback recovered from.
        let mut errors: Vec<String> = self
            .run
            .attempts
            .iter()
            .filter(|a| !a.result.success)
            .flat_map(|a| a.result.errors.iter().cloned())
            .collect();
        let (status, reason) = match exit {
            Exit::Completed => (WorkflowStatus::Completed, None),
            Exit::Human { reason, context } => {
                obs::emit_escalated(&self.run.id, &reason);
                self.audit
                    .record(
                        &self.run.id,
                        AuditEvent::HumanIntervention {
                            reason: reason.clone(),
                            context,
                        },
                    )
                    .await;
                errors.push(reason.clone());
                (WorkflowStatus::HumanIntervention, Some(reason))
            }
            Exit::Failed { error, stage } => {
                self.audit
                    .record(
                        &self.run.id,
                        AuditEvent::WorkflowError {
                            error: error.clone(),
                            stage,
                        },
                    )
                    .await;
                errors.push(error.clone());
                (WorkflowStatus::Failed, Some(error))
            }
        };

        self.run.set_status(status);
        let quality_score = match status {
            WorkflowStatus::Completed => Some(self.run.mean_quality_score()),
            _ => None,
        };
        let duration = started.elapsed();

        self.audit
            .record(
                &self.run.id,
                AuditEvent::WorkflowComplete {
                    duration_seconds: duration.as_secs_f64(),
                    final_status: status,
                    quality_score,
                },
            )
            .await;
        obs::emit_workflow_finished(
            &self.run.id,
            status,
            self.run.iteration,
            duration.as_millis() as u64,
        );
        self.save_snapshot().await;

        WorkflowOutcome {
            workflow_id: self.run.id.clone(),
            success: status == WorkflowStatus::Completed,
            final_status: status,
            quality_score,
            stage_results: self.run.stage_results.clone(),
            total_iterations: self.run.iteration,
            duration_seconds: duration.as_secs_f64(),
            errors,
            reason,
        }
    }

    fn stage_context(&self, stage: Stage) -> StageContext {
        let prior: BTreeMap<Stage, PriorStage> = self
            .run
            .stage_results
            .iter()
            .filter(|(s, _)| **s < stage)
            .map(|(s, r)| {
                (
                    *s,
                    PriorStage {
                        outputs: r.outputs.clone(),
                        quality_score: r.quality_score,
                    },
                )
            })
            .collect();
        StageContext {
            workflow_id: self.run.id.clone(),
            topic: self.run.topic.clone(),
            stage,
            iteration: self.run.iteration,
            mode: self.run.mode,
            prior,
        }
    }

    async fn load_evidence(&self, stage: Stage) -> Result<EvidenceState> {
        let raw = self.store.read(&evidence_artifact_id(stage)).await?;
        Ok(raw.map_or(EvidenceState::Absent, |raw| EvidenceState::parse(&raw)))
    }

    async fn save_snapshot(&self) {
        let body = match serde_json::to_string_pretty(&self.run) {
            Ok(body) => body,
            Err(e) => {
                obs::emit_artifact_write_error(&self.run.id, META_ARTIFACT, &e);
                return;
            }
        };
        if let Err(e) = self.store.write(META_ARTIFACT, &body).await {
            obs::emit_artifact_write_error(&self.run.id, META_ARTIFACT, &e);
        }
    }
}

fn failed(error: PipelineError, stage: Stage) -> Exit {
    Exit::Failed {
        error: format!("{stage}: {error}"),
        stage: Some(stage),
    }
}

fn decision_context(decision: &RollbackDecision, failed_criteria: &[String]) -> serde_json::Value {
    json!({
        "from_stage": decision.from_stage,
        "to_stage": decision.to_stage,
        "iteration": decision.iteration,
        "cause": decision.cause,
        "failed_criteria": failed_criteria,
    })
}
