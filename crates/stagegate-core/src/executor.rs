//! Single stage attempt: parallel perspective fan-out, synthesis, scoring.
//!
//! Every perspective of the stage runs as its own tokio task against the
//! injected [`AgentCaller`]. All tasks are awaited regardless of outcome; a
//! failed perspective lowers the quality score but never aborts its
//! siblings. Successful reports are persisted as JSON and Markdown, then a
//! single synthesis call aggregates them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::agent::{
    AgentCaller, AgentError, AgentErrorKind, AgentOutput, AgentRequest, AgentResponse,
    ExpectedSchema,
};
use crate::audit::{AuditEvent, AuditSink};
use crate::domain::{
    PerspectiveReport, PipelineError, Result, Stage, StageResult, SynthesisReport, WorkflowMode,
};
use crate::obs;
use crate::perspectives::{perspectives_for, Perspective, DEFAULT_MODEL};
use crate::report::{render_perspective, render_synthesis};
use crate::store::ArtifactStore;

/// Agent id used for the synthesis call.
pub const SYNTHESIS_AGENT_ID: &str = "synthesis";

/// Outputs and score of a stage that ran earlier in the same workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorStage {
    pub outputs: BTreeMap<String, String>,
    pub quality_score: Option<f64>,
}

/// Read-only input to one stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StageContext {
    pub workflow_id: String,
    pub topic: String,
    pub stage: Stage,
    pub iteration: u32,
    pub mode: WorkflowMode,
    pub prior: BTreeMap<Stage, PriorStage>,
}

impl StageContext {
    /// Flat JSON view handed to agents: identity fields plus
    /// `<stage>_outputs` / `<stage>_score` for every prior stage.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("workflow_id".into(), json!(self.workflow_id));
        map.insert("topic".into(), json!(self.topic));
        map.insert("stage_id".into(), json!(self.stage));
        map.insert("iteration".into(), json!(self.iteration));
        map.insert("mode".into(), json!(self.mode));
        for (stage, prior) in &self.prior {
            map.insert(format!("{}_outputs", stage.dir_name()), json!(prior.outputs));
            map.insert(format!("{}_score", stage.dir_name()), json!(prior.quality_score));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Ceiling on concurrent perspective calls; `None` runs all at once.
    pub max_concurrent: Option<usize>,
    pub synthesis_model: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            synthesis_model: DEFAULT_MODEL.to_string(),
        }
    }
}

pub struct StageExecutor {
    agent: Arc<dyn AgentCaller>,
    store: Arc<dyn ArtifactStore>,
    audit: Arc<dyn AuditSink>,
    config: ExecutorConfig,
}

impl StageExecutor {
    pub fn new(
        agent: Arc<dyn AgentCaller>,
        store: Arc<dyn ArtifactStore>,
        audit: Arc<dyn AuditSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            agent,
            store,
            audit,
            config,
        }
    }

    /// Run one attempt of `ctx.stage`.
    ///
    /// Returns `Err` only for structural problems (no perspectives for the
    /// stage, unserialisable reports). Perspective and synthesis failures
    /// are recorded in [`StageResult::errors`].
    #[instrument(skip(self, ctx), fields(workflow_id = %ctx.workflow_id, stage = %ctx.stage))]
    pub async fn run(&self, ctx: &StageContext) -> Result<StageResult> {
        let started = Instant::now();
        let stage = ctx.stage;
        let perspectives = perspectives_for(stage, ctx.mode);
        if perspectives.is_empty() {
            return Err(PipelineError::NoPerspectives {
                stage: stage.to_string(),
                mode: ctx.mode.to_string(),
            });
        }

        self.audit
            .record(
                &ctx.workflow_id,
                AuditEvent::StageStart {
                    stage_id: stage,
                    stage_name: stage.title().to_string(),
                    perspectives: perspectives.iter().map(|p| p.id.to_string()).collect(),
                },
            )
            .await;
        obs::emit_stage_started(&ctx.workflow_id, stage, ctx.iteration, perspectives.len());

        let context = ctx.to_json();
        let semaphore = self
            .config
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let mut handles = Vec::with_capacity(perspectives.len());
        for perspective in &perspectives {
            let agent = Arc::clone(&self.agent);
            let audit = Arc::clone(&self.audit);
            let semaphore = semaphore.clone();
            let workflow_id = ctx.workflow_id.clone();
            let request = perspective_request(perspective, ctx, context.clone());

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                audit
                    .record(
                        &workflow_id,
                        AuditEvent::AgentStart {
                            agent_id: request.agent_id.clone(),
                            agent_name: request.agent_name.clone(),
                            model: request.model.clone(),
                            task: request.task.clone(),
                        },
                    )
                    .await;
                agent.invoke(request).await
            }));
        }

        let joined = futures::future::join_all(handles).await;

        let mut outputs = BTreeMap::new();
        let mut errors = Vec::new();
        let mut reports: Vec<PerspectiveReport> = Vec::new();
        let mut completeness_sum = 0.0;

        for (perspective, joined) in perspectives.iter().zip(joined) {
            let (duration, outcome) = match joined {
                Ok(response) => expect_perspective(response),
                Err(e) => (
                    Duration::ZERO,
                    Err(AgentError::new(
                        AgentErrorKind::Unexpected,
                        format!("perspective task aborted: {e}"),
                    )),
                ),
            };

            self.audit
                .record(
                    &ctx.workflow_id,
                    AuditEvent::AgentComplete {
                        agent_id: perspective.id.to_string(),
                        success: outcome.is_ok(),
                        duration_seconds: duration.as_secs_f64(),
                    },
                )
                .await;

            match outcome {
                Ok(report) => {
                    completeness_sum += report.completeness();
                    let base = format!("stages/{}/perspectives/{}", stage.dir_name(), perspective.id);
                    let body = serde_json::to_string_pretty(&report)?;
                    if let Some(path) = self.persist(&ctx.workflow_id, &format!("{base}.json"), &body).await {
                        outputs.insert(format!("perspective_{}", perspective.id), path);
                    }
                    self.persist(
                        &ctx.workflow_id,
                        &format!("{base}.md"),
                        &render_perspective(stage, &report),
                    )
                    .await;
                    reports.push(report);
                }
                Err(e) => {
                    obs::emit_perspective_failed(&ctx.workflow_id, perspective.id, &e);
                    self.audit
                        .record(
                            &ctx.workflow_id,
                            AuditEvent::AgentCallError {
                                agent_id: perspective.id.to_string(),
                                error: e.to_string(),
                                retryable: e.is_retryable(),
                            },
                        )
                        .await;
                    errors.push(format!("{}: {e}", perspective.id));
                }
            }
        }

        let total = perspectives.len();
        let succeeded = reports.len();

        let synthesis = if reports.is_empty() {
            None
        } else {
            match self.synthesise(ctx, &reports).await {
                Ok(synthesis) => {
                    let base = format!("stages/{}/summaries/synthesis", stage.dir_name());
                    let body = serde_json::to_string_pretty(&synthesis)?;
                    if let Some(path) = self.persist(&ctx.workflow_id, &format!("{base}.json"), &body).await {
                        outputs.insert("synthesis".to_string(), path);
                    }
                    self.persist(
                        &ctx.workflow_id,
                        &format!("{base}.md"),
                        &render_synthesis(stage, &synthesis),
                    )
                    .await;
                    Some(synthesis)
                }
                Err(e) => {
                    errors.push(format!("{SYNTHESIS_AGENT_ID}: {e}"));
                    None
                }
            }
        };

        let quality_score = stage_quality(succeeded, total, completeness_sum);
        let duration_ms = started.elapsed().as_millis() as u64;

        self.audit
            .record(
                &ctx.workflow_id,
                AuditEvent::StageComplete {
                    stage_id: stage,
                    success: succeeded > 0,
                    duration_seconds: started.elapsed().as_secs_f64(),
                },
            )
            .await;
        obs::emit_stage_finished(&ctx.workflow_id, stage, succeeded, total, quality_score, duration_ms);

        Ok(StageResult {
            stage,
            success: succeeded > 0,
            outputs,
            quality_score: Some(quality_score),
            errors,
            duration_ms,
            perspectives_total: total,
            perspectives_succeeded: succeeded,
            synthesis,
        })
    }

    async fn synthesise(
        &self,
        ctx: &StageContext,
        reports: &[PerspectiveReport],
    ) -> std::result::Result<SynthesisReport, AgentError> {
        let request = AgentRequest {
            agent_id: SYNTHESIS_AGENT_ID.to_string(),
            agent_name: "Synthesis".to_string(),
            model: self.config.synthesis_model.clone(),
            role: "Integrates the perspective reports into one cross-perspective view".to_string(),
            focus_areas: vec![
                "Consensus".to_string(),
                "Key insights".to_string(),
                "Conflicts and their resolution".to_string(),
                "Action items".to_string(),
            ],
            task: format!(
                "Synthesise the {} perspective reports on \"{}\" for the {} stage.",
                reports.len(),
                ctx.topic,
                ctx.stage.title()
            ),
            context: json!({
                "workflow_id": ctx.workflow_id,
                "topic": ctx.topic,
                "stage_id": ctx.stage,
                "iteration": ctx.iteration,
                "perspectives": reports,
            }),
            expected_schema: ExpectedSchema::SynthesisReport,
        };

        self.audit
            .record(
                &ctx.workflow_id,
                AuditEvent::AgentStart {
                    agent_id: request.agent_id.clone(),
                    agent_name: request.agent_name.clone(),
                    model: request.model.clone(),
                    task: request.task.clone(),
                },
            )
            .await;

        let response = self.agent.invoke(request).await;
        let result = match response.result {
            Ok(AgentOutput::Synthesis(report)) => Ok(report),
            Ok(AgentOutput::Perspective(_)) => Err(AgentError::new(
                AgentErrorKind::ParseFailure,
                "expected a synthesis report, got a perspective report",
            )),
            Err(e) => Err(e),
        };

        self.audit
            .record(
                &ctx.workflow_id,
                AuditEvent::AgentComplete {
                    agent_id: SYNTHESIS_AGENT_ID.to_string(),
                    success: result.is_ok(),
                    duration_seconds: response.duration.as_secs_f64(),
                },
            )
            .await;
        if let Err(e) = &result {
            self.audit
                .record(
                    &ctx.workflow_id,
                    AuditEvent::AgentCallError {
                        agent_id: SYNTHESIS_AGENT_ID.to_string(),
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    },
                )
                .await;
        }
        result
    }

    /// Fire-and-forget write. Returns the artifact path on success.
    async fn persist(&self, workflow_id: &str, artifact_id: &str, content: &str) -> Option<String> {
        match self.store.write(artifact_id, content).await {
            Ok(path) => {
                let path = path.display().to_string();
                self.audit
                    .record(
                        workflow_id,
                        AuditEvent::FileWrite {
                            path: path.clone(),
                            size_bytes: content.len(),
                        },
                    )
                    .await;
                Some(path)
            }
            Err(e) => {
                obs::emit_artifact_write_error(workflow_id, artifact_id, &e);
                None
            }
        }
    }
}

fn perspective_request(perspective: &Perspective, ctx: &StageContext, context: Value) -> AgentRequest {
    AgentRequest {
        agent_id: perspective.id.to_string(),
        agent_name: perspective.name.to_string(),
        model: perspective.model.to_string(),
        role: perspective.description.to_string(),
        focus_areas: perspective.focus_areas.iter().map(|f| f.to_string()).collect(),
        task: format!(
            "Analyse \"{}\" for the {} stage from the {} perspective.",
            ctx.topic,
            ctx.stage.title(),
            perspective.name
        ),
        context,
        expected_schema: ExpectedSchema::PerspectiveReport,
    }
}

fn expect_perspective(
    response: AgentResponse,
) -> (Duration, std::result::Result<PerspectiveReport, AgentError>) {
    let outcome = match response.result {
        Ok(AgentOutput::Perspective(report)) => Ok(report),
        Ok(AgentOutput::Synthesis(_)) => Err(AgentError::new(
            AgentErrorKind::ParseFailure,
            "expected a perspective report, got a synthesis report",
        )),
        Err(e) => Err(e),
    };
    (response.duration, outcome)
}

/// `50 · success rate + 50 · mean completeness`, failed perspectives counting
/// as zero completeness.
pub fn stage_quality(succeeded: usize, total: usize, completeness_sum: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    50.0 * (succeeded as f64 / total) + 50.0 * (completeness_sum / total)
}
