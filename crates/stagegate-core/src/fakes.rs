//! In-memory fakes for the pipeline collaborators (testing only)
//!
//! Provides `ScriptedAgentCaller`, `MemoryArtifactStore` and `MemoryAuditLog`
//! that satisfy the trait contracts without touching processes or disk.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{
    AgentCaller, AgentError, AgentErrorKind, AgentOutput, AgentRequest, AgentResponse,
};
use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::domain::{
    Consensus, PerspectiveReport, PipelineError, Result, SynthesisReport,
};
use crate::executor::SYNTHESIS_AGENT_ID;
use crate::store::{validate_artifact_id, ArtifactStore};

// ---------------------------------------------------------------------------
// ScriptedAgentCaller
// ---------------------------------------------------------------------------

/// What a scripted agent returns for one call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Report(PerspectiveReport),
    Synthesis(SynthesisReport),
    Fail(AgentErrorKind),
}

/// Agent caller that answers from a script keyed by agent id.
///
/// Each id has a queue of responses; once the queue is empty the id's
/// default applies. Perspectives default to a complete report (findings and
/// recommendations); synthesis defaults to two consensus points and no
/// conflicts.
#[derive(Debug, Default)]
pub struct ScriptedAgentCaller {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    defaults: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgentCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for the next call to `agent_id`.
    pub fn push(&self, agent_id: &str, response: Scripted) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Answer every unqueued call to `agent_id` with `response`.
    pub fn set_default(&self, agent_id: &str, response: Scripted) -> &Self {
        self.defaults
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), response);
        self
    }

    /// Make `agent_id` fail on every unqueued call.
    pub fn always_fail(&self, agent_id: &str, kind: AgentErrorKind) -> &Self {
        self.set_default(agent_id, Scripted::Fail(kind))
    }

    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, agent_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .count()
    }

    fn next_for(&self, request: &AgentRequest) -> Scripted {
        if let Some(next) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.agent_id)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        if let Some(default) = self.defaults.lock().unwrap().get(&request.agent_id) {
            return default.clone();
        }
        if request.agent_id == SYNTHESIS_AGENT_ID {
            Scripted::Synthesis(default_synthesis())
        } else {
            Scripted::Report(complete_report(&request.agent_id, &request.agent_name))
        }
    }
}

#[async_trait]
impl AgentCaller for ScriptedAgentCaller {
    async fn invoke(&self, request: AgentRequest) -> AgentResponse {
        let scripted = self.next_for(&request);
        self.calls.lock().unwrap().push(request.clone());
        let result = match scripted {
            Scripted::Report(report) => Ok(AgentOutput::Perspective(report)),
            Scripted::Synthesis(report) => Ok(AgentOutput::Synthesis(report)),
            Scripted::Fail(kind) => Err(AgentError::new(
                kind,
                format!("scripted failure for {}", request.agent_id),
            )),
        };
        AgentResponse {
            result,
            duration: Duration::from_millis(1),
        }
    }
}

/// A report with one finding and one recommendation (completeness 1.0).
pub fn complete_report(id: &str, name: &str) -> PerspectiveReport {
    PerspectiveReport {
        perspective_id: id.to_string(),
        perspective_name: name.to_string(),
        summary: Some(format!("{name} analysis")),
        findings: vec![json!({"title": "finding", "description": format!("observed by {id}")})],
        recommendations: vec![json!(format!("recommendation from {id}"))],
        concerns: vec![],
    }
}

pub fn default_synthesis() -> SynthesisReport {
    SynthesisReport {
        consensus: Consensus {
            score: 85.0,
            points: vec![
                "perspectives agree on the overall direction".to_string(),
                "risks are understood".to_string(),
            ],
        },
        key_insights: vec![json!("keep the design small")],
        conflicts: vec![],
        action_items: vec![json!("proceed to the next stage")],
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory artifact store backed by a `HashMap<artifact id, content>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<HashMap<String, String>>,
    fail_writes: Mutex<bool>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact, e.g. stage evidence.
    pub fn insert(&self, artifact_id: &str, content: impl Into<String>) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(artifact_id.to_string(), content.into());
    }

    pub fn get(&self, artifact_id: &str) -> Option<String> {
        self.artifacts.lock().unwrap().get(artifact_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.artifacts.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(&self, artifact_id: &str, content: &str) -> Result<PathBuf> {
        validate_artifact_id(artifact_id)?;
        if *self.fail_writes.lock().unwrap() {
            return Err(PipelineError::Storage(format!(
                "write to {artifact_id} rejected"
            )));
        }
        self.insert(artifact_id, content);
        Ok(PathBuf::from("memory").join(artifact_id))
    }

    async fn read(&self, artifact_id: &str) -> Result<Option<String>> {
        validate_artifact_id(artifact_id)?;
        Ok(self.get(artifact_id))
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditLog
// ---------------------------------------------------------------------------

/// In-memory audit sink that keeps every record in order.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.event.action())
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.actions().into_iter().filter(|a| *a == action).count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, workflow_id: &str, event: AuditEvent) {
        self.records
            .lock()
            .unwrap()
            .push(AuditRecord::new(workflow_id, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ExpectedSchema;

    fn request(agent_id: &str) -> AgentRequest {
        AgentRequest {
            agent_id: agent_id.into(),
            agent_name: "Name".into(),
            model: "sonnet".into(),
            role: String::new(),
            focus_areas: vec![],
            task: String::new(),
            context: json!({}),
            expected_schema: ExpectedSchema::PerspectiveReport,
        }
    }

    #[tokio::test]
    async fn scripted_queue_then_default() {
        let agent = ScriptedAgentCaller::new();
        agent.push("security", Scripted::Fail(AgentErrorKind::Timeout));

        let first = agent.invoke(request("security")).await;
        assert_eq!(first.result.unwrap_err().kind, AgentErrorKind::Timeout);
        let second = agent.invoke(request("security")).await;
        assert!(matches!(second.result, Ok(AgentOutput::Perspective(_))));
        assert_eq!(agent.calls_for("security"), 2);
    }

    #[tokio::test]
    async fn memory_store_rejects_writes_when_failing() {
        let store = MemoryArtifactStore::new();
        store.write("a.json", "1").await.unwrap();
        store.fail_writes();
        assert!(store.write("b.json", "2").await.is_err());
        assert_eq!(store.read("a.json").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.read("b.json").await.unwrap(), None);
    }
}
