//! Write-only audit trail of pipeline actions.
//!
//! Each [`AuditEvent`] becomes one JSON line:
//! `{"timestamp", "workflow_id", "level", "action", "details"}`.
//! Sinks never fail the pipeline; write errors are logged and dropped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::{Stage, WorkflowMode, WorkflowStatus};
use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "details", rename_all = "snake_case")]
pub enum AuditEvent {
    WorkflowInit {
        topic: String,
        mode: WorkflowMode,
    },
    StageStart {
        stage_id: Stage,
        stage_name: String,
        perspectives: Vec<String>,
    },
    StageComplete {
        stage_id: Stage,
        success: bool,
        duration_seconds: f64,
    },
    AgentStart {
        agent_id: String,
        agent_name: String,
        model: String,
        task: String,
    },
    AgentComplete {
        agent_id: String,
        success: bool,
        duration_seconds: f64,
    },
    AgentCallError {
        agent_id: String,
        error: String,
        retryable: bool,
    },
    FileWrite {
        path: String,
        size_bytes: usize,
    },
    GateCheck {
        stage: Stage,
        passed: bool,
        score: f64,
        threshold: f64,
    },
    GateFailed {
        stage: Stage,
        failed_criteria: Vec<String>,
    },
    RollbackTriggered {
        from_stage: Stage,
        to_stage: Stage,
        iteration: u32,
        reason: String,
    },
    WorkflowComplete {
        duration_seconds: f64,
        final_status: WorkflowStatus,
        quality_score: Option<f64>,
    },
    WorkflowError {
        error: String,
        stage: Option<Stage>,
    },
    HumanIntervention {
        reason: String,
        context: Value,
    },
}

impl AuditEvent {
    pub fn action(&self) -> &'static str {
        match self {
            AuditEvent::WorkflowInit { .. } => "workflow_init",
            AuditEvent::StageStart { .. } => "stage_start",
            AuditEvent::StageComplete { .. } => "stage_complete",
            AuditEvent::AgentStart { .. } => "agent_start",
            AuditEvent::AgentComplete { .. } => "agent_complete",
            AuditEvent::AgentCallError { .. } => "agent_call_error",
            AuditEvent::FileWrite { .. } => "file_write",
            AuditEvent::GateCheck { .. } => "gate_check",
            AuditEvent::GateFailed { .. } => "gate_failed",
            AuditEvent::RollbackTriggered { .. } => "rollback_triggered",
            AuditEvent::WorkflowComplete { .. } => "workflow_complete",
            AuditEvent::WorkflowError { .. } => "workflow_error",
            AuditEvent::HumanIntervention { .. } => "human_intervention",
        }
    }

    pub fn level(&self) -> AuditLevel {
        match self {
            AuditEvent::AgentCallError { .. } | AuditEvent::WorkflowError { .. } => {
                AuditLevel::Error
            }
            AuditEvent::GateFailed { .. }
            | AuditEvent::RollbackTriggered { .. }
            | AuditEvent::HumanIntervention { .. } => AuditLevel::Warning,
            _ => AuditLevel::Info,
        }
    }
}

/// One persisted audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub level: AuditLevel,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(workflow_id: &str, event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            workflow_id: workflow_id.to_string(),
            level: event.level(),
            event,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, workflow_id: &str, event: AuditEvent);
}

/// Appends audit records to a JSON-lines file.
pub struct JsonlAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, workflow_id: &str, event: AuditEvent) {
        let record = AuditRecord::new(workflow_id, event);
        let result = match serde_json::to_string(&record) {
            Ok(line) => self.append(&line).await,
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        };
        if let Err(e) = result {
            obs::emit_audit_write_error(workflow_id, record.event.action(), &e);
        }
    }
}

/// Read back every record from a JSON-lines audit file.
pub async fn read_audit_log(path: impl AsRef<Path>) -> crate::domain::Result<Vec<AuditRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_shape() {
        let record = AuditRecord::new(
            "wf-1",
            AuditEvent::GateCheck {
                stage: Stage::Tasks,
                passed: false,
                score: 62.5,
                threshold: 80.0,
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["action"], "gate_check");
        assert_eq!(value["workflow_id"], "wf-1");
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["details"]["stage"], "TASKS");
        assert_eq!(value["details"]["threshold"], json!(80.0));
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_levels() {
        let err = AuditEvent::WorkflowError {
            error: "boom".into(),
            stage: None,
        };
        assert_eq!(err.level(), AuditLevel::Error);
        let rollback = AuditEvent::RollbackTriggered {
            from_stage: Stage::Review,
            to_stage: Stage::Implement,
            iteration: 0,
            reason: "r".into(),
        };
        assert_eq!(rollback.level(), AuditLevel::Warning);
        assert_eq!(rollback.action(), "rollback_triggered");
    }

    #[tokio::test]
    async fn test_jsonl_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("logs").join("actions.jsonl"));
        log.record(
            "wf-1",
            AuditEvent::WorkflowInit {
                topic: "cache".into(),
                mode: WorkflowMode::Quick,
            },
        )
        .await;
        log.record(
            "wf-1",
            AuditEvent::StageStart {
                stage_id: Stage::Research,
                stage_name: "Research".into(),
                perspectives: vec!["architecture".into(), "workflow".into()],
            },
        )
        .await;

        let records = read_audit_log(log.path()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event.action(), "workflow_init");
        assert!(matches!(
            &records[1].event,
            AuditEvent::StageStart { perspectives, .. } if perspectives.len() == 2
        ));
    }
}
