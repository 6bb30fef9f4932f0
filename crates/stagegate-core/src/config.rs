//! Pipeline configuration.
//!
//! Loaded from a TOML file (conventionally `.stagegate/config.toml`); every
//! field is optional and falls back to the built-in defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{CommandConfig, RetryPolicy};
use crate::domain::{PipelineError, Result, Stage};
use crate::executor::ExecutorConfig;
use crate::gate::QualityGate;
use crate::perspectives::DEFAULT_MODEL;
use crate::rollback::RollbackPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Iteration count at which the controller stops rolling back.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Ceiling on concurrent perspective calls per stage. Unbounded if unset.
    #[serde(default)]
    pub max_concurrent_perspectives: Option<usize>,

    #[serde(default = "default_model")]
    pub synthesis_model: String,

    /// Per-stage gate threshold overrides, keyed by stage name.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    #[serde(default)]
    pub rollback: RollbackSettings,

    #[serde(default)]
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSettings {
    #[serde(default = "default_same_failure_limit")]
    pub same_failure_limit: usize,

    /// Iteration at which failures escalate as diminishing returns.
    /// `0` disables the check.
    #[serde(default = "default_escalation_iteration")]
    pub escalation_iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

// Default value providers
fn default_max_iterations() -> u32 {
    10
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_same_failure_limit() -> usize {
    2
}

fn default_escalation_iteration() -> u32 {
    5
}

fn default_command() -> String {
    CommandConfig::default().program
}

fn default_args() -> Vec<String> {
    CommandConfig::default().args
}

fn default_allowed_tools() -> Vec<String> {
    CommandConfig::default().allowed_tools
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            same_failure_limit: default_same_failure_limit(),
            escalation_iteration: default_escalation_iteration(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            allowed_tools: default_allowed_tools(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_concurrent_perspectives: None,
            synthesis_model: default_model(),
            thresholds: BTreeMap::new(),
            rollback: RollbackSettings::default(),
            agent: AgentSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_perspectives == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "max_concurrent_perspectives must be at least 1".to_string(),
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "agent.command must not be empty".to_string(),
            ));
        }
        self.quality_gate().map(|_| ())
    }

    /// Gate with per-stage overrides applied.
    pub fn quality_gate(&self) -> Result<QualityGate> {
        let mut gate = QualityGate::new();
        for (name, threshold) in &self.thresholds {
            let stage: Stage = name.parse()?;
            gate = gate.with_threshold(stage, *threshold)?;
        }
        Ok(gate)
    }

    pub fn rollback_policy(&self) -> RollbackPolicy {
        RollbackPolicy {
            max_iterations: self.max_iterations,
            same_failure_limit: self.rollback.same_failure_limit,
            escalation_iteration: match self.rollback.escalation_iteration {
                0 => None,
                n => Some(n),
            },
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent: self.max_concurrent_perspectives,
            synthesis_model: self.synthesis_model.clone(),
        }
    }

    pub fn command_config(&self) -> CommandConfig {
        CommandConfig {
            program: self.agent.command.clone(),
            args: self.agent.args.clone(),
            allowed_tools: self.agent.allowed_tools.clone(),
            timeout: Duration::from_secs(self.agent.timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.agent.max_attempts.max(1),
            base_delay: Duration::from_millis(self.agent.base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}
