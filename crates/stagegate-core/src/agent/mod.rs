//! Agent-caller boundary.
//!
//! A perspective analysis or a synthesis is an opaque external call. The
//! [`AgentCaller`] trait receives a typed [`AgentRequest`] and returns a typed
//! [`AgentOutput`] or a classified [`AgentError`]; raw model text never
//! crosses this boundary.

pub mod command;
pub mod prompt;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{PerspectiveReport, SynthesisReport};

pub use command::{CommandAgentCaller, CommandConfig};
pub use prompt::{build_prompt, extract_json};

/// Which structured shape the caller must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedSchema {
    PerspectiveReport,
    SynthesisReport,
}

impl ExpectedSchema {
    /// Validate raw JSON against this schema.
    pub fn parse(self, value: Value) -> Result<AgentOutput, AgentError> {
        match self {
            ExpectedSchema::PerspectiveReport => serde_json::from_value(value)
                .map(AgentOutput::Perspective)
                .map_err(|e| {
                    AgentError::new(
                        AgentErrorKind::ParseFailure,
                        format!("perspective report schema mismatch: {e}"),
                    )
                }),
            ExpectedSchema::SynthesisReport => serde_json::from_value(value)
                .map(AgentOutput::Synthesis)
                .map_err(|e| {
                    AgentError::new(
                        AgentErrorKind::ParseFailure,
                        format!("synthesis report schema mismatch: {e}"),
                    )
                }),
        }
    }
}

/// One unit of delegated analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Perspective id, or `synthesis`.
    pub agent_id: String,
    pub agent_name: String,
    pub model: String,
    /// Role description placed at the top of the prompt.
    pub role: String,
    pub focus_areas: Vec<String>,
    pub task: String,
    pub context: Value,
    pub expected_schema: ExpectedSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "report", rename_all = "snake_case")]
pub enum AgentOutput {
    Perspective(PerspectiveReport),
    Synthesis(SynthesisReport),
}

#[derive(Debug)]
pub struct AgentResponse {
    pub result: Result<AgentOutput, AgentError>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    Timeout,
    /// The backing tool is missing or cannot be started.
    ToolUnavailable,
    /// The call completed but its output did not match the expected schema.
    ParseFailure,
    Unexpected,
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentErrorKind::Timeout => "timeout",
            AgentErrorKind::ToolUnavailable => "tool unavailable",
            AgentErrorKind::ParseFailure => "parse failure",
            AgentErrorKind::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeouts and unexpected failures may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, AgentErrorKind::Timeout | AgentErrorKind::Unexpected)
    }
}

/// Exponential backoff for retryable agent failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base · 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// The external analysis collaborator.
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> AgentResponse;
}
