//! Agent caller backed by a command-line model client.
//!
//! The prompt is written to the child's stdin; the last JSON block on stdout
//! is schema-checked into an [`AgentOutput`]. Timeouts and non-zero exits
//! are retried with exponential backoff; a missing binary or unparseable
//! output is reported immediately.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{instrument, warn};

use super::{
    build_prompt, extract_json, AgentCaller, AgentError, AgentErrorKind, AgentOutput,
    AgentRequest, AgentResponse, RetryPolicy,
};

/// How to launch the model client.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConfig {
    pub program: String,
    /// Arguments placed before `--model` and `--allowedTools`.
    pub args: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub timeout: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--print".to_string()],
            allowed_tools: ["Read", "Glob", "Grep", "Bash", "WebFetch", "WebSearch"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct CommandAgentCaller {
    config: CommandConfig,
    retry: RetryPolicy,
}

impl CommandAgentCaller {
    pub fn new(config: CommandConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    async fn attempt(&self, request: &AgentRequest, prompt: &str) -> Result<AgentOutput, AgentError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg("--model")
            .arg(&request.model);
        if !self.config.allowed_tools.is_empty() {
            command
                .arg("--allowedTools")
                .arg(self.config.allowed_tools.join(","));
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let kind = if e.kind() == std::io::ErrorKind::NotFound {
                    AgentErrorKind::ToolUnavailable
                } else {
                    AgentErrorKind::Unexpected
                };
                AgentError::new(kind, format!("failed to start {}: {e}", self.config.program))
            })?;

        // Delivering the prompt counts against the timeout: a child that
        // stalls without reading stdin blocks the write once the pipe fills.
        let stdin = child.stdin.take();
        let exchange = async move {
            let deliver = async move {
                let Some(mut stdin) = stdin else {
                    return Ok(());
                };
                match stdin.write_all(prompt.as_bytes()).await {
                    // The child exited without reading; its status tells the rest.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            };
            let (delivered, output) = tokio::join!(deliver, child.wait_with_output());
            if let Err(e) = delivered {
                return Err(AgentError::new(
                    AgentErrorKind::Unexpected,
                    format!("failed to write prompt: {e}"),
                ));
            }
            output.map_err(|e| AgentError::new(AgentErrorKind::Unexpected, e.to_string()))
        };

        let output = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| {
                AgentError::new(
                    AgentErrorKind::Timeout,
                    format!("no response after {}s", self.config.timeout.as_secs()),
                )
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                "unknown error".to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(AgentError::new(
                AgentErrorKind::Unexpected,
                format!(
                    "{} exited with {}: {detail}",
                    self.config.program,
                    output.status.code().unwrap_or(-1)
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = extract_json(&stdout).ok_or_else(|| {
            let preview: String = stdout.chars().take(200).collect();
            AgentError::new(
                AgentErrorKind::ParseFailure,
                format!("no JSON found in agent output: {preview}"),
            )
        })?;
        request.expected_schema.parse(value)
    }
}

#[async_trait]
impl AgentCaller for CommandAgentCaller {
    #[instrument(skip(self, request), fields(agent_id = %request.agent_id))]
    async fn invoke(&self, request: AgentRequest) -> AgentResponse {
        let started = Instant::now();
        let prompt = build_prompt(&request);
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        let result = loop {
            match self.attempt(&request, &prompt).await {
                Ok(output) => break Ok(output),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        event = "agent.retry",
                        agent_id = %request.agent_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        AgentResponse {
            result,
            duration: started.elapsed(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::agent::ExpectedSchema;
    use serde_json::json;

    fn request() -> AgentRequest {
        AgentRequest {
            agent_id: "architecture".into(),
            agent_name: "Architecture Analyst".into(),
            model: "sonnet".into(),
            role: "Analyses system structure".into(),
            focus_areas: vec![],
            task: "Analyse".into(),
            context: json!({}),
            expected_schema: ExpectedSchema::PerspectiveReport,
        }
    }

    fn shell(script: &str, timeout: Duration) -> CommandAgentCaller {
        CommandAgentCaller::new(
            CommandConfig {
                program: "sh".into(),
                args: vec!["-c".into(), script.into(), "agent".into()],
                allowed_tools: vec![],
                timeout,
            },
            RetryPolicy::none(),
        )
    }

    #[tokio::test]
    async fn test_parses_fenced_report_from_stdout() {
        let script = r#"cat > /dev/null; printf '```json\n{"perspective_id":"architecture","perspective_name":"Architecture Analyst","findings":["f"],"recommendations":["r"]}\n```\n'"#;
        let caller = shell(script, Duration::from_secs(10));
        let response = caller.invoke(request()).await;
        match response.result {
            Ok(AgentOutput::Perspective(report)) => {
                assert_eq!(report.perspective_id, "architecture");
                assert_eq!(report.completeness(), 1.0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_unavailable() {
        let caller = CommandAgentCaller::new(
            CommandConfig {
                program: "definitely-not-a-real-agent-binary".into(),
                ..CommandConfig::default()
            },
            RetryPolicy::default(),
        );
        let response = caller.invoke(request()).await;
        let err = response.result.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::ToolUnavailable);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_unexpected() {
        let caller = shell("cat > /dev/null; echo boom >&2; exit 3", Duration::from_secs(10));
        let err = caller.invoke(request()).await.result.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Unexpected);
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let caller = shell("sleep 5", Duration::from_millis(100));
        let err = caller.invoke(request()).await.result.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_timeout_covers_prompt_delivery() {
        // Larger than any pipe buffer, so the write stalls on a child that never reads.
        let mut req = request();
        req.task = "x".repeat(1 << 20);
        let caller = shell("sleep 3", Duration::from_millis(100));

        let started = Instant::now();
        let err = caller.invoke(req).await.result.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_still_parsed() {
        let mut req = request();
        req.task = "x".repeat(1 << 20);
        let script = r#"printf '{"perspective_id":"architecture","perspective_name":"Architecture Analyst","findings":["f"],"recommendations":["r"]}'"#;
        let caller = shell(script, Duration::from_secs(10));
        assert!(matches!(
            caller.invoke(req).await.result,
            Ok(AgentOutput::Perspective(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_text_is_parse_failure() {
        let caller = shell("cat > /dev/null; echo 'no structured answer'", Duration::from_secs(10));
        let err = caller.invoke(request()).await.result.unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::ParseFailure);
    }
}
