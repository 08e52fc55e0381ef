//! Command-line agent adapter.
//!
//! Runs an agent CLI (by default `claude -p --output-format json`) inside the
//! request's working directory, feeds the prompt on stdin and waits for it to
//! exit. Agents that print a JSON result envelope get it unwrapped; anything
//! else is taken as plain text.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Collaborator, CollaboratorOutcome, CollaboratorRequest};
use crate::error::CollaboratorError;

/// Collaborator backed by a local agent CLI.
#[derive(Debug, Clone)]
pub struct CliCollaborator {
    command: String,
    args: Vec<String>,
    /// Flag used to pass the comma-separated tool allow-list.
    allowed_tools_flag: Option<String>,
    timeout: Duration,
}

impl CliCollaborator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            allowed_tools_flag: Some("--allowedTools".to_string()),
            timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the allow-list flag; `None` disables passing capabilities.
    pub fn with_allowed_tools_flag(mut self, flag: Option<String>) -> Self {
        self.allowed_tools_flag = flag;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self, request: &CollaboratorRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.current_dir(&request.working_dir);
        cmd.args(&self.args);

        if let Some(flag) = &self.allowed_tools_flag {
            if !request.capabilities.is_empty() {
                let tools: Vec<&str> = request.capabilities.iter().map(|c| c.tool_name()).collect();
                cmd.arg(flag).arg(tools.join(","));
            }
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

impl Default for CliCollaborator {
    fn default() -> Self {
        Self::new("claude").with_args(vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ])
    }
}

#[async_trait]
impl Collaborator for CliCollaborator {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorOutcome, CollaboratorError> {
        if !request.working_dir.is_dir() {
            return Err(CollaboratorError::MissingWorkingDir(
                request.working_dir.clone(),
            ));
        }

        let start = Instant::now();
        let mut cmd = self.build_command(&request);

        info!(
            command = %self.command,
            working_dir = %request.working_dir.display(),
            prompt_bytes = request.prompt.len(),
            "Invoking agent"
        );

        let mut child = cmd.spawn().map_err(|e| CollaboratorError::SpawnFailed {
            command: self.command.clone(),
            reason: e.to_string(),
        })?;

        // The prompt is written while stdout is drained, both under the
        // timeout. kill_on_drop reaps the child if the timeout drops the
        // future.
        let stdin = child.stdin.take();
        let prompt = request.prompt.as_bytes();
        let write_prompt = async move {
            match stdin {
                Some(mut stdin) => {
                    stdin.write_all(prompt).await?;
                    stdin.shutdown().await
                }
                None => Ok(()),
            }
        };
        let exchange = async move { tokio::join!(write_prompt, child.wait_with_output()) };

        let (written, output) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok((written, Ok(output))) => (written, output),
            Ok((_, Err(e))) => return Err(CollaboratorError::Process(e.to_string())),
            Err(_) => return Err(CollaboratorError::Timeout(self.timeout)),
        };

        // An agent that exits early closes its stdin; its exit status is
        // the better report then.
        if let Err(e) = written {
            if output.status.success() {
                return Err(CollaboratorError::PromptWrite(e.to_string()));
            }
            debug!(error = %e, "Agent closed stdin before reading the whole prompt");
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms = start.elapsed().as_millis() as u64,
            "Agent exited"
        );

        if !output.status.success() {
            let reason = if stderr.trim().is_empty() {
                format!(
                    "agent exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(CollaboratorOutcome::Error { reason });
        }

        Ok(normalize_agent_output(&stdout))
    }
}

/// Normalizes agent stdout into an outcome.
///
/// Recognizes the result envelope `{"result": "...", "is_error": bool}`
/// (also `subtype: "error_*"`); any other output is plain success text.
pub fn normalize_agent_output(stdout: &str) -> CollaboratorOutcome {
    let trimmed = stdout.trim();
    let envelope = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        _ => {
            return CollaboratorOutcome::Success {
                text: trimmed.to_string(),
            }
        }
    };

    let text = match envelope.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => trimmed.to_string(),
    };

    let is_error = envelope
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || envelope
            .get("subtype")
            .and_then(Value::as_str)
            .map(|s| s.starts_with("error"))
            .unwrap_or(false);

    if is_error {
        let reason = if text.is_empty() {
            envelope
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or("agent reported an error")
                .to_string()
        } else {
            text
        };
        CollaboratorOutcome::Error { reason }
    } else {
        CollaboratorOutcome::Success { text }
    }
}
