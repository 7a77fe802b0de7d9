//! Command agent executor: spawns a local CLI agent per dispatch
//! (e.g. `cursor-agent --model composer-1 <prompt>`).
//!
//! The rendered prompt is passed as the final argument and stdout is the
//! result payload. Children are spawned with `kill_on_drop`, so when the
//! engine abandons a dispatch (timeout or cancellation) the process dies
//! with it.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{AgentExecutor, AgentOutput, DispatchRequest, ExecutorError};

#[derive(Debug, Clone)]
pub struct CommandAgentExecutor {
    command: String,
    args: Vec<String>,
    /// Used when the task carries no workspace.
    default_cwd: Option<PathBuf>,
}

impl CommandAgentExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            default_cwd: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(cwd.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl AgentExecutor for CommandAgentExecutor {
    fn name(&self) -> &str {
        &self.command
    }

    async fn invoke(&self, request: DispatchRequest) -> Result<AgentOutput, ExecutorError> {
        let prompt = request.render_prompt();

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .arg(&prompt)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = request.workspace.as_ref().or(self.default_cwd.as_ref()) {
            cmd.current_dir(cwd);
        }

        tracing::debug!(
            subtask_id = %request.subtask_id,
            specialist = %request.specialist.id,
            "[CommandExecutor] Spawning: {} {}",
            self.command,
            self.args.join(" ")
        );

        let output = cmd.output().await.map_err(|e| {
            let message = format!(
                "Failed to spawn '{}': {}. Is it installed and in PATH?",
                self.command, e
            );
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecutorError::NotConfigured(message)
            } else {
                ExecutorError::Failed(message)
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Failed(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                crate::truncate(stderr.trim(), 500)
            )));
        }

        Ok(AgentOutput::text(stdout))
    }
}
