//! Agent executors: the capability that actually performs a SubTask.
//!
//! The engine treats an executor as opaque: it submits a [`DispatchRequest`]
//! and eventually receives an [`AgentOutput`] or an [`ExecutorError`]. The
//! engine enforces the dispatch deadline itself, so an executor that never
//! returns is abandoned rather than awaited forever.
//!
//! Implementations:
//! - [`HttpAgentExecutor`]: Anthropic Messages API or OpenAI-compatible chat completions
//! - [`CommandAgentExecutor`]: a local CLI agent spawned per dispatch
//! - [`EchoExecutor`]: dry run, returns the instruction it was given

pub mod http;
pub mod process;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::ErrorKind;
use crate::specialist::SpecialistDef;

pub use http::{HttpAdapter, HttpAgentExecutor, HttpExecutorConfig};
pub use process::CommandAgentExecutor;

/// One dispatch of one SubTask attempt.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub plan_id: String,
    pub subtask_id: String,
    pub specialist: Arc<SpecialistDef>,
    pub instruction: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub timeout: Duration,
    /// Opaque workspace context from the task.
    pub workspace: Option<PathBuf>,
}

impl DispatchRequest {
    /// A one-off request outside any plan, used by pipeline roles such as the splitter.
    pub fn adhoc(specialist: Arc<SpecialistDef>, instruction: impl Into<String>, timeout: Duration) -> Self {
        Self {
            plan_id: String::new(),
            subtask_id: format!("{}-call", specialist.id),
            specialist,
            instruction: instruction.into(),
            attempt: 1,
            timeout,
            workspace: None,
        }
    }

    /// Specialist instructions followed by the SubTask instruction.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();
        if !self.specialist.instructions.trim().is_empty() {
            prompt.push_str(self.specialist.instructions.trim());
            prompt.push_str("\n\n");
        }
        if let Some(ws) = &self.workspace {
            prompt.push_str(&format!("Workspace: {}\n\n", ws.display()));
        }
        prompt.push_str(&self.instruction);
        prompt
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A successful executor result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutput {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

impl AgentOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor failure: {0}")]
    Failed(String),

    #[error("Executor timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Executor not configured: {0}")]
    NotConfigured(String),

    #[error("Executor rejected the request: {0}")]
    Rejected(String),
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TimedOut(_) => ErrorKind::Timeout,
            Self::Failed(_) => ErrorKind::ExecutorFailure,
            Self::NotConfigured(_) | Self::Rejected(_) => ErrorKind::ExecutorRejected,
        }
    }
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: DispatchRequest) -> Result<AgentOutput, ExecutorError>;
}

/// Returns the instruction it was given, tagged with the specialist.
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor;

#[async_trait]
impl AgentExecutor for EchoExecutor {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, request: DispatchRequest) -> Result<AgentOutput, ExecutorError> {
        tracing::debug!(
            subtask_id = %request.subtask_id,
            specialist = %request.specialist.id,
            "[EchoExecutor] dry run"
        );
        Ok(AgentOutput {
            content: format!("[{}] {}", request.specialist.id, request.instruction),
            model: Some("echo".to_string()),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_executor() {
        let mut def = SpecialistDef::new("backend", "Backend");
        def.instructions = "Be precise.".to_string();
        let request = DispatchRequest::adhoc(Arc::new(def), "Build it", Duration::from_secs(1));
        assert_eq!(request.render_prompt(), "Be precise.\n\nBuild it");

        let output = EchoExecutor.invoke(request).await.unwrap();
        assert_eq!(output.content, "[backend] Build it");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ExecutorError::TimedOut(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(ExecutorError::Failed("x".into()).kind(), ErrorKind::ExecutorFailure);
        assert_eq!(ExecutorError::Rejected("x".into()).kind(), ErrorKind::ExecutorRejected);
        assert!(ExecutorError::Failed("x".into()).kind().is_retryable());
        assert!(!ExecutorError::NotConfigured("x".into()).kind().is_retryable());
    }
}
