//! Prompt optimizer: rewrites a SubTask instruction into a sharper one
//! before dispatch.
//!
//! The rewrite is a refinement only: the specialist assignment never changes
//! and a failed rewrite leaves the original instruction in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::executor::{AgentExecutor, DispatchRequest};
use crate::models::{Plan, SubTask, SubTaskStatus, Task};
use crate::specialist::{SpecialistDef, SpecialistRegistry, PROMPT_ENGINEER_SPECIALIST};
use crate::text::extract_section;

#[derive(Debug, Clone, thiserror::Error)]
pub enum OptimizerError {
    #[error("Prompt engineer unavailable: {0}")]
    Unavailable(String),

    #[error("Prompt engineer call failed: {0}")]
    Executor(String),

    #[error("Prompt engineer answer had no usable prompt")]
    EmptyPrompt,
}

#[async_trait]
pub trait PromptOptimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Replacement instruction text for `subtask`.
    async fn optimize(&self, subtask: &SubTask, task: &Task) -> Result<String, OptimizerError>;
}

/// Moves every `Pending` SubTask through `Optimizing` to `Ready`, rewriting
/// instructions with up to `max_in_flight` concurrent calls. With no
/// optimizer the SubTasks go straight to `Ready`. Failed or empty rewrites
/// keep the instruction; cancellation keeps every instruction.
pub async fn refine_pending(
    plan: &RwLock<Plan>,
    optimizer: Option<&Arc<dyn PromptOptimizer>>,
    max_in_flight: usize,
    cancel: &CancellationToken,
) {
    let (task, pending) = {
        let mut plan = plan.write().await;
        let mut pending = Vec::new();
        for subtask in plan.subtasks_mut().filter(|s| s.status == SubTaskStatus::Pending) {
            subtask.status = if optimizer.is_some() {
                pending.push(subtask.clone());
                SubTaskStatus::Optimizing
            } else {
                SubTaskStatus::Ready
            };
        }
        (plan.task.clone(), pending)
    };
    let Some(optimizer) = optimizer else { return };
    if pending.is_empty() {
        return;
    }

    let rewrites = stream::iter(pending)
        .map(|subtask| {
            let optimizer = optimizer.clone();
            let task = task.clone();
            async move {
                let result = optimizer.optimize(&subtask, &task).await;
                (subtask.id, result)
            }
        })
        .buffer_unordered(max_in_flight.max(1))
        .collect::<Vec<_>>();

    let rewrites = tokio::select! {
        _ = cancel.cancelled() => Vec::new(),
        rewrites = rewrites => rewrites,
    };

    let mut plan = plan.write().await;
    for (id, result) in rewrites {
        let Some(subtask) = plan.subtask_mut(&id) else { continue };
        match result {
            Ok(text) if !text.trim().is_empty() => subtask.set_instruction(text),
            Ok(_) => {}
            Err(e) => tracing::warn!(
                subtask_id = %id,
                "[Optimizer] {} failed, keeping original instruction: {}",
                optimizer.name(),
                e
            ),
        }
    }
    for subtask in plan.subtasks_mut().filter(|s| s.status == SubTaskStatus::Optimizing) {
        subtask.status = SubTaskStatus::Ready;
    }
}

/// Keeps every instruction as it is.
#[derive(Debug, Clone, Default)]
pub struct PassthroughOptimizer;

#[async_trait]
impl PromptOptimizer for PassthroughOptimizer {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn optimize(&self, subtask: &SubTask, _task: &Task) -> Result<String, OptimizerError> {
        Ok(subtask.instruction.clone())
    }
}

/// Dispatches to the `prompt-engineer` specialist and keeps its
/// `### Perfected Prompt` section.
pub struct AgentPromptOptimizer {
    executor: Arc<dyn AgentExecutor>,
    engineer: Arc<SpecialistDef>,
    timeout: Duration,
}

impl AgentPromptOptimizer {
    pub fn new(executor: Arc<dyn AgentExecutor>, engineer: Arc<SpecialistDef>, timeout: Duration) -> Self {
        Self {
            executor,
            engineer,
            timeout,
        }
    }

    pub fn from_registry(
        executor: Arc<dyn AgentExecutor>,
        registry: &SpecialistRegistry,
        timeout: Duration,
    ) -> Result<Self, OptimizerError> {
        let engineer = registry
            .resolve(PROMPT_ENGINEER_SPECIALIST)
            .map_err(|e| OptimizerError::Unavailable(e.to_string()))?;
        Ok(Self::new(executor, engineer, timeout))
    }

    fn render(subtask: &SubTask, task: &Task) -> String {
        format!(
            "Perfect and optimize this instruction for the '{}' specialist. Keep its intent \
             and scope; do not add new requirements.\n\n\
             Original task:\n{}\n\n\
             Instruction:\n{}\n\n\
             Output your response in this EXACT format:\n\
             ### Perfected Prompt\n[Your perfected prompt here]\n",
            subtask.specialist, task.text, subtask.instruction
        )
    }
}

#[async_trait]
impl PromptOptimizer for AgentPromptOptimizer {
    fn name(&self) -> &str {
        "prompt-engineer"
    }

    async fn optimize(&self, subtask: &SubTask, task: &Task) -> Result<String, OptimizerError> {
        let mut request = DispatchRequest::adhoc(self.engineer.clone(), Self::render(subtask, task), self.timeout);
        request.subtask_id = format!("{}-optimize", subtask.id);

        let output = tokio::time::timeout(self.timeout, self.executor.invoke(request))
            .await
            .map_err(|_| OptimizerError::Executor(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| OptimizerError::Executor(e.to_string()))?;

        match extract_section(&output.content, "Perfected Prompt") {
            Some(prompt) if !prompt.is_empty() => Ok(prompt),
            _ => Err(OptimizerError::EmptyPrompt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{AgentOutput, ExecutorError};

    struct Canned(&'static str);

    #[async_trait]
    impl AgentExecutor for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn invoke(&self, request: DispatchRequest) -> Result<AgentOutput, ExecutorError> {
            assert_eq!(request.specialist.id, PROMPT_ENGINEER_SPECIALIST);
            Ok(AgentOutput::text(self.0))
        }
    }

    fn optimizer(answer: &'static str) -> AgentPromptOptimizer {
        AgentPromptOptimizer::from_registry(
            Arc::new(Canned(answer)),
            &SpecialistRegistry::builtin(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_extracts_perfected_prompt() {
        let subtask = SubTask::draft("backend", "login api");
        let task = Task::new("Build login");
        let result = optimizer("### Perfected Prompt\nBuild POST /api/login returning a JWT.\n### Notes\nx")
            .optimize(&subtask, &task)
            .await
            .unwrap();
        assert_eq!(result, "Build POST /api/login returning a JWT.");
    }

    #[tokio::test]
    async fn test_missing_section_is_error() {
        let subtask = SubTask::draft("backend", "login api");
        let err = optimizer("Sure! Here you go.")
            .optimize(&subtask, &Task::new("Build login"))
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::EmptyPrompt));
    }

    #[tokio::test]
    async fn test_passthrough() {
        let subtask = SubTask::draft("frontend", "login form");
        let result = PassthroughOptimizer
            .optimize(&subtask, &Task::new("x"))
            .await
            .unwrap();
        assert_eq!(result, "login form");
    }
}
