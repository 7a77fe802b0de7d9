//! Clarifier: surfaces missing information before any stage runs.
//!
//! A clarifier proposes [`ClarificationDraft`]s for a plan. The orchestrator
//! turns them into open [`ClarificationRequest`]s, and the run stays
//! suspended until every request is answered or the caller bypasses or
//! abandons the gate.
//!
//! Clarification runs in rounds. After each answered round the clarifier is
//! asked again, with the answers so far visible on the plan. When it has no
//! further questions, [`Clarifier::enough_info`] decides whether the plan can
//! run or the caller is asked for additional context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::executor::{AgentExecutor, DispatchRequest};
use crate::models::{ClarificationRequest, ClarificationStatus, Plan, StageKind};
use crate::specialist::{SpecialistDef, SpecialistRegistry, PROMPT_ENGINEER_SPECIALIST};
use crate::text::{extract_section, list_items};

/// Asked when the clarifier has no questions left but the answers so far
/// are not enough to proceed.
pub const ADDITIONAL_CONTEXT_QUESTION: &str =
    "The information may still be incomplete. Any additional context?";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClarifierError {
    #[error("Clarifier unavailable: {0}")]
    Unavailable(String),

    #[error("Clarifier call failed: {0}")]
    Executor(String),
}

/// Questions blocking a set of SubTasks, before they get a request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClarificationDraft {
    pub subtask_ids: Vec<String>,
    pub questions: Vec<String>,
}

#[async_trait]
pub trait Clarifier: Send + Sync {
    fn name(&self) -> &str;

    /// Questions for `plan`, at most `max_questions` per draft. An empty list
    /// means the plan can run as is.
    async fn clarify(
        &self,
        plan: &Plan,
        max_questions: usize,
    ) -> Result<Vec<ClarificationDraft>, ClarifierError>;

    /// Whether the task plus the answered requests on `plan` are detailed
    /// enough to run. Only asked once `clarify` has no more questions.
    async fn enough_info(&self, plan: &Plan) -> Result<bool, ClarifierError> {
        let _ = plan;
        Ok(true)
    }
}

/// Answered requests on `plan`, oldest first.
pub fn answered(plan: &Plan) -> impl Iterator<Item = &ClarificationRequest> {
    plan.clarifications
        .iter()
        .filter(|c| c.status == ClarificationStatus::Answered)
}

/// Every SubTask of the work stages, the ones a whole-task question blocks.
pub fn work_subtask_ids(plan: &Plan) -> Vec<String> {
    plan.stages
        .iter()
        .filter(|s| s.kind == StageKind::Work)
        .flat_map(|s| s.subtasks.iter().map(|t| t.id.clone()))
        .collect()
}

/// `Q:`/`A:` lines for every answered question, under `heading`.
fn answered_section(plan: &Plan, heading: &str) -> String {
    let mut section = String::new();
    for request in answered(plan) {
        for (question, answer) in request.questions.iter().zip(request.answers.iter()) {
            section.push_str(&format!("Q: {}\nA: {}\n", question, answer.trim()));
        }
    }
    if section.is_empty() {
        section
    } else {
        format!("### {}\n{}\n", heading, section)
    }
}

/// Asks the `prompt-engineer` specialist for a `### Questions Needed` list
/// covering the whole task. Its questions block every work SubTask.
pub struct AgentClarifier {
    executor: Arc<dyn AgentExecutor>,
    engineer: Arc<SpecialistDef>,
    timeout: Duration,
}

impl AgentClarifier {
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
    ) -> Result<Self, ClarifierError> {
        let engineer = registry
            .resolve(PROMPT_ENGINEER_SPECIALIST)
            .map_err(|e| ClarifierError::Unavailable(e.to_string()))?;
        Ok(Self::new(executor, engineer, timeout))
    }

    fn render(plan: &Plan, max_questions: usize) -> String {
        let mut prompt = format!(
            "Analyze this request and determine what clarifying questions are needed before \
             the work can start.\n\nOriginal Prompt: \"{}\"\n\nPlanned specialists: {}\n\n",
            plan.task.text,
            plan.specialists().join(", ")
        );
        prompt.push_str(&answered_section(plan, "Previous Clarifications:"));
        prompt.push_str(&format!(
            "Ask at most {} specific, actionable questions. If the request is already clear \
             and complete, answer None.\n\n\
             Output your response in this EXACT format:\n\
             ### Questions Needed\n\
             [List each question on a new line, numbered 1., 2., 3., etc. If no questions needed, write \"None\"]\n\
             ### Analysis\n\
             [Brief explanation]\n",
            max_questions
        ));
        prompt
    }

    fn render_completeness(plan: &Plan) -> String {
        format!(
            "Evaluate whether enough information has been gathered to carry out this request.\n\n\
             Original Prompt: \"{}\"\n\n{}\n\
             Are there still critical ambiguities? Is the scope clear? Are technical \
             requirements specified?\n\n\
             Output your response in this EXACT format:\n\
             ### Enough Information?\n\
             [Yes or No]\n\
             ### Reasoning\n\
             [Brief explanation]\n",
            plan.task.text,
            answered_section(plan, "Clarifications Received:")
        )
    }

    /// `true` only for a `### Enough Information?` section answering yes.
    pub fn parse_enough_info(content: &str) -> bool {
        extract_section(content, "Enough Information?")
            .and_then(|section| {
                section
                    .split(|c: char| !c.is_alphanumeric())
                    .find(|word| !word.is_empty())
                    .map(|word| word.eq_ignore_ascii_case("yes"))
            })
            .unwrap_or(false)
    }

    async fn ask(&self, plan: &Plan, prompt: String) -> Result<String, ClarifierError> {
        let mut request = DispatchRequest::adhoc(self.engineer.clone(), prompt, self.timeout);
        request.plan_id = plan.id.clone();
        request.workspace = plan.task.workspace.clone();

        let output = tokio::time::timeout(self.timeout, self.executor.invoke(request))
            .await
            .map_err(|_| ClarifierError::Executor(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ClarifierError::Executor(e.to_string()))?;
        Ok(output.content)
    }

    /// Questions from an answer, capped at `max_questions`.
    pub fn parse(content: &str, max_questions: usize) -> Vec<String> {
        extract_section(content, "Questions Needed")
            .map(|section| list_items(&section))
            .unwrap_or_default()
            .into_iter()
            .take(max_questions)
            .collect()
    }
}

#[async_trait]
impl Clarifier for AgentClarifier {
    fn name(&self) -> &str {
        "prompt-engineer"
    }

    async fn clarify(
        &self,
        plan: &Plan,
        max_questions: usize,
    ) -> Result<Vec<ClarificationDraft>, ClarifierError> {
        if max_questions == 0 {
            return Ok(Vec::new());
        }

        let content = self.ask(plan, Self::render(plan, max_questions)).await?;
        let questions = Self::parse(&content, max_questions);
        if questions.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![ClarificationDraft {
            subtask_ids: work_subtask_ids(plan),
            questions,
        }])
    }

    async fn enough_info(&self, plan: &Plan) -> Result<bool, ClarifierError> {
        if answered(plan).next().is_none() {
            return Ok(true);
        }
        let content = self.ask(plan, Self::render_completeness(plan)).await?;
        Ok(Self::parse_enough_info(&content))
    }
}
