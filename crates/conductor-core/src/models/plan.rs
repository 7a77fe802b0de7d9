//! Plan, Stage and SubTask: the execution plan a task is decomposed into.
//!
//! A [`Plan`] exclusively owns its [`Stage`]s, and each stage owns its
//! [`SubTask`]s. Stages execute strictly in index order; SubTasks inside a
//! stage carry no ordering between each other.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ClarificationRequest, ClarificationStatus, ComposerReport, Task};
use crate::error::{OrchestrationError, Result};

// ─── SubTask ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubTaskStatus {
    Pending,
    Optimizing,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Optimizing => "OPTIMIZING",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// Failure categories recorded on SubTasks and plans. Serialized with the
/// same PascalCase spelling as [`ErrorKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Splitter could not route confidently; recovered by the default specialist.
    ClassificationAmbiguous,
    /// The plan references an unknown specialist. Never retried.
    SpecialistNotFound,
    /// The executor reported an error. Retried.
    ExecutorFailure,
    /// The executor refused the request outright (bad credentials, missing
    /// binary, malformed request). Never retried.
    ExecutorRejected,
    /// The dispatch deadline passed. Retried, reported distinctly once exhausted.
    Timeout,
    /// The caller abandoned an open clarification request.
    ClarificationUnresolved,
    /// Composer found issues after the last allowed remediation cycle.
    ComposerCycleLimitExceeded,
    /// Composer found issues it had no way to remediate.
    IntegrationUnresolved,
    /// The dispatch was abandoned because the plan was cancelled.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutorFailure | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassificationAmbiguous => "ClassificationAmbiguous",
            Self::SpecialistNotFound => "SpecialistNotFound",
            Self::ExecutorFailure => "ExecutorFailure",
            Self::ExecutorRejected => "ExecutorRejected",
            Self::Timeout => "Timeout",
            Self::ClarificationUnresolved => "ClarificationUnresolved",
            Self::ComposerCycleLimitExceeded => "ComposerCycleLimitExceeded",
            Self::IntegrationUnresolved => "IntegrationUnresolved",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SubTaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One unit of work routed to a single specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    /// Unique across the whole plan. Assigned by [`Plan::push_stage`] when empty.
    pub id: String,
    pub specialist: String,
    /// Current instruction; rewritten by the optimizer and by clarification answers.
    pub instruction: String,
    /// Instruction as produced by the splitter or composer.
    pub original_instruction: String,
    pub stage: usize,
    pub status: SubTaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SubTaskError>,
    /// Dispatch attempts made so far (first try included).
    pub attempts: u32,
    /// SubTasks whose integration issues this one repairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubTask {
    /// A SubTask not yet placed in a plan.
    pub fn draft(specialist: impl Into<String>, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        Self {
            id: String::new(),
            specialist: specialist.into(),
            original_instruction: instruction.clone(),
            instruction,
            stage: 0,
            status: SubTaskStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            remediates: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_remediates(mut self, ids: Vec<String>) -> Self {
        self.remediates = ids;
        self
    }

    /// Replace the instruction text. The assigned specialist never changes.
    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.instruction = instruction.into();
    }

    pub fn mark_running(&mut self) {
        self.status = SubTaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self, payload: String, attempts: u32) {
        self.status = SubTaskStatus::Succeeded;
        self.result = Some(payload);
        self.error = None;
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: SubTaskError, attempts: u32) {
        self.status = SubTaskStatus::Failed;
        self.error = Some(error);
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
    }

    /// Skip a SubTask that has not reached a terminal status. Terminal ones are left alone.
    pub fn mark_skipped(&mut self, error: Option<SubTaskError>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SubTaskStatus::Skipped;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

// ─── Stage ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!(
                "Unknown strategy '{}'. Use 'sequential' or 'parallel'.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StageKind {
    /// Produced by the splitter.
    Work,
    /// Appended by the composer to repair integration issues.
    Remediation { cycle: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Skipped,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub index: usize,
    pub kind: StageKind,
    /// Per-stage strategy; `None` falls back to the run config, then the stage default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
    pub status: StageStatus,
    pub subtasks: Vec<SubTask>,
}

impl Stage {
    /// Parallel when the stage spans more than one specialist, sequential otherwise.
    pub fn default_strategy(&self) -> ExecutionStrategy {
        let distinct: HashSet<&str> = self.subtasks.iter().map(|s| s.specialist.as_str()).collect();
        if distinct.len() > 1 {
            ExecutionStrategy::Parallel
        } else {
            ExecutionStrategy::Sequential
        }
    }

    pub fn effective_strategy(&self, configured: Option<ExecutionStrategy>) -> ExecutionStrategy {
        configured
            .or(self.strategy)
            .unwrap_or_else(|| self.default_strategy())
    }

    pub fn has_failures(&self) -> bool {
        self.subtasks.iter().any(|s| s.status == SubTaskStatus::Failed)
    }
}

// ─── Plan ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    AwaitingClarification,
    Ready,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Failed | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::AwaitingClarification => "AWAITING_CLARIFICATION",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::PartiallyFailed => "PARTIALLY_FAILED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the splitter arrived at the plan's specialists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Routing {
    Forced { category: String },
    Classified { specialists: Vec<String> },
    /// Classification was ambiguous and the default specialist took the task.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub task: Task,
    pub routing: Routing,
    pub stages: Vec<Stage>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clarifications: Vec<ClarificationRequest>,
    #[serde(default)]
    pub composer_reports: Vec<ComposerReport>,
    /// Plan-level failure detail, e.g. an abandoned clarification or the composer limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SubTaskError>,
}

impl Plan {
    /// An empty plan. Callers add stages with [`Plan::push_stage`] and then [`Plan::validate`].
    pub fn new(task: Task, routing: Routing) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task,
            routing,
            stages: Vec::new(),
            status: PlanStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            clarifications: Vec::new(),
            composer_reports: Vec::new(),
            error: None,
        }
    }

    /// Append a stage. SubTasks without an id get `st-<n>`, numbered across the whole plan.
    pub fn push_stage(&mut self, kind: StageKind, mut subtasks: Vec<SubTask>) -> Result<usize> {
        if subtasks.is_empty() {
            return Err(OrchestrationError::InvalidPlan(
                "a stage must contain at least one SubTask".to_string(),
            ));
        }

        let index = self.stages.len();
        let mut taken: HashSet<String> = self.subtasks().map(|s| s.id.clone()).collect();
        let mut next = taken.len() + 1;

        for subtask in subtasks.iter_mut() {
            if subtask.id.is_empty() {
                while taken.contains(&format!("st-{}", next)) {
                    next += 1;
                }
                subtask.id = format!("st-{}", next);
                next += 1;
            }
            if !taken.insert(subtask.id.clone()) {
                return Err(OrchestrationError::InvalidPlan(format!(
                    "duplicate SubTask id '{}'",
                    subtask.id
                )));
            }
            subtask.stage = index;
        }

        self.stages.push(Stage {
            index,
            kind,
            strategy: None,
            status: StageStatus::Pending,
            subtasks,
        });
        Ok(index)
    }

    /// Check the structural invariants: at least one stage, no empty stage, unique ids.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(OrchestrationError::InvalidPlan("plan has no stages".to_string()));
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.subtasks.is_empty() {
                return Err(OrchestrationError::InvalidPlan(format!(
                    "stage {} is empty",
                    stage.index
                )));
            }
            for subtask in &stage.subtasks {
                if !seen.insert(subtask.id.as_str()) {
                    return Err(OrchestrationError::InvalidPlan(format!(
                        "duplicate SubTask id '{}'",
                        subtask.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn subtasks(&self) -> impl Iterator<Item = &SubTask> {
        self.stages.iter().flat_map(|s| s.subtasks.iter())
    }

    pub fn subtasks_mut(&mut self) -> impl Iterator<Item = &mut SubTask> {
        self.stages.iter_mut().flat_map(|s| s.subtasks.iter_mut())
    }

    pub fn subtask(&self, id: &str) -> Option<&SubTask> {
        self.subtasks().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut SubTask> {
        self.subtasks_mut().find(|s| s.id == id)
    }

    /// Distinct specialist ids in first-appearance order.
    pub fn specialists(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.subtasks()
            .filter(|s| seen.insert(s.specialist.clone()))
            .map(|s| s.specialist.clone())
            .collect()
    }

    pub fn open_clarifications(&self) -> impl Iterator<Item = &ClarificationRequest> {
        self.clarifications
            .iter()
            .filter(|c| c.status == ClarificationStatus::Open)
    }

    pub fn latest_composer_report(&self) -> Option<&ComposerReport> {
        self.composer_reports.last()
    }

    /// Skip every stage from `from_stage` on, leaving terminal SubTasks untouched.
    pub fn skip_stages_from(&mut self, from_stage: usize, error: Option<SubTaskError>) {
        for stage in self.stages.iter_mut().skip(from_stage) {
            for subtask in stage.subtasks.iter_mut() {
                subtask.mark_skipped(error.clone());
            }
            if !stage.status.is_terminal() {
                stage.status = StageStatus::Skipped;
            }
        }
    }

    /// Overall outcome derived from SubTask statuses, ignoring cancellation.
    pub fn execution_outcome(&self) -> PlanStatus {
        let total = self.subtasks().count();
        let succeeded = self
            .subtasks()
            .filter(|s| s.status == SubTaskStatus::Succeeded)
            .count();
        if total > 0 && succeeded == total {
            PlanStatus::Completed
        } else if succeeded == 0 {
            PlanStatus::Failed
        } else {
            PlanStatus::PartiallyFailed
        }
    }

    pub fn finish(&mut self, status: PlanStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(groups: Vec<Vec<&str>>) -> Plan {
        let mut plan = Plan::new(
            Task::new("Build a login page with authentication"),
            Routing::Classified {
                specialists: vec![],
            },
        );
        for group in groups {
            let subtasks = group
                .into_iter()
                .map(|s| SubTask::draft(s, format!("work for {}", s)))
                .collect();
            plan.push_stage(StageKind::Work, subtasks).unwrap();
        }
        plan
    }

    #[test]
    fn test_ids_are_unique_across_stages() {
        let plan = plan_with(vec![vec!["backend", "cloud"], vec!["frontend"]]);
        let ids: Vec<&str> = plan.subtasks().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["st-1", "st-2", "st-3"]);
        assert_eq!(plan.subtask("st-3").unwrap().stage, 1);
        plan.validate().unwrap();
    }

    #[test]
    fn test_push_stage_rejects_empty_and_duplicates() {
        let mut plan = plan_with(vec![vec!["backend"]]);
        assert!(plan.push_stage(StageKind::Work, vec![]).is_err());

        let mut dup = SubTask::draft("frontend", "x");
        dup.id = "st-1".to_string();
        assert!(plan.push_stage(StageKind::Work, vec![dup]).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_plan() {
        let plan = plan_with(vec![]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_specialists_in_first_appearance_order() {
        let plan = plan_with(vec![vec!["backend"], vec!["frontend", "backend"]]);
        assert_eq!(plan.specialists(), vec!["backend", "frontend"]);
    }

    #[test]
    fn test_default_strategy_depends_on_stage() {
        let plan = plan_with(vec![vec!["backend", "cloud"], vec!["frontend"]]);
        assert_eq!(plan.stages[0].default_strategy(), ExecutionStrategy::Parallel);
        assert_eq!(plan.stages[1].default_strategy(), ExecutionStrategy::Sequential);
        assert_eq!(
            plan.stages[1].effective_strategy(Some(ExecutionStrategy::Parallel)),
            ExecutionStrategy::Parallel
        );
    }

    #[test]
    fn test_skip_keeps_terminal_subtasks() {
        let mut plan = plan_with(vec![vec!["backend", "cloud"], vec!["frontend"]]);
        plan.subtask_mut("st-1").unwrap().mark_succeeded("ok".into(), 1);
        plan.skip_stages_from(0, None);
        assert_eq!(plan.subtask("st-1").unwrap().status, SubTaskStatus::Succeeded);
        assert_eq!(plan.subtask("st-2").unwrap().status, SubTaskStatus::Skipped);
        assert_eq!(plan.subtask("st-3").unwrap().status, SubTaskStatus::Skipped);
        assert_eq!(plan.stages[1].status, StageStatus::Skipped);
    }

    #[test]
    fn test_execution_outcome() {
        let mut plan = plan_with(vec![vec!["backend"], vec!["frontend"]]);
        plan.subtask_mut("st-1").unwrap().mark_succeeded("ok".into(), 1);
        assert_eq!(plan.execution_outcome(), PlanStatus::PartiallyFailed);
        plan.subtask_mut("st-2").unwrap().mark_succeeded("ok".into(), 2);
        assert_eq!(plan.execution_outcome(), PlanStatus::Completed);
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_value(PlanStatus::AwaitingClarification).unwrap();
        assert_eq!(json, "AWAITING_CLARIFICATION");
        for kind in [ErrorKind::Timeout, ErrorKind::ComposerCycleLimitExceeded, ErrorKind::IntegrationUnresolved] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }
}
