//! Execution engine: drives a plan's stages against an agent executor.
//!
//! ```text
//!  stage 0 ──join──▶ stage 1 ──join──▶ … ──▶ outcome
//!    │
//!    ├─ admission: ≤ limit in flight (1 sequential, maxInFlight parallel),
//!    │             declaration order
//!    ├─ dispatch:  timeout(invoke) × (maxRetries + 1) attempts
//!    └─ bookkeeping: the only writer of SubTask status/result
//! ```
//!
//! Dispatch futures never touch the plan. They carry an owned request in and
//! a [`DispatchOutcome`] out; bookkeeping applies the outcome under the plan's
//! write lock. A stage is complete when every SubTask is terminal, and the
//! next stage is not admitted before that join.
//!
//! Cancellation stops admission immediately. Dispatches still in flight are
//! dropped (a command executor's child is killed with them) and recorded as
//! `Skipped` with [`ErrorKind::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::executor::{AgentExecutor, AgentOutput, DispatchRequest};
use crate::models::{
    ErrorKind, ExecutionStrategy, Plan, StageStatus, SubTaskError, SubTaskStatus,
};
use crate::specialist::SpecialistRegistry;

/// Result of every attempt made for one SubTask.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub subtask_id: String,
    pub result: Result<AgentOutput, SubTaskError>,
    pub attempts: u32,
}

/// How a run over a range of stages ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Every stage ran to a terminal status.
    Finished,
    /// Fail-fast stopped the plan after this stage partially failed.
    Halted { stage: usize },
    Cancelled,
}

pub struct Engine {
    executor: Arc<dyn AgentExecutor>,
    registry: Arc<SpecialistRegistry>,
    config: RunConfig,
}

struct Queued {
    subtask_id: String,
    specialist: String,
    instruction: String,
}

impl Engine {
    pub fn new(executor: Arc<dyn AgentExecutor>, registry: Arc<SpecialistRegistry>, config: RunConfig) -> Self {
        Self {
            executor,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run stages `from_stage..` in order.
    pub async fn run_stages(
        &self,
        plan: &Arc<RwLock<Plan>>,
        from_stage: usize,
        cancel: &CancellationToken,
    ) -> EngineOutcome {
        let stage_count = plan.read().await.stages.len();

        for index in from_stage..stage_count {
            if cancel.is_cancelled() {
                self.skip_cancelled(plan, index).await;
                return EngineOutcome::Cancelled;
            }

            match self.run_stage(plan, index, cancel).await {
                StageStatus::Cancelled => {
                    self.skip_cancelled(plan, index + 1).await;
                    return EngineOutcome::Cancelled;
                }
                StageStatus::PartiallyFailed if self.config.fail_fast_on_partial_stage_failure => {
                    let mut guard = plan.write().await;
                    tracing::warn!(
                        plan_id = %guard.id,
                        "[Engine] Stage {} partially failed, skipping {} later stage(s)",
                        index,
                        stage_count - index - 1
                    );
                    guard.skip_stages_from(index + 1, None);
                    return EngineOutcome::Halted { stage: index };
                }
                _ => {}
            }
        }
        EngineOutcome::Finished
    }

    /// Run one stage to a terminal status and return it.
    pub async fn run_stage(
        &self,
        plan: &Arc<RwLock<Plan>>,
        index: usize,
        cancel: &CancellationToken,
    ) -> StageStatus {
        let (plan_id, workspace, strategy, queue) = {
            let mut guard = plan.write().await;
            let plan_id = guard.id.clone();
            let workspace = guard.task.workspace.clone();
            let Some(stage) = guard.stages.get_mut(index) else {
                return StageStatus::Skipped;
            };
            stage.status = StageStatus::Running;
            let strategy = stage.effective_strategy(self.config.strategy);
            stage.strategy = Some(strategy);
            let queue: Vec<Queued> = stage
                .subtasks
                .iter()
                .filter(|s| !s.status.is_terminal())
                .map(|s| Queued {
                    subtask_id: s.id.clone(),
                    specialist: s.specialist.clone(),
                    instruction: s.instruction.clone(),
                })
                .collect();
            (plan_id, workspace, strategy, queue)
        };

        let limit = match strategy {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::Parallel => self.config.max_in_flight.max(1),
        };
        tracing::info!(
            plan_id = %plan_id,
            "[Engine] Stage {} started: {} SubTask(s), {:?}, limit {}",
            index,
            queue.len(),
            strategy,
            limit
        );

        let timeout = self.config.per_dispatch_timeout();
        let max_attempts = self.config.max_attempts();
        let mut queue = queue.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < limit && !cancel.is_cancelled() {
                let Some(next) = queue.next() else { break };

                let specialist = match self.registry.resolve(&next.specialist) {
                    Ok(def) => def,
                    Err(e) => {
                        tracing::warn!(
                            plan_id = %plan_id,
                            subtask_id = %next.subtask_id,
                            "[Engine] {}",
                            e
                        );
                        self.record(
                            plan,
                            DispatchOutcome {
                                subtask_id: next.subtask_id,
                                result: Err(SubTaskError::new(ErrorKind::SpecialistNotFound, e.to_string())),
                                attempts: 0,
                            },
                        )
                        .await;
                        continue;
                    }
                };

                if let Some(subtask) = plan.write().await.subtask_mut(&next.subtask_id) {
                    subtask.mark_running();
                }
                let request = DispatchRequest {
                    plan_id: plan_id.clone(),
                    subtask_id: next.subtask_id,
                    specialist,
                    instruction: next.instruction,
                    attempt: 1,
                    timeout,
                    workspace: workspace.clone(),
                };
                in_flight.push(dispatch(self.executor.clone(), request, max_attempts, timeout));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(outcome) = in_flight.next() => self.record(plan, outcome).await,
            }
        }
        drop(in_flight);

        let mut guard = plan.write().await;
        let cancelled = cancel.is_cancelled();
        let Some(stage) = guard.stages.get_mut(index) else {
            return StageStatus::Skipped;
        };

        if cancelled {
            for subtask in stage.subtasks.iter_mut() {
                let message = if subtask.status == SubTaskStatus::Running {
                    "dispatch abandoned: plan cancelled"
                } else {
                    "not started: plan cancelled"
                };
                subtask.mark_skipped(Some(SubTaskError::new(ErrorKind::Cancelled, message)));
            }
        }

        stage.status = if cancelled {
            StageStatus::Cancelled
        } else if stage.has_failures() {
            StageStatus::PartiallyFailed
        } else {
            StageStatus::Completed
        };

        let succeeded = stage
            .subtasks
            .iter()
            .filter(|s| s.status == SubTaskStatus::Succeeded)
            .count();
        tracing::info!(
            plan_id = %plan_id,
            "[Engine] Stage {} {:?}: {}/{} succeeded",
            index,
            stage.status,
            succeeded,
            stage.subtasks.len()
        );
        stage.status
    }

    async fn record(&self, plan: &Arc<RwLock<Plan>>, outcome: DispatchOutcome) {
        let mut guard = plan.write().await;
        let Some(subtask) = guard.subtask_mut(&outcome.subtask_id) else {
            return;
        };
        match outcome.result {
            Ok(output) => {
                tracing::info!(
                    subtask_id = %subtask.id,
                    specialist = %subtask.specialist,
                    attempt = outcome.attempts,
                    "[Engine] SubTask succeeded"
                );
                subtask.mark_succeeded(output.content, outcome.attempts);
            }
            Err(error) => {
                tracing::warn!(
                    subtask_id = %subtask.id,
                    specialist = %subtask.specialist,
                    attempt = outcome.attempts,
                    "[Engine] SubTask failed ({}): {}",
                    error.kind,
                    error.message
                );
                subtask.mark_failed(error, outcome.attempts);
            }
        }
    }

    async fn skip_cancelled(&self, plan: &Arc<RwLock<Plan>>, from_stage: usize) {
        plan.write().await.skip_stages_from(
            from_stage,
            Some(SubTaskError::new(ErrorKind::Cancelled, "not started: plan cancelled")),
        );
    }
}

/// Every attempt for one SubTask. Attempts are independent: the same request
/// is resubmitted and nothing carries over from a failed attempt.
async fn dispatch(
    executor: Arc<dyn AgentExecutor>,
    request: DispatchRequest,
    max_attempts: u32,
    timeout: Duration,
) -> DispatchOutcome {
    let subtask_id = request.subtask_id.clone();
    let mut last_error = SubTaskError::new(ErrorKind::ExecutorFailure, "no attempt was made");
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let mut attempt_request = request.clone();
        attempt_request.attempt = attempt;

        tracing::debug!(
            subtask_id = %subtask_id,
            specialist = %request.specialist.id,
            attempt,
            "[Engine] Dispatching via {}",
            executor.name()
        );

        let error = match tokio::time::timeout(timeout, executor.invoke(attempt_request)).await {
            Ok(Ok(output)) => {
                return DispatchOutcome {
                    subtask_id,
                    result: Ok(output),
                    attempts: attempt,
                }
            }
            Ok(Err(e)) => SubTaskError::new(e.kind(), e.to_string()),
            Err(_) => SubTaskError::new(
                ErrorKind::Timeout,
                format!("no response within {}s", timeout.as_secs_f64()),
            ),
        };

        if !error.kind.is_retryable() {
            tracing::warn!(
                subtask_id = %subtask_id,
                attempt,
                "[Engine] Attempt failed ({}), not retrying: {}",
                error.kind,
                error.message
            );
            return DispatchOutcome {
                subtask_id,
                result: Err(error),
                attempts: attempt,
            };
        }

        if attempt < max_attempts {
            tracing::warn!(
                subtask_id = %subtask_id,
                attempt,
                "[Engine] Attempt failed ({}), retrying: {}",
                error.kind,
                error.message
            );
        }
        last_error = error;
    }

    DispatchOutcome {
        subtask_id,
        result: Err(last_error),
        attempts: max_attempts,
    }
}
