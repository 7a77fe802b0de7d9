//! Orchestrator: one task from text to a finished plan.
//!
//! ```text
//!  Task ─▶ Splitter ─▶ Plan (PENDING)
//!                        │ clarification enabled and questions produced
//!                        ├──────────▶ AWAITING_CLARIFICATION ──answer/bypass──┐
//!                        │                       │ abandon / cancel           │
//!                        │                       ▼                            │
//!                        │                 FAILED / CANCELLED                 │
//!                        ▼◀───────────────────────────────────────────────────┘
//!                  Prompt optimizer (per SubTask, degrade on error)
//!                        ▼
//!                  READY ─▶ RUNNING ─▶ Engine ─▶ Composer (> 1 specialist)
//!                                                   ▼
//!                               COMPLETED / PARTIALLY_FAILED / FAILED / CANCELLED
//! ```
//!
//! The gate runs in rounds: a fully answered round goes back to `PENDING`
//! and the clarifier is asked again, with the answers so far, until it has
//! enough information or `maxClarificationRounds` is reached.
//!
//! [`Orchestrator::start`] spawns the run on a tokio task and returns a
//! [`PlanRun`] handle. The plan lives behind `Arc<RwLock<Plan>>`: the driver
//! and the engine's bookkeeping write it, handles only read it, except for
//! resolving clarification requests while the run is suspended at the gate.

use std::sync::Arc;

use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clarifier::{
    work_subtask_ids, AgentClarifier, ClarificationDraft, Clarifier, ADDITIONAL_CONTEXT_QUESTION,
};
use crate::composer::{Composer, ComposerOutcome, ContractInspector, IntegrationInspector};
use crate::config::RunConfig;
use crate::engine::{Engine, EngineOutcome};
use crate::error::{OrchestrationError, Result};
use crate::executor::AgentExecutor;
use crate::models::{
    ClarificationRequest, ClarificationStatus, ErrorKind, Plan, PlanStatus, SubTaskError, Task,
};
use crate::optimizer::{refine_pending, AgentPromptOptimizer, PassthroughOptimizer, PromptOptimizer};
use crate::persistence::PlanWriter;
use crate::specialist::SpecialistRegistry;
use crate::splitter::{ClassificationStrategy, Splitter};

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<SpecialistRegistry>,
    executor: Arc<dyn AgentExecutor>,
    config: RunConfig,
    splitter: Arc<Splitter>,
    optimizer: Option<Arc<dyn PromptOptimizer>>,
    clarifier: Option<Arc<dyn Clarifier>>,
    inspector: Arc<dyn IntegrationInspector>,
    writer: Option<PlanWriter>,
}

impl Orchestrator {
    /// Keyword classification and contract inspection; the prompt engineer
    /// optimizes and clarifies when the registry has one.
    pub fn new(registry: Arc<SpecialistRegistry>, executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            registry,
            executor,
            config: RunConfig::default(),
            splitter: Arc::new(Splitter::keyword()),
            optimizer: None,
            clarifier: None,
            inspector: Arc::new(ContractInspector),
            writer: None,
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ClassificationStrategy>) -> Self {
        self.splitter = Arc::new(Splitter::new(classifier));
        self
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn PromptOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_clarifier(mut self, clarifier: Arc<dyn Clarifier>) -> Self {
        self.clarifier = Some(clarifier);
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn IntegrationInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_writer(mut self, writer: PlanWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SpecialistRegistry> {
        &self.registry
    }

    /// Swap in a freshly loaded registry snapshot. Runs already started keep theirs.
    pub fn refresh_registry(&mut self) {
        self.registry = Arc::new(self.registry.refresh());
    }

    /// Decompose `task` without executing anything.
    pub async fn plan(&self, task: &Task) -> Result<Plan> {
        self.config.validate()?;
        self.splitter.split(task, &self.registry, &self.config).await
    }

    /// Decompose `task` and start running it in the background.
    pub async fn start(&self, task: Task) -> Result<PlanRun> {
        let plan = self.plan(&task).await?;
        let plan_id = plan.id.clone();
        let plan = Arc::new(RwLock::new(plan));
        let cancel = CancellationToken::new();
        let gate = Arc::new(Notify::new());
        let (status_tx, status_rx) = watch::channel(PlanStatus::Pending);
        let status_tx = Arc::new(status_tx);

        let optimizer = self.resolve_optimizer();
        let driver = Driver {
            engine: Engine::new(self.executor.clone(), self.registry.clone(), self.config.clone()),
            composer: Composer::new(self.inspector.clone()).with_optimizer(
                self.config.optimization_enabled.then(|| optimizer.clone()),
                self.config.max_in_flight,
            ),
            registry: self.registry.clone(),
            config: self.config.clone(),
            optimizer,
            clarifier: self.resolve_clarifier(),
            writer: self.writer.clone(),
            plan: plan.clone(),
            cancel: cancel.clone(),
            gate: gate.clone(),
            status_tx: status_tx.clone(),
        };

        tracing::info!(plan_id = %plan_id, "[Orchestrator] Starting run");
        let handle = tokio::spawn(driver.drive());

        Ok(PlanRun {
            plan,
            cancel,
            gate,
            status: status_rx,
            status_tx,
            handle,
        })
    }

    /// Start, bypass any clarification gate, and wait for the final plan.
    pub async fn run(&self, task: Task) -> Result<Plan> {
        let run = self.start(task).await?;
        while !run.wait_for_clarification().await.is_empty() {
            run.bypass_clarifications().await?;
        }
        run.wait().await
    }

    fn resolve_optimizer(&self) -> Arc<dyn PromptOptimizer> {
        if let Some(optimizer) = &self.optimizer {
            return optimizer.clone();
        }
        match AgentPromptOptimizer::from_registry(
            self.executor.clone(),
            &self.registry,
            self.config.per_dispatch_timeout(),
        ) {
            Ok(optimizer) => Arc::new(optimizer),
            Err(_) => Arc::new(PassthroughOptimizer),
        }
    }

    fn resolve_clarifier(&self) -> Option<Arc<dyn Clarifier>> {
        if let Some(clarifier) = &self.clarifier {
            return Some(clarifier.clone());
        }
        AgentClarifier::from_registry(
            self.executor.clone(),
            &self.registry,
            self.config.per_dispatch_timeout(),
        )
        .ok()
        .map(|c| Arc::new(c) as Arc<dyn Clarifier>)
    }
}

// ─── Run handle ───────────────────────────────────────────────────────────

/// Handle to a plan running in the background.
pub struct PlanRun {
    plan: Arc<RwLock<Plan>>,
    cancel: CancellationToken,
    gate: Arc<Notify>,
    status: watch::Receiver<PlanStatus>,
    status_tx: Arc<watch::Sender<PlanStatus>>,
    handle: JoinHandle<Plan>,
}

impl PlanRun {
    pub async fn snapshot(&self) -> Plan {
        self.plan.read().await.clone()
    }

    pub fn status(&self) -> PlanStatus {
        *self.status.borrow()
    }

    pub async fn pending_clarifications(&self) -> Vec<ClarificationRequest> {
        self.plan.read().await.open_clarifications().cloned().collect()
    }

    /// Wait until the run either suspends at the clarification gate or moves
    /// past it. Returns the open requests of the current round, empty once
    /// there is nothing left to answer. Closing a round puts the run back to
    /// `Pending` while the clarifier prepares the next one, so callers loop
    /// until this comes back empty.
    pub async fn wait_for_clarification(&self) -> Vec<ClarificationRequest> {
        let mut status = self.status.clone();
        let _ = status.wait_for(|s| *s != PlanStatus::Pending).await;
        self.pending_clarifications().await
    }

    /// Answer one request, one answer per question, in question order. The
    /// answers are merged into the blocked SubTasks' instructions.
    pub async fn answer(&self, request_id: &str, answers: Vec<String>) -> Result<()> {
        {
            let mut plan = self.plan.write().await;
            ensure_awaiting(&plan)?;

            let request = plan
                .clarifications
                .iter_mut()
                .find(|c| c.id == request_id && c.is_open())
                .ok_or_else(|| OrchestrationError::ClarificationNotFound(request_id.to_string()))?;
            if answers.len() != request.questions.len() {
                return Err(OrchestrationError::AnswerCountMismatch {
                    id: request_id.to_string(),
                    expected: request.questions.len(),
                    actual: answers.len(),
                });
            }
            request.answers = answers;
            request.resolve(ClarificationStatus::Answered);
            let block = request.answers_block();
            let blocked = request.subtask_ids.clone();

            for id in blocked {
                if let Some(subtask) = plan.subtask_mut(&id) {
                    let merged = format!("{}\n\n{}", subtask.instruction, block);
                    subtask.set_instruction(merged);
                }
            }
            tracing::info!(plan_id = %plan.id, "[Orchestrator] Clarification {} answered", request_id);
            self.close_round(&mut plan);
        }
        self.gate.notify_one();
        Ok(())
    }

    /// Proceed with every open request unanswered. Returns how many were open.
    pub async fn bypass_clarifications(&self) -> Result<usize> {
        self.close_open(ClarificationStatus::Bypassed).await
    }

    /// Give up on the open requests; the plan fails with `ClarificationUnresolved`.
    pub async fn abandon_clarifications(&self) -> Result<usize> {
        self.close_open(ClarificationStatus::Abandoned).await
    }

    async fn close_open(&self, status: ClarificationStatus) -> Result<usize> {
        let closed = {
            let mut plan = self.plan.write().await;
            ensure_awaiting(&plan)?;
            let mut closed = 0;
            for request in plan.clarifications.iter_mut().filter(|c| c.is_open()) {
                request.resolve(status);
                closed += 1;
            }
            tracing::info!(plan_id = %plan.id, "[Orchestrator] {} clarification(s) {:?}", closed, status);
            if status != ClarificationStatus::Abandoned {
                self.close_round(&mut plan);
            }
            closed
        };
        self.gate.notify_one();
        Ok(closed)
    }

    /// Leave the gate state once the round has no open request, so waiters
    /// block until the next round or the run moves on.
    fn close_round(&self, plan: &mut Plan) {
        if plan.open_clarifications().next().is_none() {
            plan.status = PlanStatus::Pending;
            self.status_tx.send_replace(PlanStatus::Pending);
        }
    }

    /// Stop dispatching; in-flight work is abandoned and the plan ends `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish and return the final plan.
    pub async fn wait(self) -> Result<Plan> {
        self.handle
            .await
            .map_err(|e| OrchestrationError::Driver(e.to_string()))
    }
}

fn ensure_awaiting(plan: &Plan) -> Result<()> {
    if plan.status == PlanStatus::AwaitingClarification {
        Ok(())
    } else {
        Err(OrchestrationError::NotAwaitingClarification(plan.status.to_string()))
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────

struct Driver {
    engine: Engine,
    composer: Composer,
    registry: Arc<SpecialistRegistry>,
    config: RunConfig,
    optimizer: Arc<dyn PromptOptimizer>,
    clarifier: Option<Arc<dyn Clarifier>>,
    writer: Option<PlanWriter>,
    plan: Arc<RwLock<Plan>>,
    cancel: CancellationToken,
    gate: Arc<Notify>,
    status_tx: Arc<watch::Sender<PlanStatus>>,
}

/// How the clarification gate was left.
enum Gate {
    Proceed,
    Abandoned,
    Cancelled,
}

/// How one round of clarification requests was closed.
enum RoundEnd {
    Answered,
    Bypassed,
    Abandoned,
    Cancelled,
}

impl Driver {
    async fn drive(self) -> Plan {
        if self.config.clarification_enabled {
            if let Some(clarifier) = self.clarifier.clone() {
                match self.clarification_gate(clarifier.as_ref()).await {
                    Gate::Proceed => {}
                    Gate::Abandoned => return self.conclude(PlanStatus::Failed).await,
                    Gate::Cancelled => return self.conclude_cancelled().await,
                }
            }
        }
        if self.cancel.is_cancelled() {
            return self.conclude_cancelled().await;
        }

        self.optimize().await;
        self.set_status(PlanStatus::Ready).await;
        self.persist().await;
        self.set_status(PlanStatus::Running).await;

        let mut status = match self.engine.run_stages(&self.plan, 0, &self.cancel).await {
            EngineOutcome::Cancelled => return self.conclude(PlanStatus::Cancelled).await,
            EngineOutcome::Halted { .. } => PlanStatus::Failed,
            EngineOutcome::Finished => self.plan.read().await.execution_outcome(),
        };

        let applies = Composer::applies_to(&*self.plan.read().await);
        if self.config.composer_enabled && applies {
            let outcome = self
                .composer
                .run(
                    &self.plan,
                    &self.engine,
                    &self.registry,
                    &self.cancel,
                    self.config.max_composer_cycles,
                    status != PlanStatus::Failed,
                )
                .await;
            match outcome {
                ComposerOutcome::Cancelled => return self.conclude(PlanStatus::Cancelled).await,
                ComposerOutcome::Consistent => {
                    if status != PlanStatus::Failed {
                        status = self.plan.read().await.execution_outcome();
                    }
                }
                ComposerOutcome::Unresolved { cause, reason } => {
                    if status != PlanStatus::Failed {
                        let mut plan = self.plan.write().await;
                        status = match plan.execution_outcome() {
                            PlanStatus::Completed => PlanStatus::PartiallyFailed,
                            other => other,
                        };
                        tracing::warn!(plan_id = %plan.id, "[Orchestrator] Integration unresolved: {}", reason);
                        plan.error = Some(SubTaskError::new(cause.error_kind(), reason));
                    }
                }
            }
        }

        self.conclude(status).await
    }

    async fn set_status(&self, status: PlanStatus) {
        self.plan.write().await.status = status;
        self.status_tx.send_replace(status);
    }

    /// Question rounds until the clarifier has enough information, the
    /// caller bypasses, or `maxClarificationRounds` is used up. Clarifier
    /// failures are logged and the plan proceeds with the answers it has.
    async fn clarification_gate(&self, clarifier: &dyn Clarifier) -> Gate {
        let max_questions = self.config.max_clarification_questions;
        let max_rounds = self.config.max_clarification_rounds.max(1);

        for round in 1..=max_rounds {
            let snapshot = self.plan.read().await.clone();
            let drafts = tokio::select! {
                _ = self.cancel.cancelled() => return Gate::Cancelled,
                drafts = clarifier.clarify(&snapshot, max_questions) => drafts,
            };
            let mut drafts: Vec<_> = match drafts {
                Ok(drafts) => drafts.into_iter().filter(|d| !d.questions.is_empty()).collect(),
                Err(e) => {
                    tracing::warn!(plan_id = %snapshot.id, "[Orchestrator] {} clarifier failed, proceeding: {}", clarifier.name(), e);
                    return Gate::Proceed;
                }
            };

            if drafts.is_empty() {
                let enough = tokio::select! {
                    _ = self.cancel.cancelled() => return Gate::Cancelled,
                    enough = clarifier.enough_info(&snapshot) => enough,
                };
                match enough {
                    Ok(true) => return Gate::Proceed,
                    Ok(false) => drafts.push(ClarificationDraft {
                        subtask_ids: work_subtask_ids(&snapshot),
                        questions: vec![ADDITIONAL_CONTEXT_QUESTION.to_string()],
                    }),
                    Err(e) => {
                        tracing::warn!(plan_id = %snapshot.id, "[Orchestrator] {} completeness check failed, proceeding: {}", clarifier.name(), e);
                        return Gate::Proceed;
                    }
                }
            }

            let first = {
                let mut plan = self.plan.write().await;
                let first = plan.clarifications.len();
                for draft in drafts {
                    let questions = draft.questions.into_iter().take(max_questions).collect();
                    let index = plan.clarifications.len();
                    let request = ClarificationRequest::new(&snapshot.id, index, draft.subtask_ids, questions);
                    plan.clarifications.push(request);
                }
                tracing::info!(
                    plan_id = %plan.id,
                    "[Orchestrator] Round {}: awaiting {} clarification request(s)",
                    round,
                    plan.clarifications.len() - first
                );
                first
            };
            self.set_status(PlanStatus::AwaitingClarification).await;

            match self.await_round(first).await {
                RoundEnd::Answered => {}
                RoundEnd::Bypassed => return Gate::Proceed,
                RoundEnd::Abandoned => {
                    let mut plan = self.plan.write().await;
                    let error = SubTaskError::new(
                        ErrorKind::ClarificationUnresolved,
                        "clarification abandoned by the caller",
                    );
                    for request in plan.clarifications.iter_mut().filter(|c| c.is_open()) {
                        request.resolve(ClarificationStatus::Abandoned);
                    }
                    plan.skip_stages_from(0, Some(error.clone()));
                    plan.error = Some(error);
                    return Gate::Abandoned;
                }
                RoundEnd::Cancelled => return Gate::Cancelled,
            }
        }

        tracing::info!(
            "[Orchestrator] Clarification round limit ({}) reached, proceeding",
            max_rounds
        );
        Gate::Proceed
    }

    /// Wait until every request from index `first` on is closed.
    async fn await_round(&self, first: usize) -> RoundEnd {
        loop {
            {
                let plan = self.plan.read().await;
                let round = plan.clarifications.get(first..).unwrap_or_default();
                if round.iter().any(|c| c.status == ClarificationStatus::Abandoned) {
                    return RoundEnd::Abandoned;
                }
                if round.iter().all(|c| !c.is_open()) {
                    return if round.iter().any(|c| c.status == ClarificationStatus::Bypassed) {
                        RoundEnd::Bypassed
                    } else {
                        RoundEnd::Answered
                    };
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return RoundEnd::Cancelled,
                _ = self.gate.notified() => {}
            }
        }
    }

    async fn optimize(&self) {
        let optimizer = self.config.optimization_enabled.then_some(&self.optimizer);
        refine_pending(&self.plan, optimizer, self.config.max_in_flight, &self.cancel).await;
    }

    async fn conclude_cancelled(&self) -> Plan {
        {
            let mut plan = self.plan.write().await;
            for request in plan.clarifications.iter_mut().filter(|c| c.is_open()) {
                request.resolve(ClarificationStatus::Abandoned);
            }
            plan.skip_stages_from(
                0,
                Some(SubTaskError::new(ErrorKind::Cancelled, "not started: plan cancelled")),
            );
        }
        self.conclude(PlanStatus::Cancelled).await
    }

    /// Write the ready plan before any stage runs; `conclude` overwrites it.
    async fn persist(&self) {
        if let Some(writer) = &self.writer {
            let snapshot = self.plan.read().await.clone();
            writer.write_safe(&snapshot).await;
        }
    }

    async fn conclude(&self, status: PlanStatus) -> Plan {
        let plan = {
            let mut plan = self.plan.write().await;
            plan.finish(status);
            tracing::info!(plan_id = %plan.id, "[Orchestrator] Plan finished: {}", status);
            plan.clone()
        };
        self.status_tx.send_replace(status);

        if let Some(writer) = &self.writer {
            writer.write_safe(&plan).await;
        }
        plan
    }
}
