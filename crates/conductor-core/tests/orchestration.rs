mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{shared, ScriptedExecutor, Step};
use conductor_core::clarifier::{self, ClarificationDraft, Clarifier, ClarifierError};
use conductor_core::composer::{AgentInspector, Composer};
use conductor_core::models::{
    ClarificationStatus, ComposerVerdict, ErrorKind, ExecutionStrategy, Plan, PlanStatus, Routing,
    StageKind, SubTask, SubTaskStatus, Task,
};
use conductor_core::optimizer::{OptimizerError, PromptOptimizer};
use conductor_core::specialist::{IntegrationRole, SpecialistDef};
use conductor_core::{OrchestrationError, Orchestrator, PlanWriter, RunConfig, SpecialistRegistry};

const LOGIN_TASK: &str = "Build a login page with authentication";

const BACKEND_CONTRACT: &str = "Implemented POST /api/login.\n\
    Request: {\"email\": \"user@example.com\", \"password\": \"secret\"}\n\
    Response: {\"token\": \"jwt\"}";
const FRONTEND_MATCHING: &str = "LoginForm sends {\"email\": email, \"password\": password} \
    to POST /api/login and keeps the token.";
const FRONTEND_MISMATCHED: &str = "LoginForm sends {\"username\": name, \"password\": password} \
    to POST /api/signin.";

fn config() -> RunConfig {
    RunConfig {
        optimization_enabled: false,
        ..Default::default()
    }
}

fn orchestrator(executor: &Arc<ScriptedExecutor>, config: RunConfig) -> Orchestrator {
    Orchestrator::new(Arc::new(SpecialistRegistry::builtin()), executor.clone()).with_config(config)
}

fn stage_specialists(plan: &Plan) -> Vec<Vec<String>> {
    plan.stages
        .iter()
        .map(|s| s.subtasks.iter().map(|t| t.specialist.clone()).collect())
        .collect()
}

// ─── Planning ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_page_plans_backend_before_frontend() {
    let executor = shared(ScriptedExecutor::new());
    let plan = orchestrator(&executor, config())
        .plan(&Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(stage_specialists(&plan), vec![vec!["backend"], vec!["frontend"]]);
    assert!(matches!(plan.routing, Routing::Classified { .. }));
    assert_eq!(plan.status, PlanStatus::Pending);
    assert!(executor.dispatches().is_empty());
}

#[tokio::test]
async fn test_ids_unique_and_plan_never_empty() {
    let executor = shared(ScriptedExecutor::new());
    let orchestrator = orchestrator(&executor, config());

    for text in [LOGIN_TASK, "zzqx blorp", "Deploy the API to the cloud with a security review"] {
        let plan = orchestrator.plan(&Task::new(text)).await.unwrap();
        assert!(plan.subtasks().count() >= 1, "empty plan for {:?}", text);
        let ids: HashSet<&str> = plan.subtasks().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), plan.subtasks().count());
        assert!(plan.stages.iter().all(|s| !s.subtasks.is_empty()));
    }

    let fallback = orchestrator.plan(&Task::new("zzqx blorp")).await.unwrap();
    assert!(matches!(fallback.routing, Routing::Fallback { .. }));
    assert_eq!(stage_specialists(&fallback), vec![vec!["general"]]);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_planning() {
    let executor = shared(ScriptedExecutor::new());
    let bad = RunConfig {
        max_in_flight: 0,
        ..config()
    };
    let err = orchestrator(&executor, bad)
        .start(Task::new(LOGIN_TASK))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OrchestrationError::Config(_)));
}

// ─── End to end ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_page_end_to_end() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script("frontend", vec![Step::Reply(FRONTEND_MATCHING.into())]),
    );
    let plan = orchestrator(&executor, config())
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.finished_at.is_some());
    assert_eq!(plan.stages.len(), 2);
    assert!(plan.subtasks().all(|s| s.status == SubTaskStatus::Succeeded && s.attempts == 1));

    // Stage ordering: frontend is not dispatched before backend finished.
    let backend = &executor.dispatches_for("backend")[0];
    let frontend = &executor.dispatches_for("frontend")[0];
    assert!(frontend.started >= backend.finished.unwrap());

    assert_eq!(plan.composer_reports.len(), 1);
    assert_eq!(plan.composer_reports[0].verdict, ComposerVerdict::Consistent);
}

#[tokio::test]
async fn test_forced_frontend_runs_single_stage_without_composer() {
    let executor = shared(ScriptedExecutor::new());
    let plan = orchestrator(&executor, config())
        .run(Task::new(LOGIN_TASK).with_forced_category("frontend"))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(
        plan.routing,
        Routing::Forced {
            category: "frontend".into()
        }
    );
    assert_eq!(stage_specialists(&plan), vec![vec!["frontend"]]);
    assert!(plan.composer_reports.is_empty());
    assert_eq!(executor.dispatches().len(), 1);
}

#[tokio::test]
async fn test_unknown_forced_category_fails_without_dispatch() {
    let executor = shared(ScriptedExecutor::new());
    let plan = orchestrator(&executor, config())
        .run(Task::new(LOGIN_TASK).with_forced_category("wizard"))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Failed);
    let subtask = plan.subtask("st-1").unwrap();
    assert_eq!(subtask.error.as_ref().unwrap().kind, ErrorKind::SpecialistNotFound);
    assert_eq!(subtask.attempts, 0);
    assert!(executor.dispatches().is_empty());
}

#[tokio::test]
async fn test_same_task_gives_same_plan_shape() {
    let executor = shared(ScriptedExecutor::new());
    let orchestrator = orchestrator(&executor, config());
    let first = orchestrator.run(Task::new(LOGIN_TASK)).await.unwrap();
    let second = orchestrator.run(Task::new(LOGIN_TASK)).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(stage_specialists(&first), stage_specialists(&second));
    assert_eq!(first.status, second.status);
    let statuses = |p: &Plan| p.subtasks().map(|s| s.status).collect::<Vec<_>>();
    assert_eq!(statuses(&first), statuses(&second));
}

// ─── Retries and failure policy ───────────────────────────────────────────

#[tokio::test]
async fn test_retries_until_success() {
    let executor = shared(ScriptedExecutor::new().script(
        "backend",
        vec![
            Step::Fail("503".into()),
            Step::Fail("503".into()),
            Step::Reply("ok".into()),
        ],
    ));
    let plan = orchestrator(&executor, config())
        .run(Task::new("Add a health endpoint").with_forced_category("backend"))
        .await
        .unwrap();

    let subtask = plan.subtask("st-1").unwrap();
    assert_eq!(subtask.status, SubTaskStatus::Succeeded);
    assert_eq!(subtask.attempts, 3);
    assert_eq!(subtask.result.as_deref(), Some("ok"));
    let attempts: Vec<u32> = executor.dispatches().iter().map(|d| d.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(plan.status, PlanStatus::Completed);
}

#[tokio::test]
async fn test_retries_exhausted_fails_plan() {
    let executor = shared(ScriptedExecutor::new().script(
        "backend",
        vec![Step::Fail("boom".into()), Step::Fail("boom again".into())],
    ));
    let config = RunConfig {
        max_retries: 1,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new("Add a health endpoint").with_forced_category("backend"))
        .await
        .unwrap();

    let subtask = plan.subtask("st-1").unwrap();
    assert_eq!(subtask.status, SubTaskStatus::Failed);
    assert_eq!(subtask.attempts, 2);
    let error = subtask.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::ExecutorFailure);
    assert!(error.message.contains("boom again"));
    assert_eq!(plan.status, PlanStatus::Failed);
}

#[tokio::test]
async fn test_fail_fast_skips_later_stages() {
    let executor = shared(ScriptedExecutor::new().script("backend", vec![Step::Fail("down".into())]));
    let config = RunConfig {
        max_retries: 0,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.subtask("st-2").unwrap().status, SubTaskStatus::Skipped);
    assert!(executor.dispatches_for("frontend").is_empty());
    // Two specialists in the plan: the composer still reports exactly once.
    assert_eq!(plan.composer_reports.len(), 1);
}

#[tokio::test]
async fn test_best_effort_runs_later_stages() {
    let executor = shared(ScriptedExecutor::new().script("backend", vec![Step::Fail("down".into())]));
    let config = RunConfig {
        max_retries: 0,
        fail_fast_on_partial_stage_failure: false,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::PartiallyFailed);
    assert_eq!(plan.subtask("st-2").unwrap().status, SubTaskStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_reported_as_timeout() {
    let executor = shared(ScriptedExecutor::new().script("backend", vec![Step::Hang, Step::Hang]));
    let config = RunConfig {
        max_retries: 1,
        per_dispatch_timeout_secs: 30,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new("Add a health endpoint").with_forced_category("backend"))
        .await
        .unwrap();

    let subtask = plan.subtask("st-1").unwrap();
    assert_eq!(subtask.error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(subtask.attempts, 2);
}

// ─── Concurrency ──────────────────────────────────────────────────────────

fn widget_registry() -> Arc<SpecialistRegistry> {
    let defs = ["alpha", "beta", "gamma"]
        .into_iter()
        .map(|id| {
            let mut def = SpecialistDef::new(id, id);
            def.instructions = format!("You are {}.", id);
            def.keywords = vec!["widget".into()];
            def
        })
        .collect();
    Arc::new(SpecialistRegistry::from_defs(defs))
}

#[tokio::test(start_paused = true)]
async fn test_parallel_stage_respects_max_in_flight() {
    let executor = shared(ScriptedExecutor::with_delay(Duration::from_secs(1)));
    let config = RunConfig {
        max_in_flight: 2,
        ..config()
    };
    let plan = Orchestrator::new(widget_registry(), executor.clone())
        .with_config(config)
        .run(Task::new("Build a widget"))
        .await
        .unwrap();

    assert_eq!(plan.stages.len(), 1);
    assert_eq!(plan.stages[0].strategy, Some(ExecutionStrategy::Parallel));
    assert_eq!(executor.dispatches().len(), 3);
    assert_eq!(executor.peak_in_flight(), 2);
    assert_eq!(plan.status, PlanStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_override_dispatches_in_declaration_order() {
    let executor = shared(ScriptedExecutor::with_delay(Duration::from_secs(1)));
    let config = RunConfig {
        strategy: Some(ExecutionStrategy::Sequential),
        ..config()
    };
    let plan = Orchestrator::new(widget_registry(), executor.clone())
        .with_config(config)
        .run(Task::new("Build a widget"))
        .await
        .unwrap();

    assert_eq!(executor.peak_in_flight(), 1);
    let order: Vec<String> = executor.dispatches().into_iter().map(|d| d.subtask_id).collect();
    assert_eq!(order, vec!["st-1", "st-2", "st-3"]);
    let dispatches = executor.dispatches();
    for pair in dispatches.windows(2) {
        assert!(pair[1].started >= pair[0].finished.unwrap());
    }
    assert_eq!(plan.stages[0].strategy, Some(ExecutionStrategy::Sequential));
}

// ─── Clarification gate ───────────────────────────────────────────────────

struct AskAboutStorage;

#[async_trait]
impl Clarifier for AskAboutStorage {
    fn name(&self) -> &str {
        "ask-about-storage"
    }

    async fn clarify(&self, plan: &Plan, _max_questions: usize) -> Result<Vec<ClarificationDraft>, ClarifierError> {
        if !plan.clarifications.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ClarificationDraft {
            subtask_ids: vec!["st-1".into()],
            questions: vec!["Which database?".into(), "Session or JWT?".into()],
        }])
    }
}

/// Never has questions, but wants something answered before it is satisfied.
struct NeedsContext;

#[async_trait]
impl Clarifier for NeedsContext {
    fn name(&self) -> &str {
        "needs-context"
    }

    async fn clarify(&self, _plan: &Plan, _max_questions: usize) -> Result<Vec<ClarificationDraft>, ClarifierError> {
        Ok(Vec::new())
    }

    async fn enough_info(&self, plan: &Plan) -> Result<bool, ClarifierError> {
        Ok(clarifier::answered(plan).next().is_some())
    }
}

struct BrokenClarifier;

#[async_trait]
impl Clarifier for BrokenClarifier {
    fn name(&self) -> &str {
        "broken"
    }

    async fn clarify(&self, _plan: &Plan, _max_questions: usize) -> Result<Vec<ClarificationDraft>, ClarifierError> {
        Err(ClarifierError::Executor("no answer".into()))
    }
}

fn gated(executor: &Arc<ScriptedExecutor>) -> Orchestrator {
    let config = RunConfig {
        clarification_enabled: true,
        ..config()
    };
    orchestrator(executor, config).with_clarifier(Arc::new(AskAboutStorage))
}

#[tokio::test]
async fn test_clarification_blocks_until_answered() {
    let executor = shared(ScriptedExecutor::new());
    let run = gated(&executor).start(Task::new(LOGIN_TASK)).await.unwrap();

    let pending = run.wait_for_clarification().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "cq-1");
    assert_eq!(run.status(), PlanStatus::AwaitingClarification);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(executor.dispatches().is_empty());

    let err = run.answer("cq-1", vec!["Postgres".into()]).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::AnswerCountMismatch {
            expected: 2,
            actual: 1,
            ..
        }
    ));
    let err = run.answer("cq-9", vec![]).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::ClarificationNotFound(_)));

    run.answer("cq-1", vec!["Postgres".into(), "JWT".into()])
        .await
        .unwrap();
    let plan = run.wait().await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.clarifications[0].status, ClarificationStatus::Answered);
    let backend = &executor.dispatches_for("backend")[0];
    assert!(backend
        .instruction
        .contains("### Clarifications:\n- Which database?: Postgres\n- Session or JWT?: JWT"));
    // Only the blocked SubTask receives the answers.
    assert!(!executor.dispatches_for("frontend")[0]
        .instruction
        .contains("### Clarifications:"));
}

#[tokio::test]
async fn test_bypassed_clarification_runs_original_instructions() {
    let executor = shared(ScriptedExecutor::new());
    let plan = gated(&executor).run(Task::new(LOGIN_TASK)).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.clarifications[0].status, ClarificationStatus::Bypassed);
    assert!(executor
        .dispatches()
        .iter()
        .all(|d| !d.instruction.contains("### Clarifications:")));
}

#[tokio::test]
async fn test_abandoned_clarification_fails_plan() {
    let executor = shared(ScriptedExecutor::new());
    let run = gated(&executor).start(Task::new(LOGIN_TASK)).await.unwrap();
    assert_eq!(run.wait_for_clarification().await.len(), 1);
    assert_eq!(run.abandon_clarifications().await.unwrap(), 1);

    let plan = run.wait().await.unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.error.as_ref().unwrap().kind, ErrorKind::ClarificationUnresolved);
    assert!(plan.subtasks().all(|s| s.status == SubTaskStatus::Skipped));
    assert!(executor.dispatches().is_empty());
}

#[tokio::test]
async fn test_cancel_at_clarification_gate() {
    let executor = shared(ScriptedExecutor::new());
    let run = gated(&executor).start(Task::new(LOGIN_TASK)).await.unwrap();
    assert_eq!(run.wait_for_clarification().await.len(), 1);
    run.cancel();

    let plan = run.wait().await.unwrap();
    assert_eq!(plan.status, PlanStatus::Cancelled);
    assert_eq!(plan.clarifications[0].status, ClarificationStatus::Abandoned);
    assert!(executor.dispatches().is_empty());
}

#[tokio::test]
async fn test_failing_clarifier_does_not_block() {
    let executor = shared(ScriptedExecutor::new());
    let config = RunConfig {
        clarification_enabled: true,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .with_clarifier(Arc::new(BrokenClarifier))
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.clarifications.is_empty());
}

fn engineer_asks_twice() -> ScriptedExecutor {
    ScriptedExecutor::new().script(
        "prompt-engineer",
        vec![
            Step::Reply("### Questions Needed\n1. Which database?\n### Analysis\nStorage is open.".into()),
            Step::Reply("### Questions Needed\n1. Which Postgres version?\n### Analysis\nVersion matters.".into()),
            Step::Reply("### Questions Needed\nNone\n### Analysis\nClear now.".into()),
            Step::Reply("### Enough Information?\nYes\n### Reasoning\nStorage is settled.".into()),
        ],
    )
}

#[tokio::test]
async fn test_clarification_takes_two_rounds() {
    let executor = shared(engineer_asks_twice());
    let config = RunConfig {
        clarification_enabled: true,
        ..config()
    };
    let run = orchestrator(&executor, config)
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    let first = run.wait_for_clarification().await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].questions, vec!["Which database?"]);
    run.answer(&first[0].id, vec!["Postgres".into()]).await.unwrap();

    let second = run.wait_for_clarification().await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, "cq-2");
    assert_eq!(second[0].questions, vec!["Which Postgres version?"]);
    run.answer("cq-2", vec!["16".into()]).await.unwrap();

    assert!(run.wait_for_clarification().await.is_empty());
    let plan = run.wait().await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan
        .clarifications
        .iter()
        .all(|c| c.status == ClarificationStatus::Answered));

    let engineer = executor.dispatches_for("prompt-engineer");
    assert_eq!(engineer.len(), 4);
    assert!(!engineer[0].instruction.contains("Previous Clarifications:"));
    assert!(engineer[1].instruction.contains("Q: Which database?\nA: Postgres"));
    assert!(engineer[3].instruction.contains("### Enough Information?"));
    assert!(engineer[3].instruction.contains("Q: Which Postgres version?\nA: 16"));

    let backend = &executor.dispatches_for("backend")[0].instruction;
    assert!(backend.contains("- Which database?: Postgres"));
    assert!(backend.contains("- Which Postgres version?: 16"));
}

#[tokio::test]
async fn test_clarification_stops_at_round_limit() {
    let executor = shared(engineer_asks_twice());
    let config = RunConfig {
        clarification_enabled: true,
        max_clarification_rounds: 1,
        ..config()
    };
    let run = orchestrator(&executor, config)
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    let pending = run.wait_for_clarification().await;
    run.answer(&pending[0].id, vec!["Postgres".into()]).await.unwrap();
    assert!(run.wait_for_clarification().await.is_empty());

    let plan = run.wait().await.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.clarifications.len(), 1);
    assert_eq!(executor.dispatches_for("prompt-engineer").len(), 1);
}

#[tokio::test]
async fn test_not_enough_info_asks_for_context() {
    let executor = shared(ScriptedExecutor::new());
    let config = RunConfig {
        clarification_enabled: true,
        ..config()
    };
    let run = orchestrator(&executor, config)
        .with_clarifier(Arc::new(NeedsContext))
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    let pending = run.wait_for_clarification().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].questions, vec![clarifier::ADDITIONAL_CONTEXT_QUESTION]);
    assert_eq!(pending[0].subtask_ids, vec!["st-1", "st-2"]);
    run.answer(&pending[0].id, vec!["Use Postgres 16".into()]).await.unwrap();

    assert!(run.wait_for_clarification().await.is_empty());
    let plan = run.wait().await.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);

    let answered = format!("- {}: Use Postgres 16", clarifier::ADDITIONAL_CONTEXT_QUESTION);
    for specialist in ["backend", "frontend"] {
        assert!(executor.dispatches_for(specialist)[0].instruction.contains(&answered));
    }
}

#[tokio::test]
async fn test_answer_rejected_when_not_awaiting() {
    let executor = shared(ScriptedExecutor::new());
    let run = orchestrator(&executor, config())
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();
    assert!(run.wait_for_clarification().await.is_empty());

    let err = run.answer("cq-1", vec![]).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::NotAwaitingClarification(_)));
    run.wait().await.unwrap();
}

// ─── Prompt optimization ──────────────────────────────────────────────────

struct Shout;

#[async_trait]
impl PromptOptimizer for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    async fn optimize(&self, subtask: &SubTask, _task: &Task) -> Result<String, OptimizerError> {
        if subtask.specialist == "frontend" {
            return Err(OptimizerError::EmptyPrompt);
        }
        Ok(subtask.instruction.to_uppercase())
    }
}

#[tokio::test]
async fn test_optimizer_rewrites_and_degrades() {
    let executor = shared(ScriptedExecutor::new());
    let config = RunConfig {
        optimization_enabled: true,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .with_optimizer(Arc::new(Shout))
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    let backend = plan.subtask("st-1").unwrap();
    assert_eq!(backend.instruction, backend.original_instruction.to_uppercase());
    assert_eq!(executor.dispatches_for("backend")[0].instruction, backend.instruction);

    let frontend = plan.subtask("st-2").unwrap();
    assert_eq!(frontend.instruction, frontend.original_instruction);
}

// ─── Composer ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_composer_remediates_mismatch() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script(
                "frontend",
                vec![
                    Step::Reply(FRONTEND_MISMATCHED.into()),
                    Step::Reply(FRONTEND_MATCHING.into()),
                ],
            ),
    );
    let plan = orchestrator(&executor, config())
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.composer_reports.len(), 2);
    let first = &plan.composer_reports[0];
    assert_eq!(first.verdict, ComposerVerdict::IssuesFound);
    assert_eq!(first.remediation_stage, Some(2));
    assert!(first.issues.iter().all(|i| i.responsible == "frontend"));
    assert_eq!(plan.composer_reports[1].verdict, ComposerVerdict::Consistent);

    let remediation = &plan.stages[2];
    assert_eq!(remediation.kind, StageKind::Remediation { cycle: 1 });
    let fix = &remediation.subtasks[0];
    assert_eq!(fix.id, "st-3");
    assert_eq!(fix.specialist, "frontend");
    assert_eq!(fix.remediates, vec!["st-1", "st-2"]);
    assert!(fix.instruction.contains("POST /api/login"));

    assert_eq!(plan.status, PlanStatus::Completed);
}

struct Tag;

#[async_trait]
impl PromptOptimizer for Tag {
    fn name(&self) -> &str {
        "tag"
    }

    async fn optimize(&self, subtask: &SubTask, _task: &Task) -> Result<String, OptimizerError> {
        Ok(format!("{}\n[refined]", subtask.instruction))
    }
}

#[tokio::test]
async fn test_remediation_subtasks_are_optimized() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script(
                "frontend",
                vec![
                    Step::Reply(FRONTEND_MISMATCHED.into()),
                    Step::Reply(FRONTEND_MATCHING.into()),
                ],
            ),
    );
    let config = RunConfig {
        optimization_enabled: true,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .with_optimizer(Arc::new(Tag))
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    let fix = plan.subtask("st-3").unwrap();
    assert_eq!(fix.status, SubTaskStatus::Succeeded);
    assert!(fix.instruction.ends_with("[refined]"));
    assert_eq!(fix.instruction.matches("[refined]").count(), 1);
    assert_eq!(executor.dispatches_for("frontend")[1].instruction, fix.instruction);
}

#[tokio::test]
async fn test_composer_cycle_limit_leaves_plan_partially_failed() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script(
                "frontend",
                vec![
                    Step::Reply(FRONTEND_MISMATCHED.into()),
                    Step::Reply(FRONTEND_MISMATCHED.into()),
                ],
            ),
    );
    let plan = orchestrator(&executor, config())
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    // One report per cycle: the original inspection and one after remediation.
    assert_eq!(plan.composer_reports.len(), 2);
    assert_eq!(plan.stages.len(), 3);
    assert!(plan
        .composer_reports
        .iter()
        .all(|r| r.verdict == ComposerVerdict::IssuesFound));
    assert_eq!(plan.status, PlanStatus::PartiallyFailed);
    assert_eq!(
        plan.error.as_ref().unwrap().kind,
        ErrorKind::ComposerCycleLimitExceeded
    );
}

#[tokio::test]
async fn test_composer_without_remediation_cycles() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script("frontend", vec![Step::Reply(FRONTEND_MISMATCHED.into())]),
    );
    let config = RunConfig {
        max_composer_cycles: 0,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert_eq!(plan.composer_reports.len(), 1);
    assert_eq!(plan.composer_reports[0].remediation_stage, None);
    assert_eq!(plan.stages.len(), 2);
    assert_eq!(executor.dispatches_for("frontend").len(), 1);
    assert_eq!(plan.status, PlanStatus::PartiallyFailed);
    assert_eq!(
        plan.error.as_ref().unwrap().kind,
        ErrorKind::ComposerCycleLimitExceeded
    );
}

#[tokio::test]
async fn test_composer_inspector_failure_is_not_a_cycle_limit() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script("frontend", vec![Step::Reply(FRONTEND_MATCHING.into())])
            .script("composer", vec![Step::Fail("model overloaded".into())]),
    );
    let registry = Arc::new(SpecialistRegistry::builtin());
    let inspector = AgentInspector::from_registry(executor.clone(), &registry, Duration::from_secs(30)).unwrap();
    let plan = Orchestrator::new(registry, executor.clone())
        .with_config(config())
        .with_inspector(Arc::new(inspector))
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    assert!(plan.subtasks().all(|s| s.status == SubTaskStatus::Succeeded));
    assert_eq!(executor.dispatches_for("composer").len(), 1);
    assert_eq!(plan.composer_reports.len(), 1);
    assert!(plan.composer_reports[0].inspector_error.is_some());
    assert_eq!(plan.stages.len(), 2);

    assert_eq!(plan.status, PlanStatus::PartiallyFailed);
    let error = plan.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::ExecutorFailure);
    assert!(error.message.contains("inspector failed"));
}

#[tokio::test]
async fn test_composer_disabled() {
    let executor = shared(ScriptedExecutor::new());
    let config = RunConfig {
        composer_enabled: false,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();
    assert!(plan.composer_reports.is_empty());
}

#[tokio::test]
async fn test_composer_pass_is_idempotent() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script("frontend", vec![Step::Reply(FRONTEND_MISMATCHED.into())]),
    );
    let config = RunConfig {
        composer_enabled: false,
        ..config()
    };
    let plan = orchestrator(&executor, config)
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    let registry = SpecialistRegistry::builtin();
    let composer = Composer::contract();
    let first = composer.inspect(&plan, &registry, 0).await;
    let second = composer.inspect(&plan, &registry, 0).await;
    assert_eq!(first.verdict, ComposerVerdict::IssuesFound);
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.issues, second.issues);
    assert_eq!(first.remediations, second.remediations);
}

#[test]
fn test_builtin_roles_drive_contract_direction() {
    let registry = SpecialistRegistry::builtin();
    assert_eq!(registry.get("backend").unwrap().role, IntegrationRole::Producer);
    assert_eq!(registry.get("frontend").unwrap().role, IntegrationRole::Consumer);
}

// ─── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_mid_stage_abandons_dispatch() {
    let executor = shared(
        ScriptedExecutor::new()
            .script("backend", vec![Step::Reply(BACKEND_CONTRACT.into())])
            .script("frontend", vec![Step::Hang]),
    );
    let run = orchestrator(&executor, config())
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    while executor.dispatches_for("frontend").is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    run.cancel();
    let plan = tokio::time::timeout(Duration::from_secs(5), run.wait())
        .await
        .expect("run should stop promptly after cancel")
        .unwrap();

    assert_eq!(plan.status, PlanStatus::Cancelled);
    // Already terminal work keeps its status.
    let backend = plan.subtask("st-1").unwrap();
    assert_eq!(backend.status, SubTaskStatus::Succeeded);
    assert_eq!(backend.result.as_deref(), Some(BACKEND_CONTRACT));

    let frontend = plan.subtask("st-2").unwrap();
    assert_eq!(frontend.status, SubTaskStatus::Skipped);
    assert_eq!(frontend.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert!(plan.composer_reports.is_empty());
}

#[tokio::test]
async fn test_cancel_before_dispatch_skips_everything() {
    let executor = shared(ScriptedExecutor::new());
    let run = orchestrator(&executor, config())
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();
    run.cancel();

    let plan = run.wait().await.unwrap();
    assert_eq!(plan.status, PlanStatus::Cancelled);
    assert!(plan.subtasks().all(|s| s.status == SubTaskStatus::Skipped));
    assert!(executor.dispatches().is_empty());
}

// ─── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ready_plan_is_persisted_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let executor = shared(ScriptedExecutor::new().script("backend", vec![Step::Hang]));
    let run = orchestrator(&executor, config())
        .with_writer(PlanWriter::new(dir.path()))
        .start(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    while executor.dispatches_for("backend").is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = run.snapshot().await;
    let path = PlanWriter::new(dir.path()).path_for(&snapshot);
    let draft = std::fs::read_to_string(&path).unwrap();
    assert!(draft.contains("- **Status:** READY"));
    assert!(draft.contains("### st-1 · backend · READY"));

    run.cancel();
    let plan = run.wait().await.unwrap();
    assert_eq!(plan.status, PlanStatus::Cancelled);
    let last = std::fs::read_to_string(&path).unwrap();
    assert!(last.contains("- **Status:** CANCELLED"));
}

#[tokio::test]
async fn test_finished_plan_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let executor = shared(ScriptedExecutor::new());
    let plan = orchestrator(&executor, config())
        .with_writer(PlanWriter::new(dir.path()))
        .run(Task::new(LOGIN_TASK))
        .await
        .unwrap();

    let writer = PlanWriter::new(dir.path());
    let path = writer.path_for(&plan);
    let markdown = std::fs::read_to_string(&path).unwrap();
    assert!(markdown.contains(&format!("- **Plan ID:** `{}`", plan.id)));
    assert!(markdown.contains("- **Status:** COMPLETED"));
    assert!(markdown.contains("### st-2 · frontend · SUCCEEDED"));

    let json = std::fs::read_to_string(path.with_extension("json")).unwrap();
    let restored: Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.status, PlanStatus::Completed);
    assert_eq!(restored.stages.len(), plan.stages.len());
}
