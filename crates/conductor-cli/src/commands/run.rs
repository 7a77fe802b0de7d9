//! `conductor run "task"`: split, clarify, execute and compose one task.
//!
//! Clarifying questions are asked interactively when stdin is a terminal;
//! answering `build` to any question proceeds without further answers.
//! Ctrl-C cancels the run; work in flight is abandoned and the plan is
//! still written with status `CANCELLED`.

use std::sync::Arc;

use clap::Args;
use console::{style, Term};
use conductor_core::executor::{AgentExecutor, EchoExecutor};
use conductor_core::models::{ClarificationRequest, ExecutionStrategy, Plan, PlanStatus, Task};
use conductor_core::{OrchestrationError, Orchestrator, PlanRun, RunConfig};
use dialoguer::Input;

use super::Context;

/// Typed at a clarification prompt to skip the remaining questions.
const BYPASS_WORD: &str = "build";

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// The task, in plain language
    pub task: String,

    /// Route to one specialist or composite category instead of classifying ("auto" classifies)
    #[arg(long)]
    pub category: Option<String>,

    /// Force every stage to run sequential or parallel
    #[arg(long)]
    pub strategy: Option<ExecutionStrategy>,

    /// Retries after the first attempt of each SubTask
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Deadline for one dispatch, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Maximum concurrent dispatches within a parallel stage
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Ask clarifying questions before dispatching
    #[arg(long)]
    pub clarify: bool,

    /// Maximum questions per clarification request
    #[arg(long)]
    pub max_questions: Option<usize>,

    /// Question rounds before proceeding with the answers so far
    #[arg(long)]
    pub max_clarification_rounds: Option<u32>,

    /// Keep running later stages after a stage partially fails
    #[arg(long)]
    pub best_effort: bool,

    /// Remediation cycles the composer may schedule
    #[arg(long)]
    pub max_composer_cycles: Option<u32>,

    /// Skip prompt optimization
    #[arg(long)]
    pub no_optimize: bool,

    /// Skip the integration check
    #[arg(long)]
    pub no_composer: bool,

    /// Answer no clarifying questions; proceed with the original instructions
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Use the echo executor: nothing leaves the machine
    #[arg(long)]
    pub dry_run: bool,

    /// Do not write the plan document
    #[arg(long)]
    pub no_persist: bool,

    /// Print the final plan as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Flags win over the config file.
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(category) = &self.category {
            config.forced_category = Some(category.clone());
        }
        if self.strategy.is_some() {
            config.strategy = self.strategy;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.per_dispatch_timeout_secs = secs;
        }
        if let Some(n) = self.max_in_flight {
            config.max_in_flight = n;
        }
        if self.clarify {
            config.clarification_enabled = true;
        }
        if let Some(n) = self.max_questions {
            config.max_clarification_questions = n;
        }
        if let Some(n) = self.max_clarification_rounds {
            config.max_clarification_rounds = n;
        }
        if self.best_effort {
            config.fail_fast_on_partial_stage_failure = false;
        }
        if let Some(n) = self.max_composer_cycles {
            config.max_composer_cycles = n;
        }
        if self.no_optimize {
            config.optimization_enabled = false;
        }
        if self.no_composer {
            config.composer_enabled = false;
        }
    }
}

/// Build the orchestrator for `args` against the loaded context.
pub fn orchestrator(ctx: &Context, args: &RunArgs) -> Result<Orchestrator, String> {
    let mut config = ctx.config.run.clone();
    args.apply(&mut config);
    config.validate().map_err(|e| e.to_string())?;

    let executor: Arc<dyn AgentExecutor> = if args.dry_run {
        Arc::new(EchoExecutor)
    } else {
        ctx.config.executor.build().map_err(|e| e.to_string())?
    };

    let mut orchestrator = Orchestrator::new(ctx.registry.clone(), executor).with_config(config);
    if !args.no_persist {
        orchestrator = orchestrator.with_writer(ctx.plan_writer());
    }
    Ok(orchestrator)
}

/// Run the task to completion and return its final plan.
pub async fn execute(ctx: &Context, args: &RunArgs) -> Result<Plan, String> {
    let orchestrator = orchestrator(ctx, args)?;
    let task = Task::new(args.task.clone()).with_workspace(ctx.workspace.clone());
    let run = orchestrator.start(task).await.map_err(|e| e.to_string())?;

    let token = run.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", style("Cancelling…").yellow());
            token.cancel();
        }
    });

    // One pass per clarification round; a bypass ends the gate.
    let interactive = !args.yes && Term::stdout().is_term();
    loop {
        let pending = run.wait_for_clarification().await;
        if pending.is_empty() {
            break;
        }
        if interactive {
            ask(&run, pending).await?;
        } else {
            let count = run.bypass_clarifications().await.map_err(|e| e.to_string())?;
            tracing::info!("Proceeding without answers to {} clarification request(s)", count);
        }
    }

    let plan = run.wait().await.map_err(|e| e.to_string());
    ctrl_c.abort();
    plan
}

/// `conductor run`: returns the final plan status.
pub async fn run(ctx: &Context, args: &RunArgs) -> Result<PlanStatus, String> {
    if !args.json {
        println!("{} {}", style("▶").cyan().bold(), args.task);
        println!();
    }

    let plan = execute(ctx, args).await?;

    if args.json {
        let value = serde_json::to_value(&plan).map_err(|e| e.to_string())?;
        super::print_json(&value);
        return Ok(plan.status);
    }

    print!("{}", super::plan::render(&plan));
    if let Some(report) = plan.latest_composer_report() {
        println!("\nComposer: {:?} after {} cycle(s)", report.verdict, report.cycle);
        for issue in &report.issues {
            println!("  - {}", issue.description);
        }
    }
    if let Some(error) = &plan.error {
        println!("\n{}: {}", error.kind, error.message);
    }

    let status = match plan.status {
        PlanStatus::Completed => style(plan.status.as_str()).green().bold(),
        PlanStatus::PartiallyFailed => style(plan.status.as_str()).yellow().bold(),
        _ => style(plan.status.as_str()).red().bold(),
    };
    println!("\nStatus: {}", status);
    if !args.no_persist {
        println!("Plan: {}", ctx.plan_writer().path_for(&plan).display());
    }
    Ok(plan.status)
}

/// Ask each open question on the terminal, then answer or bypass.
async fn ask(run: &PlanRun, pending: Vec<ClarificationRequest>) -> Result<(), String> {
    println!(
        "{} (type '{}' to proceed without answering)",
        style("Clarification needed").yellow().bold(),
        BYPASS_WORD
    );

    for request in pending {
        let mut answers = Vec::with_capacity(request.questions.len());
        for question in &request.questions {
            let prompt = question.clone();
            let answer = tokio::task::spawn_blocking(move || {
                Input::<String>::new()
                    .with_prompt(prompt)
                    .allow_empty(true)
                    .interact_text()
            })
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;

            if answer.trim().eq_ignore_ascii_case(BYPASS_WORD) {
                return gate_result(run.bypass_clarifications().await.map(|_| ()));
            }
            answers.push(answer);
        }
        gate_result(run.answer(&request.id, answers).await)?;
    }
    Ok(())
}

/// A run that left the gate meanwhile (Ctrl-C) is not an error here.
fn gate_result(result: conductor_core::Result<()>) -> Result<(), String> {
    match result {
        Ok(()) | Err(OrchestrationError::NotAwaitingClarification(_)) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}
