//! `conductor plan "task"`: show how a task would be split, without running it.

use std::fmt::Write as _;
use std::sync::Arc;

use console::style;
use conductor_core::executor::EchoExecutor;
use conductor_core::models::{Plan, Routing, StageKind, SubTaskStatus, Task};
use conductor_core::{truncate, Orchestrator};

use super::Context;

pub async fn build(ctx: &Context, task: &str, category: Option<&str>) -> Result<Plan, String> {
    let mut task = Task::new(task).with_workspace(ctx.workspace.clone());
    if let Some(category) = category {
        task = task.with_forced_category(category);
    }
    Orchestrator::new(ctx.registry.clone(), Arc::new(EchoExecutor))
        .with_config(ctx.config.run.clone())
        .plan(&task)
        .await
        .map_err(|e| e.to_string())
}

pub async fn run(ctx: &Context, task: &str, category: Option<&str>, json: bool) -> Result<(), String> {
    let plan = build(ctx, task, category).await?;
    if json {
        let value = serde_json::to_value(&plan).map_err(|e| e.to_string())?;
        super::print_json(&value);
    } else {
        print!("{}", render(&plan));
    }
    Ok(())
}

/// Plain-text plan outline: routing, then one block per stage.
pub fn render(plan: &Plan) -> String {
    let mut out = String::new();
    let routing = match &plan.routing {
        Routing::Forced { category } => format!("forced to '{}'", category),
        Routing::Classified { specialists } => format!("classified as {}", specialists.join(", ")),
        Routing::Fallback { reason } => format!("fallback ({})", reason),
    };
    let _ = writeln!(out, "Plan {} [{}]", plan.id, plan.status);
    let _ = writeln!(out, "Routing: {}", routing);

    for stage in &plan.stages {
        let kind = match stage.kind {
            StageKind::Work => String::new(),
            StageKind::Remediation { cycle } => format!(" remediation cycle {}", cycle),
        };
        let strategy = stage.strategy.unwrap_or_else(|| stage.default_strategy());
        let _ = writeln!(out, "\nStage {}{} ({:?})", stage.index, kind, strategy);
        for subtask in &stage.subtasks {
            let first_line = subtask.instruction.lines().next().unwrap_or("");
            let _ = writeln!(
                out,
                "  {} {:<20} {:<18} {}",
                subtask.id,
                subtask.specialist,
                status_label(subtask.status),
                truncate(first_line, 60)
            );
            if let Some(error) = &subtask.error {
                let _ = writeln!(out, "      {}: {}", error.kind, truncate(&error.message, 100));
            }
        }
    }
    out
}

fn status_label(status: SubTaskStatus) -> String {
    let label = status.as_str();
    match status {
        SubTaskStatus::Succeeded => style(label).green().to_string(),
        SubTaskStatus::Failed => style(label).red().to_string(),
        SubTaskStatus::Skipped => style(label).yellow().to_string(),
        _ => style(label).dim().to_string(),
    }
}
