//! PlanWriter: durable, human-readable plan documents.
//!
//! Storage path: `<workspace>/.conductor/plans/{slug}-{id8}.plan.md`, with a
//! JSON snapshot of the same plan next to it (`.plan.json`).
//!
//! Rendering reads nothing but the plan itself, so the same plan state
//! always renders to the same document. Writing is best-effort from the run's
//! point of view: [`PlanWriter::write_safe`] logs failures and moves on.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::models::{ClarificationStatus, Plan, Routing, StageKind, SubTask};
use crate::text::truncate;

const RESULT_EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct PlanWriter {
    /// Directory plan documents are written to (e.g., "/project/.conductor/plans")
    base_dir: PathBuf,
}

impl PlanWriter {
    /// Plans are stored in `<workspace_root>/.conductor/plans/`.
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            base_dir: workspace_root.as_ref().join(".conductor").join("plans"),
        }
    }

    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base_dir>/<slug>-<id8>.plan.md`
    pub fn path_for(&self, plan: &Plan) -> PathBuf {
        let id8: String = plan.id.chars().filter(|c| *c != '-').take(8).collect();
        self.base_dir
            .join(format!("{}-{}.plan.md", slugify(&plan.task.text), id8))
    }

    /// Write the Markdown document and JSON snapshot. Returns the Markdown path.
    pub async fn write(&self, plan: &Plan) -> Result<PathBuf, PlanWriteError> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| PlanWriteError::Io(format!("Failed to create plan dir: {}", e)))?;

        let md_path = self.path_for(plan);
        fs::write(&md_path, render_markdown(plan))
            .await
            .map_err(|e| PlanWriteError::Io(e.to_string()))?;

        let json = serde_json::to_string_pretty(plan)
            .map_err(|e| PlanWriteError::Serialization(e.to_string()))?;
        fs::write(md_path.with_extension("json"), json)
            .await
            .map_err(|e| PlanWriteError::Io(e.to_string()))?;

        tracing::info!(plan_id = %plan.id, "[PlanWriter] Wrote {}", md_path.display());
        Ok(md_path)
    }

    /// Write, logging errors but never failing.
    pub async fn write_safe(&self, plan: &Plan) -> Option<PathBuf> {
        match self.write(plan).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(plan_id = %plan.id, "[PlanWriter] Failed to write plan: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanWriteError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Lowercase words of the task joined by `-`, at most 40 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if slug.len() + word.len() + 1 > 40 {
            break;
        }
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(word);
    }
    if slug.is_empty() {
        "plan".to_string()
    } else {
        slug
    }
}

/// Render a plan as Markdown.
pub fn render_markdown(plan: &Plan) -> String {
    let mut out = String::new();
    let title = plan.task.text.lines().next().unwrap_or("").trim();

    let _ = writeln!(out, "# Plan: {}\n", truncate(title, 80));
    let _ = writeln!(out, "- **Plan ID:** `{}`", plan.id);
    let _ = writeln!(out, "- **Status:** {}", plan.status);
    let _ = writeln!(out, "- **Created:** {}", plan.created_at.to_rfc3339());
    if let Some(finished) = plan.finished_at {
        let _ = writeln!(out, "- **Finished:** {}", finished.to_rfc3339());
    }
    let routing = match &plan.routing {
        Routing::Forced { category } => format!("forced `{}`", category),
        Routing::Classified { specialists } => format!("classified ({})", specialists.join(", ")),
        Routing::Fallback { reason } => format!("fallback to default specialist ({})", reason),
    };
    let _ = writeln!(out, "- **Routing:** {}", routing);
    if let Some(ws) = &plan.task.workspace {
        let _ = writeln!(out, "- **Workspace:** `{}`", ws.display());
    }
    if let Some(error) = &plan.error {
        let _ = writeln!(out, "- **Error:** {}: {}", error.kind, error.message);
    }

    let _ = writeln!(out, "\n## Task\n\n{}\n", plan.task.text.trim());

    for stage in &plan.stages {
        let kind = match stage.kind {
            StageKind::Work => "work".to_string(),
            StageKind::Remediation { cycle } => format!("remediation, cycle {}", cycle),
        };
        let strategy = stage
            .strategy
            .unwrap_or_else(|| stage.default_strategy());
        let _ = writeln!(
            out,
            "## Stage {} ({}, {:?}): {:?}\n",
            stage.index, kind, strategy, stage.status
        );
        for subtask in &stage.subtasks {
            render_subtask(&mut out, subtask);
        }
    }

    if !plan.clarifications.is_empty() {
        let _ = writeln!(out, "## Clarifications\n");
        for request in &plan.clarifications {
            let _ = writeln!(
                out,
                "### {} · {:?} (blocks {})\n",
                request.id,
                request.status,
                request.subtask_ids.join(", ")
            );
            for (i, question) in request.questions.iter().enumerate() {
                match request.answers.get(i) {
                    Some(answer) if request.status == ClarificationStatus::Answered => {
                        let _ = writeln!(out, "- **Q:** {}\n  **A:** {}", question, answer);
                    }
                    _ => {
                        let _ = writeln!(out, "- **Q:** {}", question);
                    }
                }
            }
            out.push('\n');
        }
    }

    if !plan.composer_reports.is_empty() {
        let _ = writeln!(out, "## Composer\n");
        for report in &plan.composer_reports {
            let _ = writeln!(out, "### Cycle {} · {:?}\n", report.cycle, report.verdict);
            if let Some(error) = &report.inspector_error {
                let _ = writeln!(out, "Inspector error: {}\n", error);
            }
            for issue in &report.issues {
                let responsible = if issue.responsible.is_empty() {
                    String::new()
                } else {
                    format!(" → {}", issue.responsible)
                };
                let _ = writeln!(
                    out,
                    "- {} ({}){}",
                    issue.description,
                    issue.subtask_ids.join(", "),
                    responsible
                );
            }
            if let Some(index) = report.remediation_stage {
                let _ = writeln!(out, "\nRemediation stage: {}", index);
            }
            out.push('\n');
        }
    }

    out.trim_end().to_string() + "\n"
}

fn render_subtask(out: &mut String, subtask: &SubTask) {
    let _ = writeln!(
        out,
        "### {} · {} · {}\n",
        subtask.id,
        subtask.specialist,
        subtask.status.as_str()
    );
    let _ = writeln!(out, "- Attempts: {}", subtask.attempts);
    if let Some(error) = &subtask.error {
        let _ = writeln!(out, "- Error: {}: {}", error.kind, error.message);
    }
    if !subtask.remediates.is_empty() {
        let _ = writeln!(out, "- Remediates: {}", subtask.remediates.join(", "));
    }
    let _ = writeln!(out, "\n**Instruction**\n\n~~~~text\n{}\n~~~~\n", subtask.instruction.trim());
    if let Some(result) = &subtask.result {
        let _ = writeln!(
            out,
            "**Result**\n\n~~~~text\n{}\n~~~~\n",
            truncate(result.trim(), RESULT_EXCERPT_CHARS)
        );
    }
}
