//! Classification strategies: rank the specialists a task needs.
//!
//! Classification is a pluggable capability so the deterministic splitting
//! and scheduling core can be exercised without any fuzzy matching:
//!
//! - [`KeywordClassifier`] scores specialists by keyword hits in the task text.
//! - [`AgentClassifier`] asks the internal `splitter` specialist for a JSON
//!   assignment through the agent executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::executor::{AgentExecutor, DispatchRequest};
use crate::models::Task;
use crate::specialist::{SpecialistDef, SpecialistRegistry, SPLITTER_SPECIALIST};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassificationError {
    #[error("Classifier executor failed: {0}")]
    Executor(String),

    #[error("Failed to parse classifier response: {0}")]
    Parse(String),
}

/// A ranked specialist suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub specialist: String,
    pub score: f64,
    /// Aspect of the task this specialist should focus on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

#[async_trait]
pub trait ClassificationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Candidates ranked best first. An empty list means nothing matched.
    async fn classify(
        &self,
        task: &Task,
        registry: &SpecialistRegistry,
    ) -> Result<Vec<Candidate>, ClassificationError>;
}

// ─── Keyword ──────────────────────────────────────────────────────────────

/// Deterministic keyword scoring: one point per keyword found as a whole
/// word or phrase (a trailing plural `s` is tolerated). The specialist id
/// counts as a keyword.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn score(text: &str, def: &SpecialistDef) -> f64 {
        let haystack = format!(" {} ", normalize(text));
        let mut keywords: Vec<String> = def.keywords.iter().map(|k| normalize(k)).collect();
        keywords.push(normalize(&def.id));
        keywords.sort();
        keywords.dedup();

        keywords
            .iter()
            .filter(|k| !k.is_empty())
            .filter(|k| {
                haystack.contains(&format!(" {} ", k)) || haystack.contains(&format!(" {}s ", k))
            })
            .count() as f64
    }
}

#[async_trait]
impl ClassificationStrategy for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(
        &self,
        task: &Task,
        registry: &SpecialistRegistry,
    ) -> Result<Vec<Candidate>, ClassificationError> {
        let mut candidates: Vec<Candidate> = registry
            .routable()
            .map(|def| Candidate {
                specialist: def.id.clone(),
                score: Self::score(&task.text, def),
                focus: None,
            })
            .filter(|c| c.score > 0.0)
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.specialist.cmp(&b.specialist))
        });
        Ok(candidates)
    }
}

/// Lowercase, alphanumeric words separated by single spaces.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Agent ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SplitterResponse {
    #[serde(default)]
    agents_needed: Vec<String>,
    #[serde(default)]
    execution_order: Vec<SplitterAssignment>,
}

#[derive(Debug, Deserialize)]
struct SplitterAssignment {
    agent: String,
    #[serde(default)]
    focus: Option<String>,
}

/// Asks the `splitter` specialist which specialists a task needs.
///
/// Expected answer (surrounding prose is ignored):
///
/// ```json
/// {"agents_needed": ["backend", "frontend"],
///  "execution_strategy": "sequential",
///  "execution_order": [{"agent": "backend", "focus": "login API"},
///                      {"agent": "frontend", "focus": "login form"}]}
/// ```
pub struct AgentClassifier {
    executor: Arc<dyn AgentExecutor>,
    timeout: Duration,
}

impl AgentClassifier {
    pub fn new(executor: Arc<dyn AgentExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    fn render(task: &Task, registry: &SpecialistRegistry) -> String {
        let mut prompt = String::from("Available specialists:\n");
        for def in registry.specialists().filter(|d| !d.internal) {
            prompt.push_str(&format!("- {}: {}\n", def.id, def.description_or_name()));
        }
        prompt.push_str(&format!("\nTask:\n{}\n", task.text));
        prompt
    }

    /// Parse the JSON object embedded in `content` into ranked candidates.
    pub fn parse(content: &str) -> Result<Vec<Candidate>, ClassificationError> {
        let start = content.find('{');
        let end = content.rfind('}');
        let json = match (start, end) {
            (Some(s), Some(e)) if e > s => &content[s..=e],
            _ => return Err(ClassificationError::Parse("no JSON object found".to_string())),
        };
        let response: SplitterResponse =
            serde_json::from_str(json).map_err(|e| ClassificationError::Parse(e.to_string()))?;

        let mut assignments: Vec<(String, Option<String>)> = response
            .execution_order
            .into_iter()
            .map(|a| (a.agent, a.focus))
            .collect();
        for agent in response.agents_needed {
            if !assignments.iter().any(|(id, _)| *id == agent) {
                assignments.push((agent, None));
            }
        }

        let total = assignments.len();
        Ok(assignments
            .into_iter()
            .enumerate()
            .map(|(i, (specialist, focus))| Candidate {
                specialist: specialist.trim().to_string(),
                // rank order preserved, every suggestion scores at least 1
                score: (total - i) as f64,
                focus: focus.filter(|f| !f.trim().is_empty()),
            })
            .collect())
    }
}

#[async_trait]
impl ClassificationStrategy for AgentClassifier {
    fn name(&self) -> &str {
        "agent"
    }

    async fn classify(
        &self,
        task: &Task,
        registry: &SpecialistRegistry,
    ) -> Result<Vec<Candidate>, ClassificationError> {
        let splitter = registry
            .resolve(SPLITTER_SPECIALIST)
            .map_err(|e| ClassificationError::Executor(e.to_string()))?;
        let request = DispatchRequest::adhoc(splitter, Self::render(task, registry), self.timeout);

        let output = tokio::time::timeout(self.timeout, self.executor.invoke(request))
            .await
            .map_err(|_| ClassificationError::Executor(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ClassificationError::Executor(e.to_string()))?;

        Self::parse(&output.content)
    }
}
