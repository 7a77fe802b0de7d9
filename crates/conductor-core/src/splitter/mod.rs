//! Splitter: decomposes a task into a staged [`Plan`].
//!
//! ```text
//!  forced category? ──yes──▶ composite → its members / single specialist
//!        │ no
//!        ▼
//!  ClassificationStrategy ──▶ candidates ≥ min score, known, routable
//!        │                         │ none / error
//!        ▼                         ▼
//!  stages grouped by precedence   Fallback: one stage on the default specialist
//! ```
//!
//! Specialists with equal precedence share a stage; lower precedence runs
//! earlier, so producers (backend) land before consumers (frontend). The
//! splitter never produces an empty plan.

pub mod classifier;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::Result;
use crate::models::{Plan, Routing, StageKind, SubTask, Task};
use crate::specialist::SpecialistRegistry;

pub use classifier::{
    AgentClassifier, Candidate, ClassificationError, ClassificationStrategy, KeywordClassifier,
};

/// One specialist assignment before it becomes a SubTask.
#[derive(Debug, Clone)]
struct Assignment {
    specialist: String,
    focus: Option<String>,
    precedence: u32,
}

pub struct Splitter {
    classifier: Arc<dyn ClassificationStrategy>,
}

impl Splitter {
    pub fn new(classifier: Arc<dyn ClassificationStrategy>) -> Self {
        Self { classifier }
    }

    pub fn keyword() -> Self {
        Self::new(Arc::new(KeywordClassifier))
    }

    /// Build the plan for `task`. A forced category on the task wins over the
    /// one in `config`.
    pub async fn split(
        &self,
        task: &Task,
        registry: &SpecialistRegistry,
        config: &RunConfig,
    ) -> Result<Plan> {
        let forced = task
            .forced_category
            .clone()
            .or_else(|| config.forced_category().map(str::to_string));

        let (routing, assignments) = match forced {
            Some(category) => {
                tracing::info!("[Splitter] Forced category: {}", category);
                let assignments = expand(registry, &category, None);
                (Routing::Forced { category }, assignments)
            }
            None => self.classified(task, registry, config).await,
        };

        let mut plan = Plan::new(task.clone(), routing);
        for group in group_by_precedence(assignments) {
            let subtasks = group
                .into_iter()
                .map(|a| {
                    let focus = a
                        .focus
                        .or_else(|| registry.get(&a.specialist).and_then(|d| d.focus.clone()));
                    SubTask::draft(a.specialist, render_instruction(&task.text, focus.as_deref()))
                })
                .collect();
            plan.push_stage(StageKind::Work, subtasks)?;
        }
        plan.validate()?;

        tracing::info!(
            plan_id = %plan.id,
            "[Splitter] {} stage(s), specialists: {}",
            plan.stages.len(),
            plan.specialists().join(", ")
        );
        Ok(plan)
    }

    async fn classified(
        &self,
        task: &Task,
        registry: &SpecialistRegistry,
        config: &RunConfig,
    ) -> (Routing, Vec<Assignment>) {
        let fallback = |reason: String| {
            let specialist = registry.default_specialist();
            tracing::warn!(
                "[Splitter] Classification ambiguous ({}), routing to '{}'",
                reason,
                specialist
            );
            let assignments = expand(registry, &specialist, None);
            (Routing::Fallback { reason }, assignments)
        };

        let candidates = match self.classifier.classify(task, registry).await {
            Ok(candidates) => candidates,
            Err(e) => return fallback(format!("{} classifier failed: {}", self.classifier.name(), e)),
        };

        let mut assignments: Vec<Assignment> = Vec::new();
        let mut seen = HashSet::new();
        for candidate in candidates {
            if candidate.score < config.min_classification_score {
                continue;
            }
            let Some(def) = registry.get(&candidate.specialist) else {
                tracing::debug!("[Splitter] Ignoring unknown candidate '{}'", candidate.specialist);
                continue;
            };
            if def.internal {
                continue;
            }
            for assignment in expand(registry, &candidate.specialist, candidate.focus.clone()) {
                if seen.insert(assignment.specialist.clone()) {
                    assignments.push(assignment);
                }
            }
        }

        if assignments.is_empty() {
            return fallback("no specialist matched the task".to_string());
        }

        let specialists = assignments.iter().map(|a| a.specialist.clone()).collect();
        (Routing::Classified { specialists }, assignments)
    }
}

/// Expand a category into assignments. Composites yield their members;
/// anything else, known or not, yields itself.
fn expand(registry: &SpecialistRegistry, category: &str, focus: Option<String>) -> Vec<Assignment> {
    let precedence_of = |id: &str| registry.get(id).map(|d| d.precedence).unwrap_or_default();

    match registry.get(category) {
        Some(def) if def.is_composite() => def
            .members
            .iter()
            .map(|m| Assignment {
                specialist: m.specialist.clone(),
                focus: m.focus.clone(),
                precedence: precedence_of(&m.specialist),
            })
            .collect(),
        _ => vec![Assignment {
            specialist: category.to_string(),
            focus,
            precedence: precedence_of(category),
        }],
    }
}

fn group_by_precedence(assignments: Vec<Assignment>) -> Vec<Vec<Assignment>> {
    let mut groups: BTreeMap<u32, Vec<Assignment>> = BTreeMap::new();
    for assignment in assignments {
        groups.entry(assignment.precedence).or_default().push(assignment);
    }
    groups.into_values().collect()
}

fn render_instruction(task: &str, focus: Option<&str>) -> String {
    match focus {
        Some(focus) if !focus.trim().is_empty() => format!("{}\n\nFocus: {}", task.trim(), focus.trim()),
        _ => task.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specialist::builtin_specialists;
    use async_trait::async_trait;

    struct FailingClassifier;

    #[async_trait]
    impl ClassificationStrategy for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn classify(
            &self,
            _task: &Task,
            _registry: &SpecialistRegistry,
        ) -> std::result::Result<Vec<Candidate>, ClassificationError> {
            Err(ClassificationError::Parse("garbage".to_string()))
        }
    }

    #[tokio::test]
    async fn test_full_stack_expands_in_order() {
        let registry = SpecialistRegistry::builtin();
        let task = Task::new("Build a todo app").with_forced_category("full-stack");
        let plan = Splitter::keyword()
            .split(&task, &registry, &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[0].subtasks[0].specialist, "backend");
        assert_eq!(plan.stages[1].subtasks[0].specialist, "frontend");
        assert!(plan.stages[0].subtasks[0]
            .instruction
            .contains("Focus: API endpoint definitions"));
    }

    #[tokio::test]
    async fn test_unknown_forced_category_still_plans() {
        let registry = SpecialistRegistry::builtin();
        let task = Task::new("Do it").with_forced_category("wizard");
        let plan = Splitter::keyword()
            .split(&task, &registry, &RunConfig::default())
            .await
            .unwrap();
        assert_eq!(plan.specialists(), vec!["wizard"]);
        assert_eq!(plan.stages[0].subtasks[0].instruction, "Do it");
    }

    #[tokio::test]
    async fn test_config_forced_category_applies() {
        let registry = SpecialistRegistry::builtin();
        let config = RunConfig {
            forced_category: Some("cloud".to_string()),
            ..Default::default()
        };
        let plan = Splitter::keyword()
            .split(&Task::new("Build a login page"), &registry, &config)
            .await
            .unwrap();
        assert_eq!(plan.routing, Routing::Forced { category: "cloud".to_string() });
        assert_eq!(plan.specialists(), vec!["cloud"]);
    }

    #[tokio::test]
    async fn test_classifier_error_falls_back() {
        let registry = SpecialistRegistry::builtin();
        let plan = Splitter::new(Arc::new(FailingClassifier))
            .split(&Task::new("Build a login page"), &registry, &RunConfig::default())
            .await
            .unwrap();
        assert!(matches!(plan.routing, Routing::Fallback { .. }));
        assert_eq!(plan.specialists(), vec!["general"]);
    }

    #[tokio::test]
    async fn test_min_score_filters_candidates() {
        let registry = SpecialistRegistry::from_defs(
            builtin_specialists()
                .into_iter()
                .filter(|d| d.id == "frontend" || d.id == "backend")
                .collect(),
        );
        let config = RunConfig {
            min_classification_score: 2.0,
            ..Default::default()
        };
        // "api" + "endpoint" score 2 for backend, "page" scores 1 for frontend
        let plan = Splitter::keyword()
            .split(&Task::new("Add an API endpoint for the page"), &registry, &config)
            .await
            .unwrap();
        assert_eq!(plan.specialists(), vec!["backend"]);
    }
}
