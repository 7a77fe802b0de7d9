//! Composer: post-execution integration check across specialists.
//!
//! ```text
//!  inspect (cycle 0) ──consistent──▶ done
//!        │ issues
//!        ├─ cycle ≥ maxComposerCycles / remediation not allowed ──▶ unresolved
//!        ▼
//!  append remediation stage ──▶ engine runs it ──▶ inspect (cycle + 1) …
//! ```
//!
//! Every pass attaches exactly one [`ComposerReport`] to the plan. The loop
//! is bounded by `maxComposerCycles`, so a pair of specialists that never
//! agree cannot keep the plan alive forever.

pub mod inspector;

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, EngineOutcome};
use crate::models::{
    ComposerReport, ErrorKind, IntegrationIssue, Plan, Remediation, StageKind, SubTask,
    SubTaskStatus,
};
use crate::optimizer::{refine_pending, PromptOptimizer};
use crate::specialist::{IntegrationRole, SpecialistRegistry};
use crate::text::truncate;

pub use inspector::{
    AgentInspector, ContractInspector, InspectedOutput, InspectorError, IntegrationInspector,
};

/// How the composer loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerOutcome {
    Consistent,
    /// Issues remain after the last report.
    Unresolved { cause: UnresolvedCause, reason: String },
    Cancelled,
}

/// Why the composer stopped with issues still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedCause {
    /// `maxComposerCycles` remediation stages already ran.
    CycleLimit,
    /// The inspector could not produce a verdict.
    InspectorFailed,
    /// Issues had no responsible specialist to remediate them.
    NoRemediation,
    /// The plan already failed, so only a report is produced.
    RemediationNotAllowed,
}

impl UnresolvedCause {
    /// The error kind recorded on the plan.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::CycleLimit => ErrorKind::ComposerCycleLimitExceeded,
            Self::InspectorFailed => ErrorKind::ExecutorFailure,
            Self::NoRemediation | Self::RemediationNotAllowed => ErrorKind::IntegrationUnresolved,
        }
    }
}

pub struct Composer {
    inspector: Arc<dyn IntegrationInspector>,
    optimizer: Option<Arc<dyn PromptOptimizer>>,
    max_in_flight: usize,
}

impl Composer {
    pub fn new(inspector: Arc<dyn IntegrationInspector>) -> Self {
        Self {
            inspector,
            optimizer: None,
            max_in_flight: 1,
        }
    }

    /// Remediation SubTasks pass through `optimizer` like any other work.
    pub fn with_optimizer(mut self, optimizer: Option<Arc<dyn PromptOptimizer>>, max_in_flight: usize) -> Self {
        self.optimizer = optimizer;
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn contract() -> Self {
        Self::new(Arc::new(ContractInspector))
    }

    /// Whether the composer applies to this plan at all.
    pub fn applies_to(plan: &Plan) -> bool {
        plan.specialists().len() > 1
    }

    /// Succeeded outputs in plan order; for each specialist only its latest
    /// stage counts, so remediation output supersedes the original.
    pub fn collect_outputs(plan: &Plan, registry: &SpecialistRegistry) -> Vec<InspectedOutput> {
        let mut latest_stage: BTreeMap<&str, usize> = BTreeMap::new();
        for subtask in plan.subtasks().filter(|s| s.status == SubTaskStatus::Succeeded) {
            latest_stage.insert(subtask.specialist.as_str(), subtask.stage);
        }

        plan.subtasks()
            .filter(|s| s.status == SubTaskStatus::Succeeded)
            .filter(|s| latest_stage.get(s.specialist.as_str()) == Some(&s.stage))
            .map(|s| InspectedOutput {
                subtask_id: s.id.clone(),
                specialist: s.specialist.clone(),
                role: registry
                    .get(&s.specialist)
                    .map(|d| d.role)
                    .unwrap_or(IntegrationRole::Independent),
                content: s.result.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// One inspection pass. Never fails: an inspector error becomes an
    /// `IssuesFound` report without remediations.
    pub async fn inspect(&self, plan: &Plan, registry: &SpecialistRegistry, cycle: u32) -> ComposerReport {
        let outputs = Self::collect_outputs(plan, registry);
        match self.inspector.inspect(&outputs).await {
            Ok(issues) if issues.is_empty() => ComposerReport::consistent(cycle),
            Ok(issues) => {
                let remediations = remediations(&issues, &outputs);
                ComposerReport::with_issues(cycle, issues, remediations)
            }
            Err(e) => {
                tracing::warn!(plan_id = %plan.id, "[Composer] {} inspector failed: {}", self.inspector.name(), e);
                let issue = IntegrationIssue {
                    description: format!("integration could not be verified: {}", e),
                    subtask_ids: outputs.iter().map(|o| o.subtask_id.clone()).collect(),
                    responsible: String::new(),
                };
                let mut report = ComposerReport::with_issues(cycle, vec![issue], Vec::new());
                report.inspector_error = Some(e.to_string());
                report
            }
        }
    }

    /// Inspect, remediate and re-inspect until consistent or out of cycles.
    /// With `allow_remediation` false only the first report is produced.
    pub async fn run(
        &self,
        plan: &Arc<RwLock<Plan>>,
        engine: &Engine,
        registry: &SpecialistRegistry,
        cancel: &CancellationToken,
        max_cycles: u32,
        allow_remediation: bool,
    ) -> ComposerOutcome {
        let mut cycle = 0;
        loop {
            if cancel.is_cancelled() {
                return ComposerOutcome::Cancelled;
            }

            let snapshot = plan.read().await.clone();
            let mut report = self.inspect(&snapshot, registry, cycle).await;
            tracing::info!(
                plan_id = %snapshot.id,
                "[Composer] Cycle {}: {:?}, {} issue(s)",
                cycle,
                report.verdict,
                report.issues.len()
            );

            if report.is_consistent() {
                plan.write().await.composer_reports.push(report);
                return ComposerOutcome::Consistent;
            }

            let stop = if let Some(error) = &report.inspector_error {
                Some((UnresolvedCause::InspectorFailed, format!("inspector failed: {}", error)))
            } else if !allow_remediation {
                Some((
                    UnresolvedCause::RemediationNotAllowed,
                    "remediation not allowed for this plan".to_string(),
                ))
            } else if cycle >= max_cycles {
                Some((
                    UnresolvedCause::CycleLimit,
                    format!("composer cycle limit ({}) reached", max_cycles),
                ))
            } else if report.remediations.is_empty() {
                Some((
                    UnresolvedCause::NoRemediation,
                    "no remediation could be derived".to_string(),
                ))
            } else {
                None
            };
            if let Some((cause, reason)) = stop {
                plan.write().await.composer_reports.push(report);
                return ComposerOutcome::Unresolved { cause, reason };
            }

            let stage_index = {
                let mut guard = plan.write().await;
                let subtasks = report
                    .remediations
                    .iter()
                    .map(|r| SubTask::draft(&r.specialist, &r.instruction).with_remediates(r.addresses.clone()))
                    .collect();
                match guard.push_stage(StageKind::Remediation { cycle: cycle + 1 }, subtasks) {
                    Ok(index) => {
                        report.remediation_stage = Some(index);
                        guard.composer_reports.push(report);
                        index
                    }
                    Err(e) => {
                        guard.composer_reports.push(report);
                        return ComposerOutcome::Unresolved {
                            cause: UnresolvedCause::NoRemediation,
                            reason: e.to_string(),
                        };
                    }
                }
            };

            refine_pending(plan, self.optimizer.as_ref(), self.max_in_flight, cancel).await;
            tracing::info!("[Composer] Running remediation stage {}", stage_index);
            if engine.run_stages(plan, stage_index, cancel).await == EngineOutcome::Cancelled {
                return ComposerOutcome::Cancelled;
            }
            cycle += 1;
        }
    }
}

/// One remediation per responsible specialist, carrying its issues and the
/// producers' output as the contract to align with.
fn remediations(issues: &[IntegrationIssue], outputs: &[InspectedOutput]) -> Vec<Remediation> {
    let mut grouped: BTreeMap<&str, Vec<&IntegrationIssue>> = BTreeMap::new();
    for issue in issues.iter().filter(|i| !i.responsible.is_empty()) {
        grouped.entry(issue.responsible.as_str()).or_default().push(issue);
    }

    grouped
        .into_iter()
        .map(|(specialist, issues)| {
            let mut instruction = String::from(
                "Integration issues were found between your previous output and the other \
                 specialists' work. Fix them so everything matches one contract:\n",
            );
            for issue in &issues {
                instruction.push_str(&format!("- {}\n", issue.description));
            }
            let contract: Vec<&InspectedOutput> = outputs
                .iter()
                .filter(|o| o.role == IntegrationRole::Producer && o.specialist != specialist)
                .collect();
            if !contract.is_empty() {
                instruction.push_str("\nContract to align with:\n");
                for output in contract {
                    instruction.push_str(&format!(
                        "\n[{}]\n{}\n",
                        output.specialist,
                        truncate(&output.content, 1500)
                    ));
                }
            }

            let mut addresses: Vec<String> = issues
                .iter()
                .flat_map(|i| i.subtask_ids.iter().cloned())
                .collect();
            addresses.sort();
            addresses.dedup();

            Remediation {
                specialist: specialist.to_string(),
                instruction: instruction.trim_end().to_string(),
                addresses,
            }
        })
        .collect()
}
