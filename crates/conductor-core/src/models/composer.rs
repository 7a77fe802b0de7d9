use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComposerVerdict {
    Consistent,
    IssuesFound,
}

/// A mismatch between what one SubTask produced and what another consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationIssue {
    pub description: String,
    /// SubTasks whose outputs disagree.
    pub subtask_ids: Vec<String>,
    /// Specialist expected to repair the mismatch.
    pub responsible: String,
}

/// Corrective follow-up work proposed by the composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remediation {
    pub specialist: String,
    pub instruction: String,
    /// SubTask ids of the issues this remediation addresses.
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposerReport {
    /// 0 for the first pass, incremented after each remediation stage.
    pub cycle: u32,
    pub verdict: ComposerVerdict,
    #[serde(default)]
    pub issues: Vec<IntegrationIssue>,
    #[serde(default)]
    pub remediations: Vec<Remediation>,
    /// Index of the stage appended for the remediations, if one was appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_stage: Option<usize>,
    /// Set when the inspector itself failed and the verdict is a fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspector_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ComposerReport {
    pub fn consistent(cycle: u32) -> Self {
        Self {
            cycle,
            verdict: ComposerVerdict::Consistent,
            issues: Vec::new(),
            remediations: Vec::new(),
            remediation_stage: None,
            inspector_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_issues(cycle: u32, issues: Vec<IntegrationIssue>, remediations: Vec<Remediation>) -> Self {
        let verdict = if issues.is_empty() {
            ComposerVerdict::Consistent
        } else {
            ComposerVerdict::IssuesFound
        };
        Self {
            cycle,
            verdict,
            issues,
            remediations,
            remediation_stage: None,
            inspector_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.verdict == ComposerVerdict::Consistent
    }
}
