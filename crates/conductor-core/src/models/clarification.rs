use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClarificationStatus {
    Open,
    Answered,
    /// The caller chose to proceed without answering.
    Bypassed,
    /// The caller gave up; the plan failed with `ClarificationUnresolved`.
    Abandoned,
}

/// Questions that block a set of SubTasks until answered or bypassed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationRequest {
    pub id: String,
    pub plan_id: String,
    /// SubTasks whose instructions receive the answers.
    pub subtask_ids: Vec<String>,
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<String>,
    pub status: ClarificationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ClarificationRequest {
    pub fn new(plan_id: &str, index: usize, subtask_ids: Vec<String>, questions: Vec<String>) -> Self {
        Self {
            id: format!("cq-{}", index + 1),
            plan_id: plan_id.to_string(),
            subtask_ids,
            questions,
            answers: Vec::new(),
            status: ClarificationStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ClarificationStatus::Open
    }

    pub fn resolve(&mut self, status: ClarificationStatus) {
        self.status = status;
        self.resolved_at = Some(Utc::now());
    }

    /// The `### Clarifications` block merged into blocked instructions.
    pub fn answers_block(&self) -> String {
        let mut block = String::from("### Clarifications:");
        for (question, answer) in self.questions.iter().zip(self.answers.iter()) {
            block.push_str(&format!("\n- {}: {}", question, answer.trim()));
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answers_block() {
        let mut req = ClarificationRequest::new(
            "plan-1",
            0,
            vec!["st-1".into()],
            vec!["Which database?".into(), "Session or JWT?".into()],
        );
        req.answers = vec!["Postgres".into(), " JWT ".into()];
        assert_eq!(req.id, "cq-1");
        assert_eq!(
            req.answers_block(),
            "### Clarifications:\n- Which database?: Postgres\n- Session or JWT?: JWT"
        );
    }
}
