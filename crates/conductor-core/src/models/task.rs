use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category value that means "let the splitter decide".
pub const AUTO_CATEGORY: &str = "auto";

/// A natural-language development request, immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub text: String,
    /// Specialist id or composite category that bypasses classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_category: Option<String>,
    /// Opaque workspace context, forwarded to specialists but never interpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    pub accepted_at: DateTime<Utc>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            forced_category: None,
            workspace: None,
            accepted_at: Utc::now(),
        }
    }

    /// Force a category. `"auto"` (any case) and blank values clear the override.
    pub fn with_forced_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        let trimmed = category.trim();
        self.forced_category = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(AUTO_CATEGORY) {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }
}
