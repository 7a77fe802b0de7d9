pub mod clarification;
pub mod composer;
pub mod plan;
pub mod task;

pub use clarification::{ClarificationRequest, ClarificationStatus};
pub use composer::{ComposerReport, ComposerVerdict, IntegrationIssue, Remediation};
pub use plan::{
    ErrorKind, ExecutionStrategy, Plan, PlanStatus, Routing, Stage, StageKind, StageStatus,
    SubTask, SubTaskError, SubTaskStatus,
};
pub use task::{Task, AUTO_CATEGORY};
