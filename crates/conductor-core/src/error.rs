//! Core error type for the Conductor engine.
//!
//! `OrchestrationError` covers misuse of the public API (unknown ids,
//! invalid plans, bad configuration). Failures of individual SubTasks are
//! never returned as errors; they are recorded on the SubTask itself with an
//! [`ErrorKind`](crate::models::ErrorKind).

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Specialist not found: {0}")]
    SpecialistNotFound(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Clarification request not found: {0}")]
    ClarificationNotFound(String),

    #[error("Clarification request {id} has {expected} question(s), got {actual} answer(s)")]
    AnswerCountMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Plan is not awaiting clarification (status: {0})")]
    NotAwaitingClarification(String),

    #[error("Run driver stopped unexpectedly: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for OrchestrationError {
    fn from(e: std::io::Error) -> Self {
        OrchestrationError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
