//! Conductor Core: multi-specialist task orchestration.
//!
//! A free-text task is split into a [`Plan`](models::Plan) of staged
//! SubTasks, each routed to a specialist agent. The engine runs stages in
//! order, SubTasks within a stage sequentially or in parallel, with retries
//! and per-dispatch timeouts. When more than one specialist contributed, the
//! composer checks that their outputs fit together and schedules remediation.
//!
//! ```text
//!  Task ─▶ Splitter ─▶ [Clarifier] ─▶ [PromptOptimizer] ─▶ Engine ─▶ Composer ─▶ PlanWriter
//!                                                             │
//!                                                       AgentExecutor
//!                                             (HTTP API / local command / echo)
//! ```
//!
//! The crate has no CLI or server dependency; `conductor-cli` drives it from
//! the terminal.

pub mod clarifier;
pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod persistence;
pub mod specialist;
pub mod splitter;
pub mod text;

// Convenience re-exports
pub use config::{ConductorConfig, RunConfig};
pub use error::{OrchestrationError, Result};
pub use executor::{AgentExecutor, AgentOutput, DispatchRequest, ExecutorError};
pub use orchestrator::{Orchestrator, PlanRun};
pub use persistence::PlanWriter;
pub use specialist::{SpecialistDef, SpecialistRegistry};
pub use text::truncate;
