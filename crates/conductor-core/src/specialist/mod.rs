pub mod definition;
pub mod registry;

pub use definition::{
    builtin_specialists, CompositeMember, IntegrationRole, SpecialistDef, SpecialistSource,
    COMPOSER_SPECIALIST, DEFAULT_PRECEDENCE, FULL_STACK_CATEGORY, GENERAL_SPECIALIST,
    PROMPT_ENGINEER_SPECIALIST, SPLITTER_SPECIALIST,
};
pub use registry::{LoadDiagnostic, SpecialistRegistry, AGENTS_DIR_ENV};
