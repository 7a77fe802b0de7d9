//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command. They all start
//! from a [`Context`]: the workspace, its loaded config and the specialist
//! registry discovered for it.

pub mod config;
pub mod plan;
pub mod run;
pub mod specialists;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use conductor_core::{ConductorConfig, PlanWriter, SpecialistRegistry};

pub struct Context {
    pub workspace: PathBuf,
    pub config: ConductorConfig,
    pub registry: Arc<SpecialistRegistry>,
}

impl Context {
    pub fn plan_writer(&self) -> PlanWriter {
        self.config.plan_writer(&self.workspace)
    }
}

/// Load config and specialists for `workspace` (default: current directory).
///
/// Specialist directories, in order: `$CONDUCTOR_AGENTS_DIR`,
/// `~/.conductor/agents`, `<workspace>/.conductor/agents`, `agentsDirs` from
/// the config, then `--agents-dir` flags.
pub fn load_context(
    workspace: Option<&Path>,
    config_path: Option<&Path>,
    agents_dirs: &[PathBuf],
) -> Result<Context, String> {
    let workspace = match workspace {
        Some(ws) => ws.to_path_buf(),
        None => std::env::current_dir().map_err(|e| format!("Cannot resolve current directory: {}", e))?,
    };
    let config = ConductorConfig::load(config_path, &workspace).map_err(|e| e.to_string())?;

    let mut extra = vec![workspace.join(".conductor").join("agents")];
    extra.extend(config.agents_dirs.iter().map(|d| resolve(&workspace, d)));
    extra.extend(agents_dirs.iter().cloned());
    let registry = SpecialistRegistry::load(&SpecialistRegistry::default_dirs(&extra));

    for diagnostic in registry.diagnostics() {
        tracing::warn!("Skipped specialist {}: {}", diagnostic.path.display(), diagnostic.reason);
    }

    Ok(Context {
        workspace,
        config,
        registry: Arc::new(registry),
    })
}

fn resolve(workspace: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        workspace.join(dir)
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
