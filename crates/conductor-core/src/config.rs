//! Run configuration and the `.conductor/config.yaml` file.
//!
//! ```yaml
//! run:
//!   strategy: parallel            # omit for the stage-dependent default
//!   maxRetries: 2
//!   perDispatchTimeoutSecs: 600
//!   maxInFlight: 4
//!   clarificationEnabled: false
//!   failFastOnPartialStageFailure: true
//!   maxComposerCycles: 1
//!   forcedCategory: auto
//!
//! executor:
//!   kind: http                    # http | command | echo
//!   adapter: anthropic            # anthropic | openai
//!   apiKey: "${ANTHROPIC_API_KEY}"
//!   model: "${CONDUCTOR_MODEL:-claude-sonnet-4-20250514}"
//!
//! agentsDirs:
//!   - ./agents
//! planDir: .conductor/plans
//! ```
//!
//! `${VAR}` and `${VAR:-default}` references are expanded before parsing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::executor::{
    AgentExecutor, CommandAgentExecutor, EchoExecutor, HttpAdapter, HttpAgentExecutor,
    HttpExecutorConfig,
};
use crate::models::{ExecutionStrategy, AUTO_CATEGORY};
use crate::persistence::PlanWriter;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "CONDUCTOR_CONFIG";
/// Environment variable overriding the executor model.
pub const MODEL_ENV: &str = "CONDUCTOR_MODEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::error::OrchestrationError {
    fn from(e: ConfigError) -> Self {
        crate::error::OrchestrationError::Config(e.to_string())
    }
}

// ─── RunConfig ────────────────────────────────────────────────────────────

/// Per-run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Overrides every stage's strategy when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub per_dispatch_timeout_secs: u64,
    pub max_in_flight: usize,
    pub clarification_enabled: bool,
    pub max_clarification_questions: usize,
    /// Question rounds before the gate proceeds with what it has.
    pub max_clarification_rounds: u32,
    pub fail_fast_on_partial_stage_failure: bool,
    pub max_composer_cycles: u32,
    /// Specialist id or composite category; `auto` classifies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_category: Option<String>,
    pub optimization_enabled: bool,
    pub composer_enabled: bool,
    /// Candidates scoring below this are dropped by the splitter.
    pub min_classification_score: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            max_retries: 2,
            per_dispatch_timeout_secs: 600,
            max_in_flight: 4,
            clarification_enabled: false,
            max_clarification_questions: 5,
            max_clarification_rounds: 3,
            fail_fast_on_partial_stage_failure: true,
            max_composer_cycles: 1,
            forced_category: None,
            optimization_enabled: true,
            composer_enabled: true,
            min_classification_score: 1.0,
        }
    }
}

impl RunConfig {
    pub fn per_dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.per_dispatch_timeout_secs)
    }

    /// Total attempts per SubTask, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The forced category, with `auto` treated as absent.
    pub fn forced_category(&self) -> Option<&str> {
        self.forced_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.eq_ignore_ascii_case(AUTO_CATEGORY))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("maxInFlight must be at least 1".to_string()));
        }
        if self.per_dispatch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "perDispatchTimeoutSecs must be greater than 0".to_string(),
            ));
        }
        if self.clarification_enabled && self.max_clarification_rounds == 0 {
            return Err(ConfigError::Invalid(
                "maxClarificationRounds must be at least 1 when clarification is enabled".to_string(),
            ));
        }
        if let Some(category) = &self.forced_category {
            if category.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "forcedCategory must not be blank; use \"auto\" to classify".to_string(),
                ));
            }
        }
        if !self.min_classification_score.is_finite() || self.min_classification_score < 0.0 {
            return Err(ConfigError::Invalid(
                "minClassificationScore must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Executor settings ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Http,
    Command,
    Echo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    pub kind: ExecutorKind,
    pub adapter: HttpAdapter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Binary for the command executor, e.g. `cursor-agent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::Http,
            adapter: HttpAdapter::Anthropic,
            base_url: None,
            api_key: None,
            model: None,
            max_tokens: 8192,
            temperature: None,
            command: None,
            args: Vec::new(),
        }
    }
}

impl ExecutorSettings {
    /// HTTP settings with environment fallbacks for unset values.
    pub fn http_config(&self) -> HttpExecutorConfig {
        let adapter = self.adapter;
        let (key_vars, url_var): (&[&str], &str) = match adapter {
            HttpAdapter::Anthropic => (&["ANTHROPIC_API_KEY", "ANTHROPIC_AUTH_TOKEN"], "ANTHROPIC_BASE_URL"),
            HttpAdapter::OpenAi => (&["OPENAI_API_KEY"], "OPENAI_BASE_URL"),
        };

        let api_key = non_empty(self.api_key.clone())
            .or_else(|| key_vars.iter().find_map(|v| non_empty(std::env::var(v).ok())))
            .unwrap_or_default();
        let base_url = non_empty(self.base_url.clone())
            .or_else(|| non_empty(std::env::var(url_var).ok()))
            .unwrap_or_else(|| HttpExecutorConfig::default_base_url(adapter).to_string());
        let model = non_empty(self.model.clone())
            .or_else(|| non_empty(std::env::var(MODEL_ENV).ok()))
            .unwrap_or_else(|| HttpExecutorConfig::default_model(adapter).to_string());

        HttpExecutorConfig {
            adapter,
            base_url,
            api_key,
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Build the configured executor.
    pub fn build(&self) -> Result<Arc<dyn AgentExecutor>, ConfigError> {
        match self.kind {
            ExecutorKind::Echo => Ok(Arc::new(EchoExecutor)),
            ExecutorKind::Command => {
                let command = non_empty(self.command.clone()).ok_or_else(|| {
                    ConfigError::Invalid("executor.command is required for kind: command".to_string())
                })?;
                let mut args = self.args.clone();
                if let Some(model) = non_empty(self.model.clone())
                    .or_else(|| non_empty(std::env::var(MODEL_ENV).ok()))
                {
                    if !args.iter().any(|a| a == "--model") {
                        args.push("--model".to_string());
                        args.push(model);
                    }
                }
                Ok(Arc::new(CommandAgentExecutor::new(command, args)))
            }
            ExecutorKind::Http => {
                let executor = HttpAgentExecutor::new(self.http_config())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(Arc::new(executor))
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ─── Config file ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConductorConfig {
    pub run: RunConfig,
    pub executor: ExecutorSettings,
    /// Extra specialist directories, searched after the defaults.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents_dirs: Vec<PathBuf>,
    /// Where plan documents are written; relative to the workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_dir: Option<PathBuf>,
}

impl ConductorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = resolve_env_vars(yaml);
        let config: Self =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.run.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// `$CONDUCTOR_CONFIG` if set, else `<workspace>/.conductor/config.yaml` when it exists.
    pub fn default_path(workspace: &Path) -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        let path = workspace.join(".conductor").join("config.yaml");
        path.is_file().then_some(path)
    }

    /// Load from an explicit path, the default location, or fall back to defaults.
    pub fn load(explicit: Option<&Path>, workspace: &Path) -> Result<Self, ConfigError> {
        match explicit.map(Path::to_path_buf).or_else(|| Self::default_path(workspace)) {
            Some(path) => {
                tracing::debug!("[Config] Loading {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Writer for `planDir`, resolved against `workspace` when relative.
    pub fn plan_writer(&self, workspace: &Path) -> PlanWriter {
        match &self.plan_dir {
            Some(dir) if dir.is_absolute() => PlanWriter::with_base_dir(dir),
            Some(dir) => PlanWriter::with_base_dir(workspace.join(dir)),
            None => PlanWriter::new(workspace),
        }
    }
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}`; unset variables without
/// a default are left as written.
pub fn resolve_env_vars(input: &str) -> String {
    static ENV_REF: OnceLock<Regex> = OnceLock::new();
    let re = ENV_REF.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));
    re.replace_all(input, |caps: &regex::Captures| {
        let var_expr = &caps[1];
        if let Some(idx) = var_expr.find(":-") {
            let var_name = &var_expr[..idx];
            let default_val = &var_expr[idx + 2..];
            std::env::var(var_name)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default_val.to_string())
        } else {
            std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
        }
    })
    .to_string()
}
