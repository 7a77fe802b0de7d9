//! `conductor config`: validate and show the effective configuration.

use std::path::Path;

use conductor_core::ConductorConfig;

use super::Context;

/// Parse and validate a config file without running anything.
pub fn validate(path: &Path) -> Result<String, String> {
    let config = ConductorConfig::from_file(path).map_err(|e| e.to_string())?;
    config.executor.build().map_err(|e| e.to_string())?;
    Ok(format!(
        "{} is valid (executor: {:?}, maxRetries: {}, maxInFlight: {})",
        path.display(),
        config.executor.kind,
        config.run.max_retries,
        config.run.max_in_flight
    ))
}

/// The loaded config as YAML, with the API key masked.
pub fn show(ctx: &Context) -> Result<String, String> {
    let mut config = ctx.config.clone();
    if config.executor.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
        config.executor.api_key = Some("********".to_string());
    }
    serde_yaml::to_string(&config).map_err(|e| format!("Failed to render config: {}", e))
}
