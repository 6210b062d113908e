//! Configuration loading: TOML file plus environment variable overrides,
//! using a load-or-default pattern.

use std::path::Path;

use anyhow::{Context, Result};
use orchestrator_protocol::OrchestratorConfig;

/// Load configuration from a TOML file at the given path, then overlay
/// environment variables. If the file doesn't exist, defaults are used
/// (with a warning) before the env overlay runs.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    let mut config = if !path.exists() {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        OrchestratorConfig::default()
    } else {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: OrchestratorConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse config TOML")?;
        tracing::info!("Loaded config from {}", path.display());
        config
    };

    config.apply_env_overrides();
    Ok(config)
}
