//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Environment variable overriding `data.base_dir`
pub const ENV_BASE_DIR: &str = "EXIT_CHECK_BASE_DIR";
/// Environment variable overriding `data.policies_path`
pub const ENV_POLICIES: &str = "EXIT_CHECK_POLICIES";
/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "EXIT_CHECK_LOG_LEVEL";
/// Environment variable overriding the probe as `addr:port`
pub const ENV_PROBE: &str = "EXIT_CHECK_PROBE";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: policies={}, probe={}:{}",
        config.policies_path().display(),
        config.probe.address,
        config.probe.port
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// A missing file is not an error here when `path` is `None`; the defaults
/// are used and the overrides applied on top.
///
/// Environment variables:
/// - `EXIT_CHECK_BASE_DIR`: Override the dataset base directory
/// - `EXIT_CHECK_POLICIES`: Override the dataset path
/// - `EXIT_CHECK_LOG_LEVEL`: Override log level
/// - `EXIT_CHECK_PROBE`: Override the probe destination (`addr:port`)
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails, or an override is
/// invalid.
pub fn load_config_with_env(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(path) => load_config(path)?,
        None => Config::default_config(),
    };
    apply_overrides(config, |name| std::env::var(name).ok())
}

fn apply_overrides(
    mut config: Config,
    var: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(base) = var(ENV_BASE_DIR) {
        config.data.base_dir = base;
        debug!("Base directory overridden to {}", config.data.base_dir);
    }

    if let Some(policies) = var(ENV_POLICIES) {
        config.data.policies_path = policies;
        debug!("Policies path overridden to {}", config.data.policies_path);
    }

    if let Some(level) = var(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(probe) = var(ENV_PROBE) {
        let addr: std::net::SocketAddr = probe.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_PROBE.into(),
            reason: format!("Invalid socket address: {probe}"),
        })?;
        config.probe.address = addr.ip().to_string();
        config.probe.port = addr.port();
        debug!("Probe overridden to {}", addr);
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
