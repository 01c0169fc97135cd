//! Configuration module for exit-check
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use exit_check::config::{load_config, Config};
//!
//! let config = load_config("/etc/exit-check/config.json").unwrap();
//! println!("Policies: {}", config.policies_path().display());
//! ```

mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env, ENV_BASE_DIR,
    ENV_LOG_LEVEL, ENV_POLICIES, ENV_PROBE,
};
pub use types::{Config, DataConfig, IndexConfig, LogConfig, ProbeConfig};
