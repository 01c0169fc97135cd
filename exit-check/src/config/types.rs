//! Configuration types for exit-check
//!
//! All sections are optional in the JSON document; missing fields take the
//! defaults below.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::exits::{LoadSettings, DEFAULT_INITIAL_CAPACITY, DEFAULT_PROBE_ADDRESS, DEFAULT_PROBE_PORT};
use crate::index::DEFAULT_MAX_INTERVALS;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Dataset location
    #[serde(default)]
    pub data: DataConfig,

    /// Interval index limits
    #[serde(default)]
    pub index: IndexConfig,

    /// Known-exit probe destination
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.data.validate()?;
        self.index.validate()?;
        self.probe.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Full path of the dataset file
    ///
    /// `base_dir` is joined as a prefix, so both `"/srv/check/"` and
    /// `"/srv/check"` name the same directory.
    #[must_use]
    pub fn policies_path(&self) -> PathBuf {
        if self.data.base_dir.is_empty() {
            PathBuf::from(&self.data.policies_path)
        } else {
            PathBuf::from(&self.data.base_dir).join(&self.data.policies_path)
        }
    }

    /// Settings applied to every dataset load
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the probe address does not
    /// parse.
    pub fn load_settings(&self) -> Result<LoadSettings, ConfigError> {
        Ok(LoadSettings {
            max_intervals: self.index.max_intervals,
            initial_capacity: self.index.initial_capacity,
            probe: self.probe.socket_addr()?,
        })
    }
}

/// Dataset location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataConfig {
    /// Directory prefixed to `policies_path`; empty means the working directory
    #[serde(default)]
    pub base_dir: String,

    /// Dataset file, relative to `base_dir` unless absolute
    #[serde(default = "default_policies_path")]
    pub policies_path: String,
}

impl DataConfig {
    /// Validate data configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policies_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "policies_path cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            policies_path: default_policies_path(),
        }
    }
}

/// Interval index limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Maximum number of rule intervals in one dataset
    #[serde(default = "default_max_intervals")]
    pub max_intervals: usize,

    /// Initial capacity of the interval buffer
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

impl IndexConfig {
    /// Validate index configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_intervals == 0 {
            return Err(ConfigError::ValidationError(
                "max_intervals must be greater than 0".into(),
            ));
        }
        if self.initial_capacity > self.max_intervals {
            return Err(ConfigError::ValidationError(format!(
                "initial_capacity ({}) must not exceed max_intervals ({})",
                self.initial_capacity, self.max_intervals
            )));
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_intervals: default_max_intervals(),
            initial_capacity: default_initial_capacity(),
        }
    }
}

/// Known-exit probe destination
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Destination address
    #[serde(default = "default_probe_address")]
    pub address: String,

    /// Destination port
    #[serde(default = "default_probe_port")]
    pub port: u16,
}

impl ProbeConfig {
    /// Validate probe configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr().map(|_| ())
    }

    /// Probe destination as a socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address: IpAddr = self.address.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("Invalid probe address: {}", self.address))
        })?;
        Ok(SocketAddr::new(address, self.port))
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            address: default_probe_address(),
            port: default_probe_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid log format '{other}', expected 'json' or 'text'"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

// Default value functions

const fn default_true() -> bool {
    true
}

fn default_policies_path() -> String {
    "data/exit-policies".into()
}

const fn default_max_intervals() -> usize {
    DEFAULT_MAX_INTERVALS
}

const fn default_initial_capacity() -> usize {
    DEFAULT_INITIAL_CAPACITY
}

fn default_probe_address() -> String {
    DEFAULT_PROBE_ADDRESS.to_string()
}

const fn default_probe_port() -> u16 {
    DEFAULT_PROBE_PORT
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
