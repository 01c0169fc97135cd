//! Error types for exit-check
//!
//! Errors are grouped by the stage that raises them. Load-time errors
//! ([`ParseError`], [`BuildError`], [`LoadError`]) abort a single load attempt
//! and never touch the generation that is currently serving. Query errors
//! ([`QueryError`]) are raised only at the input boundary; evaluation itself is
//! total over validated inputs.

use std::io;

use thiserror::Error;

/// Top-level error type for exit-check
#[derive(Debug, Error)]
pub enum ExitCheckError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dataset load or reload errors
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Caller-side precondition violations
    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExitCheckError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Load(e) => e.is_recoverable(),
            Self::Query(_) => false,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Reason a single policy record was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record could not be decoded at all
    #[error("malformed record: {0}")]
    Malformed(String),

    /// Relay or rule address is not an IP address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Netmask is not a contiguous mask or prefix length
    #[error("invalid mask: {0}")]
    InvalidMask(String),

    /// Address and mask belong to different address families
    #[error("address family mismatch between {address} and {mask}")]
    FamilyMismatch { address: String, mask: String },

    /// A non-wildcard rule without an address
    #[error("rule {position} is not a wildcard but has no address")]
    MissingAddress { position: usize },

    /// A port outside 0-65535
    #[error("port out of range: {0}")]
    PortOutOfRange(i64),

    /// A port range whose start is after its end
    #[error("invalid port range: {min}-{max}")]
    InvalidPortRange { min: u16, max: u16 },

    /// More policies than can be numbered
    #[error("too many policies in dataset")]
    TooManyPolicies,
}

/// Malformed policy record encountered during load
///
/// Carries the 0-based position of the first bad record in source order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {record}: {error}")]
pub struct ParseError {
    /// Position of the record in the source
    pub record: usize,
    /// What was wrong with it
    #[source]
    pub error: RecordError,
}

impl ParseError {
    /// Create a parse error for the record at `record`
    #[must_use]
    pub const fn new(record: usize, error: RecordError) -> Self {
        Self { record, error }
    }
}

/// Interval index construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// An interval whose lower bound is above its upper bound
    #[error("invalid interval: {min}-{max}")]
    InvalidInterval { min: u16, max: u16 },

    /// Construction limit exceeded
    #[error("too many intervals: {count} exceeds limit of {limit}")]
    TooManyIntervals { count: usize, limit: usize },

    /// A policy whose id does not match its position in the dataset
    #[error("policy at position {index} has id {id}")]
    NonSequentialPolicyId { index: usize, id: u32 },
}

/// Dataset load errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// A policy record was malformed
    #[error("Failed to parse policies: {0}")]
    Parse(#[from] ParseError),

    /// The interval index could not be built
    #[error("Failed to build interval index: {0}")]
    Build(#[from] BuildError),

    /// The record source could not be read
    #[error("Failed to read policy source {path}: {reason}")]
    Source { path: String, reason: String },

    /// Reload requested without a configured source
    #[error("No policy source configured")]
    NoSource,
}

impl LoadError {
    /// Check if retrying the load could succeed without a new dataset
    ///
    /// Only source read failures are transient; a malformed dataset stays
    /// malformed until it is replaced.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Source { .. })
    }

    /// Create a source read error
    pub fn unreadable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Source {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid query input detected at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Address string is not an IP address
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Port outside 0-65535
    #[error("invalid port: {0}")]
    InvalidPort(i64),
}

/// Type alias for Result with `ExitCheckError`
pub type Result<T> = std::result::Result<T, ExitCheckError>;
