//! Error types for Preflight

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using PreflightError
pub type Result<T> = std::result::Result<T, PreflightError>;

/// Main error type for Preflight operations
#[derive(Debug, Error)]
pub enum PreflightError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// One or more validation failures, collected in a single pass
    #[error("Invalid configuration:\n  {}", .violations.join("\n  "))]
    Invalid { violations: Vec<String> },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}
