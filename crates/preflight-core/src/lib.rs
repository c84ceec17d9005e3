//! Preflight Core - configuration and shared types
//!
//! This crate provides the configuration model, its loader and validation,
//! the built-in check catalog, and the error types shared across the
//! preflight workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    builtin_check, builtin_rules, config_file_names, default_fingerprint_globs,
    default_test_patterns, find_config, load_config, load_config_from_dir,
    load_config_or_default, profile_checks, validate_config, CheckOverride, CheckSpec, Config,
    EngineConfig, FingerprintConfig, PartitionConfig, RuleConfig, BUILTIN_CHECKS,
};
pub use error::{ConfigError, PreflightError, Result};
pub use types::{Bucket, ExecutionProfile};
