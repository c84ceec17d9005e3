//! Configuration types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Bucket, ExecutionProfile};

/// Main configuration for Preflight
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Project name
    pub name: Option<String>,

    /// Engine configuration
    pub engine: EngineConfig,

    /// Repo fingerprint configuration
    pub fingerprint: FingerprintConfig,

    /// Per-check overrides, keyed by check id.
    ///
    /// A `BTreeMap` so merge order is deterministic; derived plans must be
    /// byte-stable for identical config bytes.
    pub checks: BTreeMap<String, CheckOverride>,

    /// Dependency rules added on top of the built-in rule set
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Test partitioning configuration
    pub partition: PartitionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: None,
            name: None,
            engine: EngineConfig::default(),
            fingerprint: FingerprintConfig::default(),
            checks: BTreeMap::new(),
            rules: Vec::new(),
            partition: PartitionConfig::default(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Execution profile selecting checks and rule strictness
    pub profile: ExecutionProfile,

    /// Worker pool size for the parallel buckets (0 = min(4, cores))
    pub max_workers: usize,

    /// Default per-task timeout in seconds
    pub default_timeout_secs: u64,

    /// Whether the per-tool result cache is consulted at all
    pub cache_enabled: bool,

    /// Cache entries older than this are treated as expired
    pub cache_max_age_secs: u64,

    /// Cache directory, relative to the repo root
    pub cache_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: ExecutionProfile::Dev,
            max_workers: 0,
            default_timeout_secs: 300,
            cache_enabled: true,
            cache_max_age_secs: 86_400,
            cache_dir: ".preflight/cache".to_string(),
        }
    }
}

/// Repo fingerprint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Whether the zero-run verification path is enabled
    pub enabled: bool,

    /// Glob patterns for the tracked file set
    pub include: Vec<String>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include: super::defaults::default_fingerprint_globs(),
        }
    }
}

/// Per-check configuration override
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOverride {
    /// Whether this check runs at all
    pub enabled: bool,

    /// Replacement command argv
    pub command: Option<Vec<String>>,

    /// Replacement target list
    pub targets: Option<Vec<String>>,

    /// Extra dependency ids added to the built-in ones
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Bucket override
    pub bucket: Option<Bucket>,

    /// Timeout override in seconds
    pub timeout_secs: Option<u64>,

    /// Replacement input glob patterns for cache validation
    pub inputs: Option<Vec<String>>,
}

impl Default for CheckOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            targets: None,
            depends_on: Vec::new(),
            bucket: None,
            timeout_secs: None,
            inputs: None,
        }
    }
}

/// One declarative dependency rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Check that gets skipped
    pub dependent: String,

    /// Check whose failure triggers the skip
    pub prerequisite: String,

    /// Human-readable reason shown in the report
    #[serde(default)]
    pub reason: String,

    /// Strict rules block under every profile, not just `strict`
    #[serde(default)]
    pub strict: bool,
}

/// Test partitioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Whether large test suites are split across the worker pool
    pub enabled: bool,

    /// Estimated-case threshold above which the suite is partitioned
    pub threshold: usize,

    /// How many files to sample when estimating the case count
    pub sample: usize,

    /// Glob patterns for test file discovery
    pub patterns: Vec<String>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 200,
            sample: 10,
            patterns: super::defaults::default_test_patterns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.engine.default_timeout_secs, 300);
        assert_eq!(parsed.engine.cache_dir, ".preflight/cache");
        assert!(parsed.checks.is_empty());
    }

    #[test]
    fn test_check_override_defaults_enabled() {
        let config: Config = toml::from_str(
            r#"
            [checks.lint]
            timeout_secs = 30
            "#,
        )
        .unwrap();
        let lint = &config.checks["lint"];
        assert!(lint.enabled);
        assert_eq!(lint.timeout_secs, Some(30));
        assert!(lint.command.is_none());
    }

    #[test]
    fn test_bucket_override_parses() {
        let config: Config = toml::from_str(
            r#"
            [checks.typecheck]
            bucket = "fast"
            "#,
        )
        .unwrap();
        assert_eq!(config.checks["typecheck"].bucket, Some(Bucket::Fast));
    }

    #[test]
    fn test_rules_parse() {
        let config: Config = toml::from_str(
            r#"
            [[rules]]
            dependent = "test"
            prerequisite = "lint"
            reason = "lint failures make test output noise"
            strict = true
            "#,
        )
        .unwrap();
        assert_eq!(config.rules.len(), 1);
        assert!(config.rules[0].strict);
    }
}
