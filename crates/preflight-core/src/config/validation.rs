//! Configuration validation
//!
//! Validation collects every violation before failing so a broken config
//! is fixable in one round trip.

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration, reporting all violations in one pass
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    let mut violations = Vec::new();

    validate_engine(config, &mut violations);
    validate_checks(config, &mut violations);
    validate_rules(config, &mut violations);
    validate_partition(config, &mut violations);

    if violations.is_empty() {
        debug!("configuration validation passed");
        Ok(())
    } else {
        Err(ConfigError::Invalid { violations }.into())
    }
}

fn validate_engine(config: &Config, violations: &mut Vec<String>) {
    if config.engine.default_timeout_secs == 0 {
        violations.push("engine.default_timeout_secs - must be greater than zero".to_string());
    }
    if config.engine.cache_max_age_secs == 0 {
        violations.push("engine.cache_max_age_secs - must be greater than zero".to_string());
    }
    if config.engine.cache_dir.is_empty() {
        violations.push("engine.cache_dir - cannot be empty".to_string());
    }
}

fn validate_checks(config: &Config, violations: &mut Vec<String>) {
    for (id, check) in &config.checks {
        if id.is_empty() {
            violations.push("checks - check id cannot be empty".to_string());
            continue;
        }
        if let Some(command) = &check.command {
            if command.is_empty() {
                violations.push(format!("checks.{id}.command - cannot be empty"));
            }
        }
        if let Some(targets) = &check.targets {
            if targets.is_empty() {
                violations.push(format!("checks.{id}.targets - cannot be empty"));
            }
        }
        if check.timeout_secs == Some(0) {
            violations.push(format!("checks.{id}.timeout_secs - must be greater than zero"));
        }
        if check.depends_on.iter().any(|dep| dep == id) {
            violations.push(format!("checks.{id}.depends_on - cannot depend on itself"));
        }
    }
}

fn validate_rules(config: &Config, violations: &mut Vec<String>) {
    for (index, rule) in config.rules.iter().enumerate() {
        if rule.dependent.is_empty() {
            violations.push(format!("rules[{index}].dependent - cannot be empty"));
        }
        if rule.prerequisite.is_empty() {
            violations.push(format!("rules[{index}].prerequisite - cannot be empty"));
        }
        if !rule.dependent.is_empty() && rule.dependent == rule.prerequisite {
            violations.push(format!(
                "rules[{index}] - '{}' cannot be its own prerequisite",
                rule.dependent
            ));
        }
    }
}

fn validate_partition(config: &Config, violations: &mut Vec<String>) {
    if config.partition.threshold == 0 {
        violations.push("partition.threshold - must be greater than zero".to_string());
    }
    if config.partition.sample == 0 {
        violations.push("partition.sample - must be greater than zero".to_string());
    }
    if config.partition.enabled && config.partition.patterns.is_empty() {
        violations.push("partition.patterns - cannot be empty while partitioning is enabled".to_string());
    }
}
