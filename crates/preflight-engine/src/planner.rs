//! Plan construction and the plan cache
//!
//! A plan is the validated task graph plus the effective rule set for
//! one profile. Building it is pure config work: catalog defaults
//! merged with per-check overrides, rules validated against the full
//! check universe, the graph checked for cycles. `plan_tasks` wraps the
//! build in a content-addressed memo keyed by the raw config bytes,
//! version markers, and the profile, so an unchanged config skips the
//! rebuild entirely.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use preflight_core::{
    builtin_check, builtin_rules, profile_checks, Bucket, CheckOverride, Config, ConfigError,
    ExecutionProfile, BUILTIN_CHECKS,
};

use crate::cache::write_json_atomic;
use crate::dag::{GraphError, TaskDag};
use crate::rules::{DependencyRule, RuleSet};
use crate::task::Task;

/// Validated task graph plus the effective rule set for one profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub dag: TaskDag,
    pub rules: RuleSet,
}

impl Plan {
    /// Tasks cloned out in deterministic execution (topological) order
    pub fn ordered_tasks(&self) -> Result<Vec<Task>, GraphError> {
        let order = self.dag.topo_order()?;
        Ok(order
            .iter()
            .filter_map(|id| self.dag.get(id).cloned())
            .collect())
    }
}

/// Build the plan for `profile` from config and the built-in catalog.
///
/// Rules are validated against the full check universe (catalog plus
/// every configured check), not just the profile's selection, so a rule
/// naming a check another profile runs is not a violation. All rule and
/// graph violations are collected into one fatal `ConfigError`.
pub fn build_plan(config: &Config, profile: ExecutionProfile) -> Result<Plan, ConfigError> {
    let mut universe: BTreeSet<String> = BUILTIN_CHECKS
        .iter()
        .map(|spec| spec.id.to_string())
        .collect();
    universe.extend(config.checks.keys().cloned());

    let selected = selected_checks(config, profile);

    let mut rule_configs = builtin_rules();
    rule_configs.extend(config.rules.iter().cloned());
    let rules = RuleSet::new(
        rule_configs
            .into_iter()
            .map(DependencyRule::from)
            .collect::<Vec<_>>(),
    );

    let violations = rules.validate(&universe);
    if !violations.is_empty() {
        return Err(ConfigError::Invalid {
            violations: violations.iter().map(ToString::to_string).collect(),
        });
    }

    let mut dag = TaskDag::new();
    for id in &selected {
        let task = build_task(id, config.checks.get(id), &selected, &universe)?;
        dag.add_task(task).map_err(invalid)?;
    }
    dag.validate().map_err(invalid)?;

    Ok(Plan { dag, rules })
}

fn invalid(err: GraphError) -> ConfigError {
    ConfigError::Invalid {
        violations: vec![err.to_string()],
    }
}

/// Checks the profile selects, catalog order first, then configured
/// extras in name order. Checks outside the catalog run in every
/// profile; `enabled = false` excludes any check.
fn selected_checks(config: &Config, profile: ExecutionProfile) -> Vec<String> {
    let wanted = profile_checks(profile);
    let mut selected = Vec::new();

    for spec in BUILTIN_CHECKS {
        if !wanted.contains(&spec.id) {
            continue;
        }
        if config.checks.get(spec.id).is_some_and(|c| !c.enabled) {
            continue;
        }
        selected.push(spec.id.to_string());
    }
    for (id, check) in &config.checks {
        if builtin_check(id).is_none() && check.enabled {
            selected.push(id.clone());
        }
    }
    selected
}

fn build_task(
    id: &str,
    check: Option<&CheckOverride>,
    selected: &[String],
    universe: &BTreeSet<String>,
) -> Result<Task, ConfigError> {
    let spec = builtin_check(id);

    let command = check
        .and_then(|c| c.command.clone())
        .or_else(|| spec.map(|s| to_strings(s.command)));
    let command = match command {
        Some(command) if !command.is_empty() => command,
        _ => {
            return Err(ConfigError::InvalidValue {
                field: format!("checks.{id}.command"),
                message: "check has no command".to_string(),
            })
        }
    };

    let targets = check
        .and_then(|c| c.targets.clone())
        .or_else(|| spec.map(|s| to_strings(s.targets)))
        .unwrap_or_default();
    let inputs = check
        .and_then(|c| c.inputs.clone())
        .or_else(|| spec.map(|s| to_strings(s.inputs)))
        .unwrap_or_default();
    // Catalog invariant: a check mutates iff it runs in the mutating
    // bucket, and overriding the bucket moves the behavior with it.
    let bucket = check
        .and_then(|c| c.bucket)
        .or_else(|| spec.map(|s| s.bucket))
        .unwrap_or(Bucket::Slow);
    let affected = spec.map(|s| to_strings(s.affected)).unwrap_or_default();

    // Dependencies on checks the profile excludes are dropped; truly
    // unknown ids are config errors.
    let mut deps: Vec<String> = spec.map(|s| to_strings(s.depends_on)).unwrap_or_default();
    if let Some(check) = check {
        deps.extend(check.depends_on.iter().cloned());
    }
    let mut kept = Vec::new();
    for dep in deps {
        if selected.contains(&dep) {
            kept.push(dep);
        } else if universe.contains(&dep) {
            debug!(check = id, dependency = %dep, "dependency excluded by profile, dropped");
        } else {
            return Err(ConfigError::InvalidValue {
                field: format!("checks.{id}.depends_on"),
                message: format!("unknown check '{dep}'"),
            });
        }
    }

    let mut task = Task::new(id, id)
        .with_command(command)
        .with_targets(targets)
        .with_dependencies(kept)
        .with_bucket(bucket)
        .with_mutates(bucket == Bucket::Mutating)
        .with_inputs(inputs)
        .with_affected(affected)
        .with_partitionable(id == "test");
    if let Some(secs) = check.and_then(|c| c.timeout_secs) {
        task = task.with_timeout_secs(secs);
    }
    Ok(task)
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Content-addressed plan memo under the cache directory
#[derive(Debug, Clone)]
pub struct PlanCache {
    dir: PathBuf,
}

impl PlanCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: cache_dir.into(),
        }
    }

    /// Cache key over the raw config bytes, version markers, and the
    /// profile. The profile selects the check set, so it is part of
    /// the plan's identity.
    pub fn key(config_bytes: &[u8], profile: ExecutionProfile) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"preflight-plan-v1");
        hasher.update([0]);
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.update([0]);
        hasher.update(config_bytes);
        hasher.update([0]);
        hasher.update(profile.to_string().as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..16].to_string()
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("plan-{key}.json"))
    }

    /// Load a memoized plan. Corrupt or structurally invalid memos are
    /// discarded with a warning, never an error.
    pub fn load(&self, key: &str) -> Option<Plan> {
        let path = self.path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "cannot read plan cache");
                return None;
            }
        };
        let plan: Plan = match serde_json::from_slice(&bytes) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt plan cache, rebuilding");
                return None;
            }
        };
        if let Err(err) = plan.dag.validate() {
            warn!(path = %path.display(), error = %err, "plan cache failed validation, rebuilding");
            return None;
        }
        Some(plan)
    }

    /// Persist a plan; failures are logged, never fatal
    pub fn store(&self, key: &str, plan: &Plan) {
        if let Err(err) = write_json_atomic(&self.path(key), plan) {
            warn!(error = %err, "failed to write plan cache");
        }
    }
}

/// Build the plan for `profile`, served from the plan cache when config
/// bytes and version markers are unchanged
pub fn plan_tasks(
    cache_dir: &Path,
    config: &Config,
    config_bytes: &[u8],
    profile: ExecutionProfile,
) -> Result<Plan, ConfigError> {
    let cache = PlanCache::new(cache_dir);
    let key = PlanCache::key(config_bytes, profile);
    if let Some(plan) = cache.load(&key) {
        debug!(key = %key, "plan served from cache");
        return Ok(plan);
    }
    let plan = build_plan(config, profile)?;
    cache.store(&key, &plan);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::RuleConfig;
    use tempfile::TempDir;

    fn ids(plan: &Plan) -> Vec<&str> {
        plan.dag.tasks().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_dev_profile_selects_catalog_subset() {
        let plan = build_plan(&Config::default(), ExecutionProfile::Dev).unwrap();
        assert_eq!(ids(&plan), vec!["lint", "sanity", "typecheck"]);
    }

    #[test]
    fn test_full_profile_selects_all_catalog_checks() {
        let plan = build_plan(&Config::default(), ExecutionProfile::Full).unwrap();
        assert_eq!(
            ids(&plan),
            vec!["format", "lint", "sanity", "test", "typecheck"]
        );

        let test = plan.dag.get("test").unwrap();
        assert!(test.partitionable);
        assert_eq!(
            test.depends_on.iter().collect::<Vec<_>>(),
            vec!["lint", "sanity"]
        );

        let format = plan.dag.get("format").unwrap();
        assert!(format.mutates);
        assert_eq!(format.bucket, Bucket::Mutating);
        assert_eq!(format.affected, vec!["lint", "typecheck", "test"]);
    }

    #[test]
    fn test_disabled_check_is_excluded_and_deps_pruned() {
        let mut config = Config::default();
        config.checks.insert(
            "lint".to_string(),
            CheckOverride {
                enabled: false,
                ..CheckOverride::default()
            },
        );

        let plan = build_plan(&config, ExecutionProfile::Full).unwrap();
        assert!(plan.dag.get("lint").is_none());
        let test = plan.dag.get("test").unwrap();
        assert_eq!(test.depends_on.iter().collect::<Vec<_>>(), vec!["sanity"]);
    }

    #[test]
    fn test_overrides_replace_catalog_defaults() {
        let mut config = Config::default();
        config.checks.insert(
            "lint".to_string(),
            CheckOverride {
                command: Some(vec!["cargo".into(), "clippy".into(), "--all-targets".into()]),
                timeout_secs: Some(90),
                inputs: Some(vec!["src/**/*.rs".into()]),
                ..CheckOverride::default()
            },
        );

        let plan = build_plan(&config, ExecutionProfile::Dev).unwrap();
        let lint = plan.dag.get("lint").unwrap();
        assert_eq!(lint.command, vec!["cargo", "clippy", "--all-targets"]);
        assert_eq!(lint.timeout_secs, Some(90));
        assert_eq!(lint.inputs, vec!["src/**/*.rs"]);
        assert_eq!(lint.bucket, Bucket::Fast, "bucket keeps catalog default");
    }

    #[test]
    fn test_custom_check_joins_every_profile() {
        let mut config = Config::default();
        config.checks.insert(
            "audit".to_string(),
            CheckOverride {
                command: Some(vec!["cargo".into(), "audit".into()]),
                ..CheckOverride::default()
            },
        );

        let plan = build_plan(&config, ExecutionProfile::Fast).unwrap();
        let audit = plan.dag.get("audit").expect("custom check planned");
        assert_eq!(audit.bucket, Bucket::Slow, "custom default bucket");
        assert!(!audit.partitionable);
    }

    #[test]
    fn test_custom_check_without_command_is_rejected() {
        let mut config = Config::default();
        config
            .checks
            .insert("audit".to_string(), CheckOverride::default());

        match build_plan(&config, ExecutionProfile::Dev) {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "checks.audit.command");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let mut config = Config::default();
        config.checks.insert(
            "lint".to_string(),
            CheckOverride {
                depends_on: vec!["nope".to_string()],
                ..CheckOverride::default()
            },
        );

        assert!(matches!(
            build_plan(&config, ExecutionProfile::Dev),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rule_violations_are_fatal_and_collected() {
        let mut config = Config::default();
        config.rules.push(RuleConfig {
            dependent: "ghost".to_string(),
            prerequisite: "lint".to_string(),
            reason: String::new(),
            strict: true,
        });
        config.rules.push(RuleConfig {
            dependent: "lint".to_string(),
            prerequisite: "lint".to_string(),
            reason: String::new(),
            strict: true,
        });

        match build_plan(&config, ExecutionProfile::Dev) {
            Err(ConfigError::Invalid { violations }) => {
                assert_eq!(violations.len(), 2);
            }
            other => panic!("expected collected violations, got {other:?}"),
        }
    }

    #[test]
    fn test_rules_may_name_checks_outside_the_profile() {
        // The built-in test<-lint rule names "test", which the dev
        // profile does not run; that must not be a violation.
        assert!(build_plan(&Config::default(), ExecutionProfile::Dev).is_ok());
    }

    #[test]
    fn test_plan_serialization_is_deterministic() {
        let a = build_plan(&Config::default(), ExecutionProfile::Full).unwrap();
        let b = build_plan(&Config::default(), ExecutionProfile::Full).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_ordered_tasks_respect_dependencies() {
        let plan = build_plan(&Config::default(), ExecutionProfile::Full).unwrap();
        let order: Vec<String> = plan
            .ordered_tasks()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        let test_pos = order.iter().position(|id| id == "test").unwrap();
        let lint_pos = order.iter().position(|id| id == "lint").unwrap();
        assert!(lint_pos < test_pos);
    }

    #[test]
    fn test_plan_cache_round_trips() {
        let temp = TempDir::new().unwrap();
        let config = Config::default();
        let key = PlanCache::key(b"bytes", ExecutionProfile::Dev);

        let built = plan_tasks(temp.path(), &config, b"bytes", ExecutionProfile::Dev).unwrap();
        let cached = PlanCache::new(temp.path()).load(&key).expect("memo written");
        assert_eq!(
            serde_json::to_string(&built).unwrap(),
            serde_json::to_string(&cached).unwrap()
        );
    }

    #[test]
    fn test_corrupt_plan_cache_rebuilds_and_rewrites() {
        let temp = TempDir::new().unwrap();
        let config = Config::default();
        let key = PlanCache::key(b"bytes", ExecutionProfile::Dev);
        let path = temp.path().join(format!("plan-{key}.json"));
        std::fs::write(&path, "{broken").unwrap();

        let plan = plan_tasks(temp.path(), &config, b"bytes", ExecutionProfile::Dev).unwrap();
        assert_eq!(plan.dag.len(), 3);

        // The memo was rewritten with a valid plan.
        assert!(PlanCache::new(temp.path()).load(&key).is_some());
    }

    #[test]
    fn test_plan_key_tracks_config_profile_and_nothing_else() {
        let a = PlanCache::key(b"config-a", ExecutionProfile::Dev);
        assert_eq!(a, PlanCache::key(b"config-a", ExecutionProfile::Dev));
        assert_ne!(a, PlanCache::key(b"config-b", ExecutionProfile::Dev));
        assert_ne!(a, PlanCache::key(b"config-a", ExecutionProfile::Full));
        assert_eq!(a.len(), 16);
    }
}
