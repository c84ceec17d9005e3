//! Default configuration values and the built-in check catalog

use crate::types::{Bucket, ExecutionProfile};

use super::types::RuleConfig;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "preflight.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "preflight.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".preflight.toml",
        ".preflight.yaml",
    ]
}

/// One entry of the built-in check catalog
#[derive(Debug, Clone, Copy)]
pub struct CheckSpec {
    /// Check id, unique across the catalog
    pub id: &'static str,

    /// Execution bucket
    pub bucket: Bucket,

    /// Whether the check rewrites files in place
    pub mutates: bool,

    /// Default command argv
    pub command: &'static [&'static str],

    /// Default targets the command operates on
    pub targets: &'static [&'static str],

    /// Input globs whose stats validate cached results
    pub inputs: &'static [&'static str],

    /// Checks this one waits for in the task graph
    pub depends_on: &'static [&'static str],

    /// Checks whose caches a successful run of this one invalidates
    /// (meaningful for mutating checks only)
    pub affected: &'static [&'static str],
}

/// The built-in check catalog.
///
/// Default chain: `lint` and `sanity` run independently in the fast
/// bucket and `test` depends on both; `format` is the lone mutating
/// check; `typecheck` joins `test` in the slow bucket.
pub const BUILTIN_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "lint",
        bucket: Bucket::Fast,
        mutates: false,
        command: &["cargo", "clippy", "--quiet"],
        targets: &[],
        inputs: &["src/**/*.rs", "Cargo.toml", "clippy.toml"],
        depends_on: &[],
        affected: &[],
    },
    CheckSpec {
        id: "sanity",
        bucket: Bucket::Fast,
        mutates: false,
        command: &["cargo", "verify-project"],
        targets: &[],
        inputs: &["Cargo.toml", "Cargo.lock"],
        depends_on: &[],
        affected: &[],
    },
    CheckSpec {
        id: "format",
        bucket: Bucket::Mutating,
        mutates: true,
        command: &["cargo", "fmt"],
        targets: &[],
        inputs: &["src/**/*.rs", "tests/**/*.rs", "rustfmt.toml"],
        depends_on: &[],
        affected: &["lint", "typecheck", "test"],
    },
    CheckSpec {
        id: "typecheck",
        bucket: Bucket::Slow,
        mutates: false,
        command: &["cargo", "check", "--quiet"],
        targets: &[],
        inputs: &["src/**/*.rs", "Cargo.toml", "Cargo.lock"],
        depends_on: &[],
        affected: &[],
    },
    CheckSpec {
        id: "test",
        bucket: Bucket::Slow,
        mutates: false,
        command: &["cargo", "test", "--quiet"],
        targets: &[],
        inputs: &["src/**/*.rs", "tests/**/*.rs", "Cargo.toml", "Cargo.lock"],
        depends_on: &["lint", "sanity"],
        affected: &[],
    },
];

/// Look up a catalog entry by id
pub fn builtin_check(id: &str) -> Option<&'static CheckSpec> {
    BUILTIN_CHECKS.iter().find(|spec| spec.id == id)
}

/// The built-in dependency rules
pub fn builtin_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig {
            dependent: "typecheck".to_string(),
            prerequisite: "lint".to_string(),
            reason: "typecheck output is noise once lint reports syntax errors".to_string(),
            strict: true,
        },
        RuleConfig {
            dependent: "test".to_string(),
            prerequisite: "lint".to_string(),
            reason: "failing lint makes test results untrustworthy".to_string(),
            strict: false,
        },
    ]
}

/// Which catalog checks a profile selects
pub fn profile_checks(profile: ExecutionProfile) -> &'static [&'static str] {
    match profile {
        ExecutionProfile::Fast => &["lint", "sanity"],
        ExecutionProfile::Dev => &["lint", "sanity", "typecheck"],
        ExecutionProfile::Full | ExecutionProfile::Strict => {
            &["lint", "sanity", "format", "typecheck", "test"]
        }
    }
}

/// Default tracked-file globs for the repo fingerprint
pub fn default_fingerprint_globs() -> Vec<String> {
    vec![
        "src/**/*".to_string(),
        "tests/**/*".to_string(),
        "Cargo.toml".to_string(),
        "Cargo.lock".to_string(),
        "preflight.toml".to_string(),
    ]
}

/// Default test file discovery patterns
pub fn default_test_patterns() -> Vec<String> {
    vec!["tests/**/*.rs".to_string()]
}
