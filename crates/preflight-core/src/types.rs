//! Shared vocabulary types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Execution phase class for a check.
///
/// Buckets order the run: every fast check completes before any mutating
/// check starts, and every mutating check completes before any slow check
/// starts. Variant order is the phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Cheap, read-only checks run first with full parallelism
    Fast,
    /// Checks that rewrite files, run strictly one at a time
    Mutating,
    /// Expensive checks run last with bounded parallelism
    Slow,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Fast => write!(f, "fast"),
            Bucket::Mutating => write!(f, "mutating"),
            Bucket::Slow => write!(f, "slow"),
        }
    }
}

impl FromStr for Bucket {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Bucket::Fast),
            "mutating" => Ok(Bucket::Mutating),
            "slow" => Ok(Bucket::Slow),
            other => Err(ConfigError::InvalidValue {
                field: "bucket".to_string(),
                message: format!("unknown bucket '{other}' (expected fast, mutating, or slow)"),
            }),
        }
    }
}

/// Named bundle selecting which checks run and how strictly
/// dependency rules are honored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProfile {
    /// Quick feedback loop: fast bucket only
    Fast,
    /// Everyday local runs
    #[default]
    Dev,
    /// Everything, relaxed rule enforcement
    Full,
    /// Everything, and non-strict dependency rules block too
    Strict,
}

impl ExecutionProfile {
    /// Whether non-strict dependency rules block under this profile
    pub fn is_strict(&self) -> bool {
        matches!(self, ExecutionProfile::Strict)
    }
}

impl fmt::Display for ExecutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProfile::Fast => write!(f, "fast"),
            ExecutionProfile::Dev => write!(f, "dev"),
            ExecutionProfile::Full => write!(f, "full"),
            ExecutionProfile::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for ExecutionProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(ExecutionProfile::Fast),
            "dev" => Ok(ExecutionProfile::Dev),
            "full" => Ok(ExecutionProfile::Full),
            "strict" => Ok(ExecutionProfile::Strict),
            other => Err(ConfigError::InvalidValue {
                field: "profile".to_string(),
                message: format!("unknown profile '{other}' (expected fast, dev, full, or strict)"),
            }),
        }
    }
}
