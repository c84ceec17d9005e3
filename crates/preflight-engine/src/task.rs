//! Task model

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use preflight_core::Bucket;

/// One schedulable check invocation.
///
/// Tasks are immutable once built: the planner constructs them and every
/// later stage only reads. The derived cache key covers the check kind,
/// the resolved command, and the resolved targets, so two identically
/// configured tasks always share a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within a plan
    pub id: String,

    /// Check kind; cache entries and runner dispatch key on this
    pub check: String,

    /// Resolved command argv
    pub command: Vec<String>,

    /// Targets the command operates on
    pub targets: Vec<String>,

    /// Ids this task waits for in the graph
    pub depends_on: BTreeSet<String>,

    /// Per-task timeout in seconds, when different from the system default
    pub timeout_secs: Option<u64>,

    /// Whether the command rewrites files in place
    pub mutates: bool,

    /// Execution bucket
    pub bucket: Bucket,

    /// Input globs whose stats validate cached results
    pub inputs: Vec<String>,

    /// Checks whose caches a successful run of this task invalidates
    #[serde(default)]
    pub affected: Vec<String>,

    /// Whether a large test suite behind this task may be partitioned
    #[serde(default)]
    pub partitionable: bool,
}

impl Task {
    /// Create a new task with the given id and check kind
    pub fn new(id: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            check: check.into(),
            command: Vec::new(),
            targets: Vec::new(),
            depends_on: BTreeSet::new(),
            timeout_secs: None,
            mutates: false,
            bucket: Bucket::Fast,
            inputs: Vec::new(),
            affected: Vec::new(),
            partitionable: false,
        }
    }

    /// Set the command argv
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Set the target list
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Add dependency ids
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    /// Set a per-task timeout in seconds
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set the execution bucket
    pub fn with_bucket(mut self, bucket: Bucket) -> Self {
        self.bucket = bucket;
        self
    }

    /// Mark the task as rewriting files
    pub fn with_mutates(mut self, mutates: bool) -> Self {
        self.mutates = mutates;
        self
    }

    /// Set the input globs used for cache validation
    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set the checks invalidated after a successful run
    pub fn with_affected(mut self, affected: Vec<String>) -> Self {
        self.affected = affected;
        self
    }

    /// Allow partitioned execution for this task
    pub fn with_partitionable(mut self, partitionable: bool) -> Self {
        self.partitionable = partitionable;
        self
    }

    /// Effective timeout, falling back to the system default
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }

    /// Derived cache key over check kind, command, and targets
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.check.as_bytes());
        for arg in &self.command {
            hasher.update([0]);
            hasher.update(arg.as_bytes());
        }
        for target in &self.targets {
            hasher.update([1]);
            hasher.update(target.as_bytes());
        }
        let mut key = format!("{:x}", hasher.finalize());
        key.truncate(16);
        key
    }
}
