//! Task outcomes and run reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use preflight_core::{Bucket, ExecutionProfile};

use crate::cache::{CacheEntry, EntryStatus};

/// Terminal status of a dispatched task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Command exited zero
    Ok,
    /// Command exited non-zero
    Fail,
    /// Not run, a dependency rule blocked it
    Skipped { reason: String, prerequisite: String },
    /// Killed after exceeding its timeout
    TimedOut,
    /// Could not be spawned or supervised
    Errored { message: String },
}

impl TaskStatus {
    /// Whether this status counts as a failed prerequisite for rules
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Fail | TaskStatus::TimedOut | TaskStatus::Errored { .. }
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskStatus::Skipped { .. })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Fail => "fail",
            TaskStatus::Skipped { .. } => "skipped",
            TaskStatus::TimedOut => "timed out",
            TaskStatus::Errored { .. } => "errored",
        };
        write!(f, "{label}")
    }
}

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheProvenance {
    /// Executed this run
    Miss,
    /// Served from the per-tool cache without executing
    Hit,
    /// Served from the last-green record on the zero-run path
    Verified,
}

/// Outcome of a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,

    /// Tool identity, shared by tasks of the same check kind
    pub check: String,

    pub status: TaskStatus,

    /// Provenance is separate from status so "ok from cache" and
    /// "ok from execution" are never ambiguous
    pub cache: CacheProvenance,

    pub elapsed_ms: u64,

    /// Combined output, empty when the task passed quietly
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl TaskResult {
    pub fn ok(
        id: impl Into<String>,
        check: impl Into<String>,
        elapsed_ms: u64,
        output: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            check: check.into(),
            status: TaskStatus::Ok,
            cache: CacheProvenance::Miss,
            elapsed_ms,
            output: output.into(),
            exit_code: Some(0),
        }
    }

    pub fn fail(
        id: impl Into<String>,
        check: impl Into<String>,
        elapsed_ms: u64,
        exit_code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            check: check.into(),
            status: TaskStatus::Fail,
            cache: CacheProvenance::Miss,
            elapsed_ms,
            output: output.into(),
            exit_code,
        }
    }

    pub fn skipped(
        id: impl Into<String>,
        check: impl Into<String>,
        reason: impl Into<String>,
        prerequisite: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            check: check.into(),
            status: TaskStatus::Skipped {
                reason: reason.into(),
                prerequisite: prerequisite.into(),
            },
            cache: CacheProvenance::Miss,
            elapsed_ms: 0,
            output: String::new(),
            exit_code: None,
        }
    }

    pub fn timed_out(id: impl Into<String>, check: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            id: id.into(),
            check: check.into(),
            status: TaskStatus::TimedOut,
            cache: CacheProvenance::Miss,
            elapsed_ms: timeout_secs.saturating_mul(1000),
            output: format!("timed out after {timeout_secs}s"),
            exit_code: None,
        }
    }

    pub fn errored(
        id: impl Into<String>,
        check: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            check: check.into(),
            status: TaskStatus::Errored {
                message: message.into(),
            },
            cache: CacheProvenance::Miss,
            elapsed_ms: 0,
            output: String::new(),
            exit_code: None,
        }
    }

    /// Replay a cached outcome. A stored failure stays a failure.
    pub fn from_cache(id: impl Into<String>, entry: &CacheEntry) -> Self {
        let status = match entry.status {
            EntryStatus::Ok => TaskStatus::Ok,
            EntryStatus::Fail => TaskStatus::Fail,
        };
        Self {
            id: id.into(),
            check: entry.tool.clone(),
            status,
            cache: CacheProvenance::Hit,
            elapsed_ms: (entry.elapsed_secs * 1000.0) as u64,
            output: entry.output.clone(),
            exit_code: None,
        }
    }

    /// Copy of this result with provenance `verified` (zero-run path)
    pub fn as_verified(&self) -> Self {
        let mut copy = self.clone();
        copy.cache = CacheProvenance::Verified;
        copy
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    pub fn passed(&self) -> bool {
        self.status == TaskStatus::Ok
    }
}

/// Wall-clock time one bucket took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub bucket: Bucket,
    pub elapsed_ms: u64,
}

/// Summary of one engine run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub profile: ExecutionProfile,
    pub started_at: DateTime<Utc>,
    pub total_ms: u64,

    /// Whole report served from the last-green record; nothing ran
    #[serde(default)]
    pub verified_from_cache: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phase_timings: Vec<PhaseTiming>,

    /// Results in plan order
    pub results: Vec<TaskResult>,
}

impl RunReport {
    pub fn new(profile: ExecutionProfile) -> Self {
        Self {
            profile,
            started_at: Utc::now(),
            total_ms: 0,
            verified_from_cache: false,
            phase_timings: Vec::new(),
            results: Vec::new(),
        }
    }

    /// True when no result counts as a failure. Skips do not fail a run.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| !r.is_failure())
    }

    pub fn get(&self, id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.id == id)
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status.is_skipped())
            .count()
    }

    /// Results served without executing (per-tool hits and verified)
    pub fn cached_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.cache != CacheProvenance::Miss)
            .count()
    }
}
