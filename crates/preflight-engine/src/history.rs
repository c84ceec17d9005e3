//! Run history
//!
//! One JSON line per completed run, appended to `history.jsonl` under
//! the cache directory. The log is advisory: append failures are
//! logged and never fail a run.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use preflight_core::ExecutionProfile;

use crate::result::RunReport;

const HISTORY_FILE: &str = "history.jsonl";

/// One line of the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub finished_at: DateTime<Utc>,
    pub profile: ExecutionProfile,
    pub passed: bool,
    pub verified_from_cache: bool,
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cached: usize,
    pub total_ms: u64,
}

impl RunRecord {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            finished_at: Utc::now(),
            profile: report.profile,
            passed: report.passed(),
            verified_from_cache: report.verified_from_cache,
            total: report.total(),
            failed: report.failed_count(),
            skipped: report.skipped_count(),
            cached: report.cached_count(),
            total_ms: report.total_ms,
        }
    }
}

/// Appends run records under the cache directory
#[derive(Debug, Clone)]
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: cache_dir.into().join(HISTORY_FILE),
        }
    }

    /// Append one record; failures are logged, never fatal
    pub fn append(&self, record: &RunRecord) {
        if let Err(err) = self.try_append(record) {
            warn!(path = %self.path.display(), error = %err, "failed to append run history");
        }
    }

    fn try_append(&self, record: &RunRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(passed: bool) -> RunRecord {
        RunRecord {
            finished_at: Utc::now(),
            profile: ExecutionProfile::Dev,
            passed,
            verified_from_cache: false,
            total: 3,
            failed: usize::from(!passed),
            skipped: 0,
            cached: 1,
            total_ms: 4321,
        }
    }

    #[test]
    fn test_append_writes_one_line_per_run() {
        let temp = TempDir::new().unwrap();
        let history = RunHistory::new(temp.path());

        history.append(&record(true));
        history.append(&record(false));

        let text = std::fs::read_to_string(temp.path().join(HISTORY_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: RunRecord = serde_json::from_str(lines[0]).unwrap();
        assert!(first.passed);
        assert_eq!(first.total, 3);
        let second: RunRecord = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.passed);
        assert_eq!(second.failed, 1);
    }

    #[test]
    fn test_append_creates_cache_dir() {
        let temp = TempDir::new().unwrap();
        let history = RunHistory::new(temp.path().join("nested/cache"));

        history.append(&record(true));
        assert!(temp.path().join("nested/cache").join(HISTORY_FILE).exists());
    }
}
