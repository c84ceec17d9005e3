//! Whole-repo fingerprint and the zero-run verification path
//!
//! After a fully green run the repo fingerprint and the run's results
//! are persisted. A later run that finds the identical fingerprint for
//! the same profile replays those results as verified, spawning
//! nothing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use preflight_core::ExecutionProfile;

use crate::cache::write_json_atomic;
use crate::result::{RunReport, TaskResult};
use crate::stat::collect_input_stats;

const LAST_GREEN_FILE: &str = "last-green.json";

/// Stat-level digest of the repo.
///
/// Covers the relative path, size and mtime of every file matched by
/// the include globs, salted with the engine version and the raw config
/// bytes, so any tracked edit, rename, or settings change moves the
/// value. File contents are never read. `None` means the repo cannot be
/// fingerprinted right now (bad glob, file vanished mid-walk) and the
/// caller must fall back to a real run.
pub fn repo_fingerprint(root: &Path, config_bytes: &[u8], include: &[String]) -> Option<String> {
    let stats = collect_input_stats(root, include)?;

    let mut hasher = Sha256::new();
    hasher.update(b"preflight-fingerprint-v1");
    hasher.update([0]);
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update([0]);
    hasher.update(config_bytes);
    hasher.update([0]);
    for stat in &stats {
        hasher.update(stat.path.as_bytes());
        hasher.update(stat.size.to_le_bytes());
        hasher.update(stat.mtime.to_le_bytes());
        hasher.update([0]);
    }
    Some(format!("{:x}", hasher.finalize()))
}

/// What the last fully green run looked like
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastGreen {
    /// Repo fingerprint at the moment the run finished
    pub fingerprint: String,
    pub finished_at: DateTime<Utc>,
    pub profile: ExecutionProfile,
    /// Results of that run, replayed as verified on a match
    pub results: Vec<TaskResult>,
}

impl LastGreen {
    /// Whether this record can stand in for a run right now
    pub fn matches(&self, fingerprint: &str, profile: ExecutionProfile) -> bool {
        self.fingerprint == fingerprint && self.profile == profile
    }
}

/// Persists the last-green record under the cache directory
#[derive(Debug, Clone)]
pub struct LastGreenStore {
    path: PathBuf,
}

impl LastGreenStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: cache_dir.into().join(LAST_GREEN_FILE),
        }
    }

    /// Load the stored record; a missing or corrupt file yields `None`
    pub fn load(&self) -> Option<LastGreen> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "cannot read last-green record");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "corrupt last-green record, ignoring");
                None
            }
        }
    }

    /// Persist the record; failures are logged, never fatal
    pub fn save(&self, record: &LastGreen) {
        if let Err(err) = write_json_atomic(&self.path, record) {
            warn!(path = %self.path.display(), error = %err, "failed to write last-green record");
        }
    }
}

/// Synthesize a report from a matching last-green record.
///
/// Every result keeps its recorded status and elapsed time but carries
/// verified provenance; nothing is executed.
pub fn verified_report(record: &LastGreen) -> RunReport {
    let mut report = RunReport::new(record.profile);
    report.verified_from_cache = true;
    report.results = record.results.iter().map(TaskResult::as_verified).collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CacheProvenance;
    use tempfile::TempDir;

    fn globs() -> Vec<String> {
        vec!["src/**/*.rs".to_string(), "Cargo.toml".to_string()]
    }

    fn seed(root: &Path) {
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(root.join("Cargo.toml"), "[package]\nname = \"x\"").unwrap();
    }

    #[test]
    fn test_fingerprint_is_stable_without_changes() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());

        let first = repo_fingerprint(temp.path(), b"config", &globs()).unwrap();
        let second = repo_fingerprint(temp.path(), b"config", &globs()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fingerprint_tracks_file_edits() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());
        let before = repo_fingerprint(temp.path(), b"config", &globs()).unwrap();

        std::fs::write(temp.path().join("src/main.rs"), "fn main() { run() }").unwrap();
        let after = repo_fingerprint(temp.path(), b"config", &globs()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_tracks_new_files() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());
        let before = repo_fingerprint(temp.path(), b"config", &globs()).unwrap();

        std::fs::write(temp.path().join("src/extra.rs"), "pub fn extra() {}").unwrap();
        let after = repo_fingerprint(temp.path(), b"config", &globs()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_tracks_config_bytes() {
        let temp = TempDir::new().unwrap();
        seed(temp.path());

        let a = repo_fingerprint(temp.path(), b"profile = \"dev\"", &globs()).unwrap();
        let b = repo_fingerprint(temp.path(), b"profile = \"full\"", &globs()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_glob_cannot_fingerprint() {
        let temp = TempDir::new().unwrap();
        assert!(repo_fingerprint(temp.path(), b"", &["[[".to_string()]).is_none());
    }

    fn record(fingerprint: &str) -> LastGreen {
        LastGreen {
            fingerprint: fingerprint.to_string(),
            finished_at: Utc::now(),
            profile: ExecutionProfile::Dev,
            results: vec![
                TaskResult::ok("lint", "lint", 1200, ""),
                TaskResult::ok("typecheck", "typecheck", 8000, ""),
            ],
        }
    }

    #[test]
    fn test_store_round_trips() {
        let temp = TempDir::new().unwrap();
        let store = LastGreenStore::new(temp.path());

        store.save(&record("abc123"));
        let loaded = store.load().expect("record should load");
        assert_eq!(loaded.fingerprint, "abc123");
        assert_eq!(loaded.profile, ExecutionProfile::Dev);
        assert_eq!(loaded.results.len(), 2);
    }

    #[test]
    fn test_missing_record_loads_as_none() {
        let temp = TempDir::new().unwrap();
        assert!(LastGreenStore::new(temp.path()).load().is_none());
    }

    #[test]
    fn test_corrupt_record_loads_as_none() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(LAST_GREEN_FILE), "{not json").unwrap();
        assert!(LastGreenStore::new(temp.path()).load().is_none());
    }

    #[test]
    fn test_match_requires_fingerprint_and_profile() {
        let green = record("abc123");
        assert!(green.matches("abc123", ExecutionProfile::Dev));
        assert!(!green.matches("different", ExecutionProfile::Dev));
        assert!(!green.matches("abc123", ExecutionProfile::Full));
    }

    #[test]
    fn test_verified_report_replays_results() {
        let report = verified_report(&record("abc123"));
        assert!(report.verified_from_cache);
        assert!(report.passed());
        assert_eq!(report.total(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.cache == CacheProvenance::Verified));
        assert_eq!(report.get("typecheck").unwrap().elapsed_ms, 8000);
    }
}
