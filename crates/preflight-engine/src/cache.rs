//! Per-tool result cache
//!
//! Each tool owns one JSON file under `<cache_dir>/tools/`, so concurrent
//! writers for different tools never touch the same file. Writes go
//! through a temp file and an atomic rename; a partially-written entry is
//! never observable. Corruption is a cache miss, never an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::stat::{collect_input_stats, hash_inputs, stats_match, FileStat};
use crate::task::Task;

/// Cache-level errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO failure while reading or writing entries
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure
    #[error("cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal status recorded in a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// The check passed
    Ok,
    /// The check failed; replays as an honest failure
    Fail,
}

/// Cached result of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Check kind that produced this entry
    pub tool: String,

    /// Task cache key at store time; a drifted key invalidates the entry
    pub cache_key: String,

    /// Stat snapshots of the inputs at store time
    pub input_files: Vec<FileStat>,

    /// Content hash over the same inputs, the mtime-drift fallback
    pub input_hash: String,

    /// Recorded terminal status
    pub status: EntryStatus,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// How long the original run took
    pub elapsed_secs: f64,

    /// Captured output of the original run
    #[serde(default)]
    pub output: String,
}

/// Verdict from validating a cache entry against the current tree
#[derive(Debug, Clone)]
pub enum CacheDecision {
    /// Entry is valid; serve it without executing
    Hit(CacheEntry),
    /// Inputs changed (or cannot be validated)
    Stale,
    /// Entry is older than the freshness window
    Expired,
    /// No entry on disk
    Miss,
}

/// Cache statistics for the status surface
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Number of tool entries
    pub entries: usize,
    /// Total bytes under the cache directory
    pub total_size: u64,
}

impl CacheStats {
    /// Human-readable size
    pub fn formatted_size(&self) -> String {
        format_size(self.total_size)
    }
}

/// Result of a prune pass
#[derive(Debug, Clone, Copy)]
pub struct PruneStats {
    /// Entries examined
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Durable (tool -> CacheEntry) store
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_dir: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at the given cache directory
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// The cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn tools_dir(&self) -> PathBuf {
        self.cache_dir.join("tools")
    }

    fn tool_path(&self, tool: &str) -> PathBuf {
        let name = tool.replace(['/', '\\'], "-");
        self.tools_dir().join(format!("{name}.json"))
    }

    /// Load a tool's entry; missing or corrupt entries are `None`
    pub fn load(&self, tool: &str) -> Option<CacheEntry> {
        let path = self.tool_path(tool);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(tool, error = %err, "failed to read cache entry");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(tool, error = %err, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Atomically persist a tool's entry
    pub fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        write_json_atomic(&self.tool_path(&entry.tool), entry)
    }

    /// Remove a tool's entry if present
    pub fn invalidate(&self, tool: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.tool_path(tool)) {
            Ok(()) => {
                debug!(tool, "cache entry invalidated");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Validate a task's entry against the current tree.
    ///
    /// Stat-first: if every (size, mtime) snapshot matches the entry is a
    /// hit with no file reads. On a stat mismatch the content-hash
    /// fallback can still rescue an mtime-only drift, refreshing the
    /// stored snapshots on the way.
    pub fn check(&self, task: &Task, root: &Path, max_age: Duration) -> CacheDecision {
        let Some(mut entry) = self.load(&task.check) else {
            return CacheDecision::Miss;
        };
        if entry.cache_key != task.cache_key() {
            debug!(task = %task.id, "cache key drifted, entry stale");
            return CacheDecision::Stale;
        }
        if is_expired(entry.created_at, max_age) {
            debug!(task = %task.id, "cache entry expired");
            return CacheDecision::Expired;
        }

        let Some(now) = collect_input_stats(root, &task.inputs) else {
            return CacheDecision::Stale;
        };
        if stats_match(&entry.input_files, &now) {
            return CacheDecision::Hit(entry);
        }

        match hash_inputs(root, &task.inputs) {
            Ok(hash) if hash == entry.input_hash => {
                debug!(task = %task.id, "content unchanged, refreshing stat snapshots");
                entry.input_files = now;
                if let Err(err) = self.store(&entry) {
                    warn!(task = %task.id, error = %err, "failed to refresh cache entry");
                }
                CacheDecision::Hit(entry)
            }
            Ok(_) => CacheDecision::Stale,
            Err(err) => {
                debug!(task = %task.id, error = %err, "content hash failed, entry stale");
                CacheDecision::Stale
            }
        }
    }

    /// Entry count and total size under the cache directory
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let entries = match std::fs::read_dir(self.tools_dir()) {
            Ok(dir) => dir
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                .count(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        let total_size = dir_size(&self.cache_dir)?;
        Ok(CacheStats {
            entries,
            total_size,
        })
    }

    /// Remove everything under the cache directory
    pub fn clean(&self) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove tool entries older than `max_age`; corrupt entries go too
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        let mut stats = PruneStats {
            total: 0,
            removed: 0,
            kept: 0,
        };
        let dir = match std::fs::read_dir(self.tools_dir()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(err) => return Err(err.into()),
        };

        for entry in dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            stats.total += 1;
            let keep = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str::<CacheEntry>(&content).ok())
                .is_some_and(|cached| !is_expired(cached.created_at, max_age));
            if keep {
                stats.kept += 1;
            } else {
                std::fs::remove_file(&path)?;
                stats.removed += 1;
            }
        }
        Ok(stats)
    }
}

/// Serialize `value` to a temp file and atomically rename into place
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn is_expired(created_at: DateTime<Utc>, max_age: Duration) -> bool {
    Utc::now()
        .signed_duration_since(created_at)
        .to_std()
        .map(|age| age > max_age)
        .unwrap_or(true)
}

fn dir_size(dir: &Path) -> Result<u64, CacheError> {
    let mut size = 0;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            size += dir_size(&path)?;
        } else if let Ok(metadata) = entry.metadata() {
            size += metadata.len();
        }
    }
    Ok(size)
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_task(root: &Path) -> Task {
        std::fs::write(root.join("a.rs"), "fn a() {}").unwrap();
        Task::new("lint", "lint")
            .with_command(vec!["true".into()])
            .with_inputs(vec!["*.rs".into()])
    }

    fn entry_for(task: &Task, root: &Path, status: EntryStatus) -> CacheEntry {
        CacheEntry {
            tool: task.check.clone(),
            cache_key: task.cache_key(),
            input_files: collect_input_stats(root, &task.inputs).unwrap(),
            input_hash: hash_inputs(root, &task.inputs).unwrap(),
            status,
            created_at: Utc::now(),
            elapsed_secs: 0.5,
            output: String::new(),
        }
    }

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_missing_entry_is_miss() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        assert!(matches!(
            store.check(&task, temp.path(), DAY),
            CacheDecision::Miss
        ));
    }

    #[test]
    fn test_round_trip_hit() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Ok)).unwrap();

        match store.check(&task, temp.path(), DAY) {
            CacheDecision::Hit(entry) => assert_eq!(entry.status, EntryStatus::Ok),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_entry_replays_as_hit() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Fail)).unwrap();

        match store.check(&task, temp.path(), DAY) {
            CacheDecision::Hit(entry) => assert_eq!(entry.status, EntryStatus::Fail),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn test_content_change_is_stale() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Ok)).unwrap();

        std::fs::write(temp.path().join("a.rs"), "fn a() { unreachable!() }").unwrap();
        assert!(matches!(
            store.check(&task, temp.path(), DAY),
            CacheDecision::Stale
        ));
    }

    #[test]
    fn test_mtime_drift_with_same_content_still_hits() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        let mut entry = entry_for(&task, temp.path(), EntryStatus::Ok);
        // Forge a drifted snapshot; content hash still matches.
        entry.input_files[0].mtime += 0.5;
        store.store(&entry).unwrap();

        match store.check(&task, temp.path(), DAY) {
            CacheDecision::Hit(refreshed) => {
                // Snapshots were refreshed to the current stats.
                let now = collect_input_stats(temp.path(), &task.inputs).unwrap();
                assert!(stats_match(&refreshed.input_files, &now));
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn test_command_change_is_stale() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Ok)).unwrap();

        let changed = task.clone().with_command(vec!["false".into()]);
        assert!(matches!(
            store.check(&changed, temp.path(), DAY),
            CacheDecision::Stale
        ));
    }

    #[test]
    fn test_old_entry_is_expired() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        let mut entry = entry_for(&task, temp.path(), EntryStatus::Ok);
        entry.created_at = Utc::now() - chrono::Duration::days(2);
        store.store(&entry).unwrap();

        assert!(matches!(
            store.check(&task, temp.path(), DAY),
            CacheDecision::Expired
        ));
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        std::fs::create_dir_all(store.cache_dir().join("tools")).unwrap();
        std::fs::write(store.cache_dir().join("tools/lint.json"), "{ not json").unwrap();

        assert!(store.load("lint").is_none());
        assert!(matches!(
            store.check(&task, temp.path(), DAY),
            CacheDecision::Miss
        ));
    }

    #[test]
    fn test_store_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Ok)).unwrap();

        let names: Vec<String> = std::fs::read_dir(store.cache_dir().join("tools"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["lint.json"]);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Ok)).unwrap();

        store.invalidate("lint").unwrap();
        store.invalidate("lint").unwrap();
        assert!(store.load("lint").is_none());
    }

    #[test]
    fn test_prune_removes_expired_and_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        let task = sample_task(temp.path());

        let fresh = entry_for(&task, temp.path(), EntryStatus::Ok);
        store.store(&fresh).unwrap();
        let mut old = fresh.clone();
        old.tool = "typecheck".to_string();
        old.created_at = Utc::now() - chrono::Duration::days(30);
        store.store(&old).unwrap();
        std::fs::write(store.cache_dir().join("tools/broken.json"), "???").unwrap();

        let stats = store.prune(DAY).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.kept, 1);
        assert!(store.load("lint").is_some());
        assert!(store.load("typecheck").is_none());
    }

    #[test]
    fn test_status_counts_entries() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join("cache"));
        assert_eq!(store.status().unwrap().entries, 0);

        let task = sample_task(temp.path());
        store.store(&entry_for(&task, temp.path(), EntryStatus::Ok)).unwrap();
        let stats = store.status().unwrap();
        assert_eq!(stats.entries, 1);
        assert!(stats.total_size > 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
