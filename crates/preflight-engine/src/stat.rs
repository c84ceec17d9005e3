//! Stat-first input validation
//!
//! Cache entries are validated by comparing (size, mtime) snapshots of
//! their input files, so the hot path never reads file contents. A
//! content hash over the same files is kept as a fallback: an mtime-only
//! change (e.g. `touch`) is still recognized as content-identical.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Size and mtime snapshot of one input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStat {
    /// Path relative to the repo root
    pub path: String,

    /// File size in bytes
    pub size: u64,

    /// Modification time as seconds since the epoch.
    ///
    /// Stored as f64 and compared exactly: snapshots are only ever
    /// compared to snapshots collected the same way.
    pub mtime: f64,
}

/// Expand glob patterns relative to `root` into a sorted file set.
///
/// Directories are ignored. Returns `None` when a pattern is invalid;
/// callers treat that as "cannot validate".
pub(crate) fn expand_patterns(root: &Path, patterns: &[String]) -> Option<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let full = root.join(pattern);
        let entries = match glob::glob(&full.to_string_lossy()) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(pattern, error = %err, "invalid input glob");
                return None;
            }
        };
        for path in entries.flatten() {
            files.insert(path);
        }
    }
    Some(files)
}

/// Collect stat snapshots for every file matched by `patterns`.
///
/// Snapshots are sorted by path. Returns `None` when a matched file
/// vanishes between glob and stat, or cannot be stat'ed at all; the
/// caller must treat that as "cannot validate, rerun". An empty match
/// list is a valid `Some`.
pub fn collect_input_stats(root: &Path, patterns: &[String]) -> Option<Vec<FileStat>> {
    let files = expand_patterns(root, patterns)?;
    let mut stats = Vec::with_capacity(files.len());

    for path in files {
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "input file vanished during stat");
                return None;
            }
        };
        if metadata.is_dir() {
            continue;
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs_f64())
            .unwrap_or(0.0);
        stats.push(FileStat {
            path: relative_path(root, &path),
            size: metadata.len(),
            mtime,
        });
    }

    Some(stats)
}

/// Whether two snapshot lists are identical.
///
/// Length must match and every (path, size, mtime) triple must be equal;
/// both sides are sorted by path, so slice equality is exact.
pub fn stats_match(old: &[FileStat], new: &[FileStat]) -> bool {
    old == new
}

/// Content hash over every file matched by `patterns`.
///
/// SHA-256 over each file's relative path and bytes in sorted-path
/// order. Fails when a file cannot be read or a pattern is invalid.
pub fn hash_inputs(root: &Path, patterns: &[String]) -> std::io::Result<String> {
    let files = expand_patterns(root, patterns).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid input glob")
    })?;

    let mut hasher = Sha256::new();
    for path in files {
        let metadata = std::fs::metadata(&path)?;
        if metadata.is_dir() {
            continue;
        }
        hasher.update(relative_path(root, &path).as_bytes());
        hasher.update([0]);
        hasher.update(std::fs::read(&path)?);
        hasher.update([1]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}
