//! Test suite partitioning
//!
//! Large suites are split across the worker pool instead of running as
//! one long serial command. The case count is an estimate from a sample
//! of test files; partitioning only changes how a suite is invoked,
//! never which cases run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use preflight_core::PartitionConfig;

use crate::result::{CacheProvenance, TaskResult, TaskStatus};
use crate::runner::{supervise, CheckRunner, Invocation};
use crate::task::Task;

/// Failed shard output is cut to this many bytes in the aggregate
const MAX_SHARD_OUTPUT: usize = 2048;

/// How a suite will be split across workers
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    /// Test files per shard, paths relative to the repo root
    pub shards: Vec<Vec<PathBuf>>,
    /// Estimated case count that justified the split
    pub estimated_tests: usize,
}

impl PartitionPlan {
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Splits large test suites into concurrent shards
#[derive(Debug, Clone)]
pub struct TestPartitioner {
    root: PathBuf,
    config: PartitionConfig,
}

impl TestPartitioner {
    pub fn new(root: impl Into<PathBuf>, config: PartitionConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Decide whether `task` should be partitioned across `workers`.
    ///
    /// Returns `None` when partitioning is disabled, the task does not
    /// opt in, only one worker is available, too few test files exist,
    /// or the estimated case count stays at or under the threshold.
    pub fn plan(&self, task: &Task, workers: usize) -> Option<PartitionPlan> {
        if !self.config.enabled || !task.partitionable || workers < 2 {
            return None;
        }

        let files = self.discover();
        if files.len() < 2 {
            return None;
        }

        let estimated = self.estimate_test_count(&files);
        if estimated <= self.config.threshold {
            debug!(
                task = %task.id,
                estimated,
                threshold = self.config.threshold,
                "suite under partition threshold"
            );
            return None;
        }

        let shard_count = workers.min(files.len());
        let mut shards: Vec<Vec<PathBuf>> = vec![Vec::new(); shard_count];
        for (idx, file) in files.into_iter().enumerate() {
            shards[idx % shard_count].push(file);
        }

        Some(PartitionPlan {
            shards,
            estimated_tests: estimated,
        })
    }

    /// Test files matching the configured patterns, relative to the
    /// root, sorted for determinism
    pub fn discover(&self) -> Vec<PathBuf> {
        let patterns: Vec<glob::Pattern> = self
            .config
            .patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(pattern = %p, error = %err, "invalid test file pattern");
                    None
                }
            })
            .collect();
        if patterns.is_empty() {
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|rel| rel.to_path_buf())
            })
            .filter(|rel| patterns.iter().any(|p| p.matches_path(rel)))
            .collect();
        files.sort();
        files
    }

    /// Estimate the suite's case count from a sample of files.
    ///
    /// Counts test attribute markers in the first `sample` files and
    /// scales the average to the whole set.
    fn estimate_test_count(&self, files: &[PathBuf]) -> usize {
        let marker = Regex::new(r"(?m)^\s*#\[(?:[A-Za-z_]+::)*test\]").unwrap();
        let mut counted = 0usize;
        let mut read = 0usize;

        for file in files.iter().take(self.config.sample.max(1)) {
            match std::fs::read_to_string(self.root.join(file)) {
                Ok(content) => {
                    counted += marker.find_iter(&content).count();
                    read += 1;
                }
                Err(err) => {
                    debug!(file = %file.display(), error = %err, "cannot sample test file");
                }
            }
        }
        if read == 0 {
            return 0;
        }

        let average = counted as f64 / read as f64;
        (average * files.len() as f64).round() as usize
    }

    /// Run every shard concurrently and fold the outcomes into one
    /// result for the task. Shards draw permits from the phase's worker
    /// pool, and each runs under the task's full timeout.
    pub async fn run(
        &self,
        task: &Task,
        runner: Arc<dyn CheckRunner>,
        default_timeout: Duration,
        plan: PartitionPlan,
        workers: Arc<Semaphore>,
    ) -> TaskResult {
        let shard_count = plan.shard_count();
        info!(
            task = %task.id,
            shards = shard_count,
            estimated_tests = plan.estimated_tests,
            "partitioning test suite"
        );
        let limit = task.timeout(default_timeout);

        let mut handles = Vec::with_capacity(shard_count);
        for shard in plan.shards {
            let runner = Arc::clone(&runner);
            let workers = Arc::clone(&workers);
            let mut argv = task.command.clone();
            argv.extend(shard.iter().map(|p| p.to_string_lossy().to_string()));
            let invocation = Invocation::with_argv(task, argv);
            handles.push(tokio::spawn(async move {
                let permit = workers.acquire_owned().await.unwrap();
                let result = supervise(runner.as_ref(), &invocation, limit).await;
                drop(permit);
                result
            }));
        }

        let mut results = Vec::with_capacity(shard_count);
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => results.push(TaskResult::errored(
                    &task.id,
                    &task.check,
                    format!("partition worker panicked: {err}"),
                )),
            }
        }
        aggregate(task, &results, shard_count)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || name == "target")
            .unwrap_or(false)
}

/// Fold shard results into one task result.
///
/// Elapsed is the slowest shard (shards ran in parallel, wall-clock
/// model); the aggregate output carries each failed shard's tail.
fn aggregate(task: &Task, results: &[TaskResult], shard_count: usize) -> TaskResult {
    let elapsed_ms = results.iter().map(|r| r.elapsed_ms).max().unwrap_or(0);

    let status = if let Some(errored) = results
        .iter()
        .find(|r| matches!(r.status, TaskStatus::Errored { .. }))
    {
        errored.status.clone()
    } else if results.iter().any(|r| r.status == TaskStatus::TimedOut) {
        TaskStatus::TimedOut
    } else if results.iter().any(|r| r.status == TaskStatus::Fail) {
        TaskStatus::Fail
    } else {
        TaskStatus::Ok
    };

    let mut sections = Vec::new();
    for (idx, result) in results.iter().enumerate() {
        if result.is_failure() && !result.output.is_empty() {
            sections.push(format!(
                "[shard {}/{}]\n{}",
                idx + 1,
                shard_count,
                truncate_output(&result.output, MAX_SHARD_OUTPUT)
            ));
        }
    }

    let exit_code = match status {
        TaskStatus::Ok => Some(0),
        _ => results
            .iter()
            .find(|r| r.is_failure())
            .and_then(|r| r.exit_code),
    };

    TaskResult {
        id: task.id.clone(),
        check: task.check.clone(),
        status,
        cache: CacheProvenance::Miss,
        elapsed_ms,
        output: sections.join("\n\n"),
        exit_code,
    }
}

fn truncate_output(output: &str, limit: usize) -> String {
    if output.len() <= limit {
        return output.to_string();
    }
    let mut end = limit;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n... truncated ({} bytes total)",
        &output[..end],
        output.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScriptedRunner;
    use tempfile::TempDir;

    const DEFAULT: Duration = Duration::from_secs(30);

    fn write_test_file(root: &Path, rel: &str, tests: usize) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut content = String::new();
        for i in 0..tests {
            content.push_str(&format!("#[test]\nfn case_{i}() {{}}\n\n"));
        }
        std::fs::write(path, content).unwrap();
    }

    fn partitioner(root: &Path, threshold: usize, sample: usize) -> TestPartitioner {
        TestPartitioner::new(
            root,
            PartitionConfig {
                enabled: true,
                threshold,
                sample,
                patterns: vec!["tests/**/*.rs".to_string()],
            },
        )
    }

    fn test_task() -> Task {
        Task::new("test", "test")
            .with_command(vec!["cargo".into(), "test".into()])
            .with_partitionable(true)
    }

    #[test]
    fn test_discovery_matches_patterns_sorted() {
        let temp = TempDir::new().unwrap();
        write_test_file(temp.path(), "tests/b.rs", 1);
        write_test_file(temp.path(), "tests/a.rs", 1);
        write_test_file(temp.path(), "src/lib.rs", 1);

        let files = partitioner(temp.path(), 200, 10).discover();
        assert_eq!(
            files,
            vec![PathBuf::from("tests/a.rs"), PathBuf::from("tests/b.rs")]
        );
    }

    #[test]
    fn test_discovery_skips_hidden_and_target_dirs() {
        let temp = TempDir::new().unwrap();
        write_test_file(temp.path(), "tests/a.rs", 1);
        write_test_file(temp.path(), ".git/tests/ghost.rs", 1);
        write_test_file(temp.path(), "target/tests/build.rs", 1);

        let files = partitioner(temp.path(), 200, 10).discover();
        assert_eq!(files, vec![PathBuf::from("tests/a.rs")]);
    }

    #[test]
    fn test_estimation_scales_sample_average() {
        let temp = TempDir::new().unwrap();
        write_test_file(temp.path(), "tests/a.rs", 4);
        write_test_file(temp.path(), "tests/b.rs", 2);
        write_test_file(temp.path(), "tests/c.rs", 3);
        write_test_file(temp.path(), "tests/d.rs", 3);

        // Sample of 2 sees a/b (average 3), scaled to 4 files.
        let p = partitioner(temp.path(), 200, 2);
        let files = p.discover();
        assert_eq!(p.estimate_test_count(&files), 12);
    }

    #[test]
    fn test_estimation_counts_async_test_attributes() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("tests")).unwrap();
        std::fs::write(
            temp.path().join("tests/a.rs"),
            "#[tokio::test]\nasync fn one() {}\n#[test]\nfn two() {}\n",
        )
        .unwrap();

        let p = partitioner(temp.path(), 200, 10);
        assert_eq!(p.estimate_test_count(&p.discover()), 2);
    }

    #[test]
    fn test_plan_splits_round_robin() {
        let temp = TempDir::new().unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            write_test_file(temp.path(), &format!("tests/{name}.rs"), 10);
        }

        let plan = partitioner(temp.path(), 20, 10)
            .plan(&test_task(), 2)
            .expect("should partition");
        assert_eq!(plan.shard_count(), 2);
        assert_eq!(
            plan.shards[0],
            vec![
                PathBuf::from("tests/a.rs"),
                PathBuf::from("tests/c.rs"),
                PathBuf::from("tests/e.rs"),
            ]
        );
        assert_eq!(
            plan.shards[1],
            vec![PathBuf::from("tests/b.rs"), PathBuf::from("tests/d.rs")]
        );
        assert_eq!(plan.estimated_tests, 50);
    }

    #[test]
    fn test_shard_count_clamped_to_file_count() {
        let temp = TempDir::new().unwrap();
        write_test_file(temp.path(), "tests/a.rs", 300);
        write_test_file(temp.path(), "tests/b.rs", 300);

        let plan = partitioner(temp.path(), 200, 10)
            .plan(&test_task(), 8)
            .expect("should partition");
        assert_eq!(plan.shard_count(), 2);
        assert!(plan.shards.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_small_suite_is_not_partitioned() {
        let temp = TempDir::new().unwrap();
        write_test_file(temp.path(), "tests/a.rs", 3);
        write_test_file(temp.path(), "tests/b.rs", 3);

        assert!(partitioner(temp.path(), 200, 10)
            .plan(&test_task(), 4)
            .is_none());
    }

    #[test]
    fn test_single_worker_is_not_partitioned() {
        let temp = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            write_test_file(temp.path(), &format!("tests/{name}.rs"), 100);
        }
        assert!(partitioner(temp.path(), 20, 10)
            .plan(&test_task(), 1)
            .is_none());
    }

    #[test]
    fn test_non_partitionable_task_is_not_partitioned() {
        let temp = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            write_test_file(temp.path(), &format!("tests/{name}.rs"), 100);
        }
        let task = test_task().with_partitionable(false);
        assert!(partitioner(temp.path(), 20, 10).plan(&task, 4).is_none());
    }

    #[test]
    fn test_aggregate_takes_slowest_shard_elapsed() {
        let task = test_task();
        let results = vec![
            TaskResult::ok("test", "test", 1000, ""),
            TaskResult::ok("test", "test", 4000, ""),
            TaskResult::ok("test", "test", 2000, ""),
        ];
        let merged = aggregate(&task, &results, 3);
        assert_eq!(merged.status, TaskStatus::Ok);
        assert_eq!(merged.elapsed_ms, 4000);
        assert!(merged.output.is_empty());
    }

    #[test]
    fn test_aggregate_reports_failed_shards() {
        let task = test_task();
        let results = vec![
            TaskResult::ok("test", "test", 1000, "all passed"),
            TaskResult::fail("test", "test", 2000, Some(1), "case_7 assertion failed"),
        ];
        let merged = aggregate(&task, &results, 2);
        assert_eq!(merged.status, TaskStatus::Fail);
        assert_eq!(merged.exit_code, Some(1));
        assert!(merged.output.contains("[shard 2/2]"));
        assert!(merged.output.contains("case_7"));
        assert!(!merged.output.contains("all passed"));
    }

    #[test]
    fn test_aggregate_timeout_outranks_fail() {
        let task = test_task();
        let results = vec![
            TaskResult::fail("test", "test", 2000, Some(1), "boom"),
            TaskResult::timed_out("test", "test", 60),
        ];
        assert_eq!(aggregate(&task, &results, 2).status, TaskStatus::TimedOut);
    }

    #[test]
    fn test_truncate_output_marks_the_cut() {
        let long = "x".repeat(5000);
        let cut = truncate_output(&long, MAX_SHARD_OUTPUT);
        assert!(cut.len() < 2200);
        assert!(cut.contains("truncated (5000 bytes total)"));
        assert_eq!(truncate_output("short", MAX_SHARD_OUTPUT), "short");
    }

    #[tokio::test]
    async fn test_partitioned_run_invokes_each_shard() {
        let temp = TempDir::new().unwrap();
        for name in ["a", "b", "c", "d"] {
            write_test_file(temp.path(), &format!("tests/{name}.rs"), 50);
        }

        let p = partitioner(temp.path(), 20, 10);
        let task = test_task();
        let plan = p.plan(&task, 2).expect("should partition");
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("test", 0, "");

        let result = p
            .run(
                &task,
                runner.clone() as Arc<dyn CheckRunner>,
                DEFAULT,
                plan,
                Arc::new(Semaphore::new(2)),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Ok);

        // Each shard ran the task command with its own file list.
        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 2);
        for inv in &invocations {
            assert_eq!(&inv.argv[..2], &["cargo", "test"]);
            assert!(inv.argv.len() > 2);
        }
        let all_files: Vec<&String> = invocations.iter().flat_map(|i| &i.argv[2..]).collect();
        assert_eq!(all_files.len(), 4);
    }

    #[tokio::test]
    async fn test_partitioned_run_propagates_shard_failure() {
        let temp = TempDir::new().unwrap();
        for name in ["a", "b", "c", "d"] {
            write_test_file(temp.path(), &format!("tests/{name}.rs"), 50);
        }

        let p = partitioner(temp.path(), 20, 10);
        let task = test_task();
        let plan = p.plan(&task, 2).expect("should partition");
        let runner = Arc::new(ScriptedRunner::new());
        runner.script("test", 1, "shard failed");

        let result = p
            .run(
                &task,
                runner as Arc<dyn CheckRunner>,
                DEFAULT,
                plan,
                Arc::new(Semaphore::new(2)),
            )
            .await;
        assert_eq!(result.status, TaskStatus::Fail);
        assert!(result.output.contains("shard failed"));
    }
}
