//! Bucketed execution
//!
//! Tasks run in three ordered phases: fast (parallel) then mutating
//! (strictly serial) then slow (parallel). A phase starts only after
//! the previous one fully completed. Within a parallel phase, tasks are
//! grouped into waves so same-phase prerequisites land in the failed
//! set before their dependents dispatch; dispatch order is
//! deterministic, completion order is not.
//!
//! Per task, in order: serve from cache if the entry validates (a
//! stored failure replays honestly), otherwise consult the dependency
//! rules, otherwise dispatch through the runner under the effective
//! timeout. Completed executions (ok or fail) are written back to the
//! cache; timeouts and errors are not.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use preflight_core::{Bucket, EngineConfig, ExecutionProfile};

use crate::cache::{CacheDecision, CacheEntry, CacheStore, EntryStatus};
use crate::partition::TestPartitioner;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::result::{PhaseTiming, RunReport, TaskResult, TaskStatus};
use crate::rules::{DependencyRule, RuleSet};
use crate::runner::{supervise, CheckRunner, Invocation};
use crate::stat::{collect_input_stats, hash_inputs};
use crate::task::Task;

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub profile: ExecutionProfile,

    /// Worker pool size for the parallel phases
    pub workers: usize,

    /// Timeout applied when a task does not carry its own
    pub default_timeout: Duration,

    /// Cache entries older than this are expired
    pub cache_max_age: Duration,

    /// Repo root that commands and input globs resolve against
    pub root: PathBuf,
}

impl ExecutorOptions {
    /// Derive options from config; `max_workers` 0 means `min(4, cores)`
    pub fn from_config(root: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        let workers = if config.max_workers == 0 {
            default_workers()
        } else {
            config.max_workers
        };
        Self {
            profile: config.profile,
            workers: workers.max(1),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            cache_max_age: Duration::from_secs(config.cache_max_age_secs),
            root: root.into(),
        }
    }
}

/// Default worker bound for the parallel phases
pub fn default_workers() -> usize {
    num_cpus().min(4)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Executes a planned task list phase by phase
pub struct BucketExecutor {
    options: ExecutorOptions,
    cache: Option<CacheStore>,
    rules: RuleSet,
    runner: Arc<dyn CheckRunner>,
    partitioner: TestPartitioner,
    reporter: Arc<dyn TaskReporter>,
}

impl BucketExecutor {
    pub fn new(
        options: ExecutorOptions,
        cache: Option<CacheStore>,
        rules: RuleSet,
        runner: Arc<dyn CheckRunner>,
        partitioner: TestPartitioner,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self {
            options,
            cache,
            rules,
            runner,
            partitioner,
            reporter,
        }
    }

    /// Run every task and assemble the report. Results keep plan order.
    pub async fn execute(&self, tasks: &[Task]) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport::new(self.options.profile);
        self.reporter.report(&TaskEvent::RunStarted {
            profile: self.options.profile,
            total: tasks.len(),
        });

        let mut results: Vec<TaskResult> = Vec::with_capacity(tasks.len());
        let mut failed: HashSet<String> = HashSet::new();
        let mut cache_trusted = true;

        for bucket in [Bucket::Fast, Bucket::Mutating, Bucket::Slow] {
            let phase: Vec<&Task> = tasks.iter().filter(|t| t.bucket == bucket).collect();
            if phase.is_empty() {
                continue;
            }
            let phase_start = Instant::now();
            self.reporter.report(&TaskEvent::PhaseStarted {
                bucket,
                task_count: phase.len(),
            });

            if bucket == Bucket::Mutating {
                self.run_serial(&phase, &mut cache_trusted, &mut results, &mut failed)
                    .await;
            } else {
                self.run_parallel(&phase, cache_trusted, &mut results, &mut failed)
                    .await;
            }

            report.phase_timings.push(PhaseTiming {
                bucket,
                elapsed_ms: phase_start.elapsed().as_millis() as u64,
            });
        }

        report.results = results;
        report.total_ms = start.elapsed().as_millis() as u64;
        self.reporter.report(&TaskEvent::RunCompleted {
            total: report.total(),
            passed: report.passed_count(),
            failed: report.failed_count(),
            skipped: report.skipped_count(),
            cached: report.cached_count(),
            duration: start.elapsed(),
        });
        report
    }

    /// Parallel phase: waves of semaphore-bounded workers
    async fn run_parallel(
        &self,
        phase: &[&Task],
        cache_trusted: bool,
        results: &mut Vec<TaskResult>,
        failed: &mut HashSet<String>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let by_id: HashMap<&str, &Task> = phase.iter().map(|t| (t.id.as_str(), *t)).collect();

        for wave in self.waves(phase) {
            let mut slots: Vec<Option<TaskResult>> = Vec::with_capacity(wave.len());
            let mut handles: Vec<(usize, String, String, JoinHandle<TaskResult>)> = Vec::new();

            for id in &wave {
                let Some(task) = by_id.get(id.as_str()).copied() else {
                    continue;
                };

                if let Some(result) = self.try_cache(task, cache_trusted) {
                    if result.is_failure() {
                        failed.insert(task.id.clone());
                    }
                    self.reporter.report(&TaskEvent::TaskFinished {
                        result: result.clone(),
                    });
                    slots.push(Some(result));
                    continue;
                }

                if let Some(rule) = self.rules.decide_skip(&task.id, failed, self.options.profile)
                {
                    let result = skipped_by(task, rule);
                    self.reporter.report(&TaskEvent::TaskFinished {
                        result: result.clone(),
                    });
                    slots.push(Some(result));
                    continue;
                }

                if let Some(plan) = self.partitioner.plan(task, self.options.workers) {
                    // The parent holds no permit; shards draw from the
                    // same pool.
                    let handle = self.spawn_partitioned(task, plan, Arc::clone(&semaphore));
                    slots.push(None);
                    handles.push((slots.len() - 1, task.id.clone(), task.check.clone(), handle));
                    continue;
                }

                let permit = semaphore.clone().acquire_owned().await.unwrap();
                let handle = self.spawn_task(task, permit);
                slots.push(None);
                handles.push((slots.len() - 1, task.id.clone(), task.check.clone(), handle));
            }

            for (slot, id, check, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(err) => {
                        let result =
                            TaskResult::errored(&id, &check, format!("task panicked: {err}"));
                        self.reporter.report(&TaskEvent::TaskFinished {
                            result: result.clone(),
                        });
                        result
                    }
                };
                if result.is_failure() {
                    failed.insert(result.id.clone());
                }
                slots[slot] = Some(result);
            }
            results.extend(slots.into_iter().flatten());
        }
    }

    /// Mutating phase: strictly serial, in plan order.
    ///
    /// A mutating task that actually runs and succeeds revokes cache
    /// trust for the rest of the run and invalidates the persisted
    /// entries of its affected checks.
    async fn run_serial(
        &self,
        phase: &[&Task],
        cache_trusted: &mut bool,
        results: &mut Vec<TaskResult>,
        failed: &mut HashSet<String>,
    ) {
        for task in phase {
            if let Some(result) = self.try_cache(task, *cache_trusted) {
                if result.is_failure() {
                    failed.insert(task.id.clone());
                }
                self.reporter.report(&TaskEvent::TaskFinished {
                    result: result.clone(),
                });
                results.push(result);
                continue;
            }

            if let Some(rule) = self.rules.decide_skip(&task.id, failed, self.options.profile) {
                let result = skipped_by(task, rule);
                self.reporter.report(&TaskEvent::TaskFinished {
                    result: result.clone(),
                });
                results.push(result);
                continue;
            }

            let invocation = Invocation::for_task(task);
            self.reporter.report(&TaskEvent::TaskStarted {
                id: task.id.clone(),
                command: invocation.argv.join(" "),
            });
            let result = supervise(
                self.runner.as_ref(),
                &invocation,
                task.timeout(self.options.default_timeout),
            )
            .await;
            store_entry(self.cache.as_ref(), task, &self.options.root, &result);

            if result.passed() {
                info!(task = %task.id, "mutation succeeded, cache trust revoked");
                *cache_trusted = false;
                self.invalidate_affected(task);
            }
            if result.is_failure() {
                failed.insert(task.id.clone());
            }
            self.reporter.report(&TaskEvent::TaskFinished {
                result: result.clone(),
            });
            results.push(result);
        }
    }

    /// Group a phase into waves: same-phase rule prerequisites and DAG
    /// edges both gate later waves; cross-phase edges are already
    /// satisfied by phase ordering.
    fn waves(&self, phase: &[&Task]) -> Vec<Vec<String>> {
        let ids: Vec<String> = phase.iter().map(|t| t.id.clone()).collect();
        let members: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let mut leveling: Vec<DependencyRule> = self.rules.rules().to_vec();
        for task in phase {
            for dep in &task.depends_on {
                if members.contains(dep.as_str()) {
                    leveling.push(DependencyRule {
                        dependent: task.id.clone(),
                        prerequisite: dep.clone(),
                        reason: String::new(),
                        strict: false,
                    });
                }
            }
        }
        RuleSet::new(leveling).execution_levels(&ids)
    }

    fn try_cache(&self, task: &Task, trusted: bool) -> Option<TaskResult> {
        if !trusted {
            return None;
        }
        let store = self.cache.as_ref()?;
        match store.check(task, &self.options.root, self.options.cache_max_age) {
            CacheDecision::Hit(entry) => {
                debug!(task = %task.id, "served from cache");
                Some(TaskResult::from_cache(&task.id, &entry))
            }
            CacheDecision::Stale | CacheDecision::Expired | CacheDecision::Miss => None,
        }
    }

    fn invalidate_affected(&self, task: &Task) {
        let Some(store) = self.cache.as_ref() else {
            return;
        };
        for tool in &task.affected {
            debug!(task = %task.id, tool, "invalidating affected cache entry");
            if let Err(err) = store.invalidate(tool) {
                warn!(tool, error = %err, "failed to invalidate cache entry");
            }
        }
    }

    fn spawn_task(
        &self,
        task: &Task,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> JoinHandle<TaskResult> {
        let task = task.clone();
        let runner = Arc::clone(&self.runner);
        let reporter = Arc::clone(&self.reporter);
        let cache = self.cache.clone();
        let root = self.options.root.clone();
        let limit = task.timeout(self.options.default_timeout);

        tokio::spawn(async move {
            let invocation = Invocation::for_task(&task);
            reporter.report(&TaskEvent::TaskStarted {
                id: task.id.clone(),
                command: invocation.argv.join(" "),
            });
            let result = supervise(runner.as_ref(), &invocation, limit).await;
            store_entry(cache.as_ref(), &task, &root, &result);
            reporter.report(&TaskEvent::TaskFinished {
                result: result.clone(),
            });
            drop(permit);
            result
        })
    }

    fn spawn_partitioned(
        &self,
        task: &Task,
        plan: crate::partition::PartitionPlan,
        semaphore: Arc<Semaphore>,
    ) -> JoinHandle<TaskResult> {
        let task = task.clone();
        let runner = Arc::clone(&self.runner);
        let reporter = Arc::clone(&self.reporter);
        let cache = self.cache.clone();
        let root = self.options.root.clone();
        let partitioner = self.partitioner.clone();
        let default_timeout = self.options.default_timeout;

        tokio::spawn(async move {
            reporter.report(&TaskEvent::TaskStarted {
                id: task.id.clone(),
                command: task.command.join(" "),
            });
            let result = partitioner
                .run(&task, runner, default_timeout, plan, semaphore)
                .await;
            store_entry(cache.as_ref(), &task, &root, &result);
            reporter.report(&TaskEvent::TaskFinished {
                result: result.clone(),
            });
            result
        })
    }
}

fn skipped_by(task: &Task, rule: &DependencyRule) -> TaskResult {
    let reason = if rule.reason.is_empty() {
        format!("{} failed", rule.prerequisite)
    } else {
        rule.reason.clone()
    };
    TaskResult::skipped(&task.id, &task.check, reason, &rule.prerequisite)
}

/// Persist a completed execution; timeouts and errors are never cached
fn store_entry(cache: Option<&CacheStore>, task: &Task, root: &Path, result: &TaskResult) {
    let Some(store) = cache else {
        return;
    };
    let status = match result.status {
        TaskStatus::Ok => EntryStatus::Ok,
        TaskStatus::Fail => EntryStatus::Fail,
        _ => return,
    };
    let Some(input_files) = collect_input_stats(root, &task.inputs) else {
        debug!(task = %task.id, "inputs unstable, not caching");
        return;
    };
    let input_hash = match hash_inputs(root, &task.inputs) {
        Ok(hash) => hash,
        Err(err) => {
            debug!(task = %task.id, error = %err, "cannot hash inputs, not caching");
            return;
        }
    };

    let entry = CacheEntry {
        tool: task.check.clone(),
        cache_key: task.cache_key(),
        input_files,
        input_hash,
        status,
        created_at: Utc::now(),
        elapsed_secs: result.elapsed_ms as f64 / 1000.0,
        output: result.output.clone(),
    };
    if let Err(err) = store.store(&entry) {
        warn!(task = %task.id, error = %err, "failed to store cache entry");
    }
}
