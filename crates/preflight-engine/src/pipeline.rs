//! The full run pipeline
//!
//! One `run()` is: zero-run check (repo fingerprint vs the last green
//! run) -> plan, served from the plan cache -> bucketed execution ->
//! last-green save when fully green -> history append. The runner and
//! reporter are injected, so the whole pipeline is testable without
//! spawning a process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info};

use preflight_core::{Config, ExecutionProfile, PreflightError, Result};

use crate::cache::CacheStore;
use crate::executor::{BucketExecutor, ExecutorOptions};
use crate::fingerprint::{repo_fingerprint, verified_report, LastGreen, LastGreenStore};
use crate::history::{RunHistory, RunRecord};
use crate::partition::TestPartitioner;
use crate::planner::{plan_tasks, Plan};
use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};
use crate::result::{RunReport, TaskStatus};
use crate::runner::{CheckRunner, ProcessRunner};

/// Configured pipeline for one repo
pub struct Pipeline {
    root: PathBuf,
    config: Config,
    config_bytes: Vec<u8>,
    profile: ExecutionProfile,
    workers: Option<usize>,
    cache_enabled: bool,
    verify_enabled: bool,
    runner: Arc<dyn CheckRunner>,
    reporter: Arc<dyn TaskReporter>,
}

impl Pipeline {
    /// Pipeline with the config's own profile and toggles, a process
    /// runner, and tracing-only reporting
    pub fn new(root: impl Into<PathBuf>, config: Config, config_bytes: Vec<u8>) -> Self {
        let root = root.into();
        Self {
            profile: config.engine.profile,
            workers: None,
            cache_enabled: config.engine.cache_enabled,
            verify_enabled: config.fingerprint.enabled,
            runner: Arc::new(ProcessRunner::new(&root)),
            reporter: Arc::new(TracingReporter),
            root,
            config,
            config_bytes,
        }
    }

    pub fn with_profile(mut self, profile: ExecutionProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Override the worker pool size (clamped to at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Toggle the per-tool result cache for this run
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Toggle the zero-run verification path for this run
    pub fn with_verify_enabled(mut self, enabled: bool) -> Self {
        self.verify_enabled = enabled;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CheckRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.config.engine.cache_dir)
    }

    fn fingerprint_now(&self) -> Option<String> {
        if !self.config.fingerprint.enabled {
            return None;
        }
        repo_fingerprint(&self.root, &self.config_bytes, &self.config.fingerprint.include)
    }

    /// Build (or load) the plan without executing anything
    pub fn plan(&self) -> Result<Plan> {
        let plan = plan_tasks(
            &self.cache_dir(),
            &self.config,
            &self.config_bytes,
            self.profile,
        )?;
        Ok(plan)
    }

    /// Run the whole pipeline and return the report
    pub async fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        let cache_dir = self.cache_dir();
        let green_store = LastGreenStore::new(&cache_dir);

        if self.verify_enabled {
            if let (Some(fingerprint), Some(record)) = (self.fingerprint_now(), green_store.load())
            {
                if record.matches(&fingerprint, self.profile) {
                    info!(profile = %self.profile, "repo unchanged since last green run");
                    let mut report = verified_report(&record);
                    report.total_ms = start.elapsed().as_millis() as u64;
                    self.reporter.report(&TaskEvent::Verified {
                        total: report.total(),
                    });
                    return Ok(report);
                }
                debug!("last green run does not cover the current repo state");
            }
        }

        let plan = plan_tasks(&cache_dir, &self.config, &self.config_bytes, self.profile)?;
        let tasks = plan
            .ordered_tasks()
            .map_err(|err| PreflightError::Other(err.to_string()))?;

        let mut options = ExecutorOptions::from_config(&self.root, &self.config.engine);
        options.profile = self.profile;
        if let Some(workers) = self.workers {
            options.workers = workers;
        }
        let cache = self.cache_enabled.then(|| CacheStore::new(&cache_dir));
        let executor = BucketExecutor::new(
            options,
            cache,
            plan.rules.clone(),
            Arc::clone(&self.runner),
            TestPartitioner::new(&self.root, self.config.partition.clone()),
            Arc::clone(&self.reporter),
        );
        let report = executor.execute(&tasks).await;

        let fully_green =
            !report.results.is_empty() && report.results.iter().all(|r| r.status == TaskStatus::Ok);
        if fully_green {
            // Fingerprint after the run: mutating tasks may have
            // rewritten tracked files during it.
            if let Some(fingerprint) = self.fingerprint_now() {
                green_store.save(&LastGreen {
                    fingerprint,
                    finished_at: Utc::now(),
                    profile: self.profile,
                    results: report.results.clone(),
                });
            }
        }

        RunHistory::new(&cache_dir).append(&RunRecord::from_report(&report));
        Ok(report)
    }
}
