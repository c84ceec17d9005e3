//! Preflight Engine - check orchestration
//!
//! This crate provides the task graph and planner, the stat-first
//! per-tool result cache, dependency skip rules, the bucketed executor,
//! test partitioning, and the zero-run verification path.

pub mod cache;
pub mod dag;
pub mod executor;
pub mod fingerprint;
pub mod history;
pub mod partition;
pub mod pipeline;
pub mod planner;
pub mod reporter;
pub mod result;
pub mod rules;
pub mod runner;
pub mod stat;
pub mod task;

pub use cache::{
    CacheDecision, CacheEntry, CacheError, CacheStats, CacheStore, EntryStatus, PruneStats,
};
pub use dag::{GraphError, TaskDag};
pub use executor::{default_workers, BucketExecutor, ExecutorOptions};
pub use fingerprint::{repo_fingerprint, verified_report, LastGreen, LastGreenStore};
pub use history::{RunHistory, RunRecord};
pub use partition::{PartitionPlan, TestPartitioner};
pub use pipeline::Pipeline;
pub use planner::{build_plan, plan_tasks, Plan, PlanCache};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TracingReporter};
pub use result::{CacheProvenance, PhaseTiming, RunReport, TaskResult, TaskStatus};
pub use rules::{DependencyRule, RuleSet, RuleViolation};
pub use runner::{CheckOutput, CheckRunner, Invocation, ProcessRunner, RunnerError, ScriptedRunner};
pub use stat::{collect_input_stats, hash_inputs, stats_match, FileStat};
pub use task::Task;
