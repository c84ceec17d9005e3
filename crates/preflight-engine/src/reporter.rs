//! Run progress reporting
//!
//! The engine emits progress through this seam so frontends can render
//! however they like; the engine itself never prints.

use std::time::Duration;

use preflight_core::{Bucket, ExecutionProfile};

use crate::result::{CacheProvenance, TaskResult, TaskStatus};

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A run is starting
    RunStarted {
        profile: ExecutionProfile,
        total: usize,
    },
    /// An execution phase is starting
    PhaseStarted { bucket: Bucket, task_count: usize },
    /// A task was handed to a worker
    TaskStarted { id: String, command: String },
    /// A task reached a terminal status
    TaskFinished { result: TaskResult },
    /// The whole report was served from the last-green record
    Verified { total: usize },
    /// The run completed
    RunCompleted {
        total: usize,
        passed: usize,
        failed: usize,
        skipped: usize,
        cached: usize,
        duration: Duration,
    },
}

/// Trait for reporting run progress
pub trait TaskReporter: Send + Sync {
    /// Handle one event
    fn report(&self, event: &TaskEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::RunStarted { profile, total } => {
                tracing::info!("Starting {} checks under profile {}", total, profile);
            }
            TaskEvent::PhaseStarted { bucket, task_count } => {
                tracing::info!("Entering {} phase ({} tasks)", bucket, task_count);
            }
            TaskEvent::TaskStarted { id, command } => {
                tracing::info!("Starting {}: {}", id, command);
            }
            TaskEvent::TaskFinished { result } => match &result.status {
                TaskStatus::Ok => {
                    if result.cache == CacheProvenance::Hit {
                        tracing::info!("{} ok (cached)", result.id);
                    } else {
                        tracing::info!("{} ok in {}ms", result.id, result.elapsed_ms);
                    }
                }
                TaskStatus::Fail => {
                    tracing::error!("{} failed after {}ms", result.id, result.elapsed_ms);
                }
                TaskStatus::Skipped { reason, .. } => {
                    tracing::info!("{} skipped: {}", result.id, reason);
                }
                TaskStatus::TimedOut => {
                    tracing::error!("{} timed out after {}ms", result.id, result.elapsed_ms);
                }
                TaskStatus::Errored { message } => {
                    tracing::error!("{} errored: {}", result.id, message);
                }
            },
            TaskEvent::Verified { total } => {
                tracing::info!("All {} checks verified from the last green run", total);
            }
            TaskEvent::RunCompleted {
                total,
                passed,
                failed,
                skipped,
                cached,
                duration,
            } => {
                tracing::info!(
                    "Run complete: {}/{} passed, {} failed, {} skipped, {} cached ({:.1}s)",
                    passed,
                    total,
                    failed,
                    skipped,
                    cached,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// All collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Ids of tasks that were started (not served from cache or skipped)
    pub fn started_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                TaskEvent::TaskStarted { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Finished results in completion order
    pub fn finished(&self) -> Vec<TaskResult> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                TaskEvent::TaskFinished { result } => Some(result.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();

        reporter.report(&TaskEvent::TaskStarted {
            id: "lint".to_string(),
            command: "cargo clippy --quiet".to_string(),
        });
        reporter.report(&TaskEvent::TaskFinished {
            result: TaskResult::ok("lint", "lint", 120, ""),
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(reporter.started_ids(), vec!["lint".to_string()]);
        assert_eq!(reporter.finished().len(), 1);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;

        // Just verify it doesn't panic
        reporter.report(&TaskEvent::RunStarted {
            profile: ExecutionProfile::Dev,
            total: 3,
        });
        reporter.report(&TaskEvent::TaskFinished {
            result: TaskResult::fail("test", "test", 900, Some(1), "boom"),
        });
        reporter.report(&TaskEvent::RunCompleted {
            total: 3,
            passed: 2,
            failed: 1,
            skipped: 0,
            cached: 0,
            duration: Duration::from_secs(2),
        });
    }
}
