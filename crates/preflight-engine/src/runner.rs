//! Check command execution
//!
//! The engine dispatches commands through the [`CheckRunner`] seam so
//! tests can script outcomes deterministically. Commands run argv-style,
//! never through a shell; the engine interprets nothing but exit codes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::result::TaskResult;
use crate::task::Task;

/// One resolved command dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Task being run
    pub task: String,

    /// Tool identity, used for scripting and cache entries
    pub check: String,

    /// Full argv, program first
    pub argv: Vec<String>,
}

impl Invocation {
    /// The task's command with its targets appended
    pub fn for_task(task: &Task) -> Self {
        let mut argv = task.command.clone();
        argv.extend(task.targets.iter().cloned());
        Self {
            task: task.id.clone(),
            check: task.check.clone(),
            argv,
        }
    }

    /// The task's identity with a replacement argv (partition shards)
    pub fn with_argv(task: &Task, argv: Vec<String>) -> Self {
        Self {
            task: task.id.clone(),
            check: task.check.clone(),
            argv,
        }
    }
}

/// What a check process produced
#[derive(Debug, Clone)]
pub struct CheckOutput {
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,

    /// stdout and stderr, merged and trimmed
    pub output: String,
}

/// Failures at the runner boundary; the executor folds them into
/// `Errored` statuses instead of aborting the run
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to collect output: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes check commands
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Run one invocation to completion and capture its output
    async fn run(&self, invocation: &Invocation) -> Result<CheckOutput, RunnerError>;
}

/// Real subprocess runner
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    root: PathBuf,
}

impl ProcessRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory commands run in
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CheckRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CheckOutput, RunnerError> {
        let Some((program, args)) = invocation.argv.split_first() else {
            return Err(RunnerError::EmptyCommand);
        };
        debug!(task = %invocation.task, command = ?invocation.argv, "spawning");

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;
        Ok(CheckOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: combined_output(&output.stdout, &output.stderr),
        })
    }
}

#[derive(Debug, Clone)]
struct Script {
    exit_code: i32,
    output: String,
    delay: Option<Duration>,
    spawn_error: bool,
}

/// Deterministic runner for tests: outcomes are scripted per check kind
/// and every invocation is recorded. Unscripted checks succeed with no
/// output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for a check kind
    pub fn script(&self, check: &str, exit_code: i32, output: &str) {
        self.scripts.lock().unwrap().insert(
            check.to_string(),
            Script {
                exit_code,
                output: output.to_string(),
                delay: None,
                spawn_error: false,
            },
        );
    }

    /// Script an outcome that takes `delay` to complete
    pub fn script_with_delay(&self, check: &str, exit_code: i32, output: &str, delay: Duration) {
        self.scripts.lock().unwrap().insert(
            check.to_string(),
            Script {
                exit_code,
                output: output.to_string(),
                delay: Some(delay),
                spawn_error: false,
            },
        );
    }

    /// Script a spawn failure for a check kind
    pub fn script_spawn_error(&self, check: &str) {
        self.scripts.lock().unwrap().insert(
            check.to_string(),
            Script {
                exit_code: -1,
                output: String::new(),
                delay: None,
                spawn_error: true,
            },
        );
    }

    /// Every invocation seen, in dispatch order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// How many times a check kind was dispatched
    pub fn dispatch_count(&self, check: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|inv| inv.check == check)
            .count()
    }
}

#[async_trait]
impl CheckRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CheckOutput, RunnerError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&invocation.check)
            .cloned();
        let Some(script) = script else {
            return Ok(CheckOutput {
                exit_code: 0,
                output: String::new(),
            });
        };

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if script.spawn_error {
            return Err(RunnerError::Spawn {
                program: invocation.argv.first().cloned().unwrap_or_default(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "scripted spawn failure",
                ),
            });
        }
        Ok(CheckOutput {
            exit_code: script.exit_code,
            output: script.output,
        })
    }
}

/// Drive one invocation under a timeout and fold the outcome into a
/// task result.
///
/// A timeout drops the runner's future; for a real subprocess that kills
/// it via `kill_on_drop`. Runner errors become `Errored`, never a panic
/// or an aborted run.
pub(crate) async fn supervise(
    runner: &dyn CheckRunner,
    invocation: &Invocation,
    limit: Duration,
) -> TaskResult {
    let start = Instant::now();
    match tokio::time::timeout(limit, runner.run(invocation)).await {
        Ok(Ok(output)) => {
            let elapsed = start.elapsed().as_millis() as u64;
            if output.exit_code == 0 {
                TaskResult::ok(&invocation.task, &invocation.check, elapsed, output.output)
            } else {
                TaskResult::fail(
                    &invocation.task,
                    &invocation.check,
                    elapsed,
                    Some(output.exit_code),
                    output.output,
                )
            }
        }
        Ok(Err(err)) => {
            warn!(task = %invocation.task, error = %err, "runner failed");
            TaskResult::errored(&invocation.task, &invocation.check, err.to_string())
        }
        Err(_) => {
            warn!(task = %invocation.task, timeout_secs = limit.as_secs(), "timed out");
            TaskResult::timed_out(&invocation.task, &invocation.check, limit.as_secs())
        }
    }
}

/// Merge captured stdout and stderr into one trimmed block
fn combined_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.trim_end().to_string(),
        (true, false) => stderr.trim_end().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}
