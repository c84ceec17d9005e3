//! Run command - execute the repository's checks

use std::sync::Arc;

use clap::{Args, ValueEnum};
use console::style;
use tracing::info;

use preflight_core::{load_config_or_default, ExecutionProfile, PreflightError};
use preflight_engine::{
    CacheProvenance, Pipeline, RunReport, TaskEvent, TaskReporter, TaskResult, TaskStatus,
};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Run the checks for this repository
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Execution profile
    #[arg(short, long)]
    pub profile: Option<ProfileArg>,

    /// Disable the per-check result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Skip the whole-repo fingerprint shortcut
    #[arg(long)]
    pub no_verify: bool,

    /// Number of parallel workers
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Profile argument
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProfileArg {
    /// Fast checks only
    Fast,
    /// Fast checks plus typecheck
    Dev,
    /// Every configured check
    Full,
    /// Every configured check, all skip rules strict
    Strict,
}

impl From<ProfileArg> for ExecutionProfile {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Fast => Self::Fast,
            ProfileArg::Dev => Self::Dev,
            ProfileArg::Full => Self::Full,
            ProfileArg::Strict => Self::Strict,
        }
    }
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let root = std::env::current_dir()?;

        let (config, config_path) = match load_config_or_default(&root) {
            Ok(loaded) => loaded,
            Err(err) => {
                output::error(&err.to_string());
                std::process::exit(exit_codes::CONFIG_ERROR);
            }
        };
        let config_bytes = match &config_path {
            Some(path) => std::fs::read(path)?,
            None => Vec::new(),
        };

        let profile = self
            .profile
            .map(ExecutionProfile::from)
            .unwrap_or(config.engine.profile);

        info!(profile = %profile, root = %root.display(), "running checks");

        // Show header
        if !cli.quiet && cli.format == OutputFormat::Text {
            println!();
            println!("{}", style("Running checks...").bold());
            println!("  Path: {}", style(root.display()).cyan());
            println!("  Profile: {}", style(profile).cyan());
            if self.no_cache {
                println!("  Cache: {}", style("disabled").yellow());
            }
            println!();
        }

        let mut pipeline = Pipeline::new(&root, config, config_bytes).with_profile(profile);
        if self.no_cache {
            pipeline = pipeline.with_cache_enabled(false);
        }
        if self.no_verify {
            pipeline = pipeline.with_verify_enabled(false);
        }
        if let Some(jobs) = self.jobs {
            pipeline = pipeline.with_workers(jobs);
        }
        if !cli.quiet && cli.format == OutputFormat::Text {
            pipeline = pipeline.with_reporter(Arc::new(ConsoleReporter {
                verbose: cli.verbose,
            }));
        }

        let report = match pipeline.run().await {
            Ok(report) => report,
            Err(PreflightError::Config(err)) => {
                output::error(&err.to_string());
                std::process::exit(exit_codes::CONFIG_ERROR);
            }
            Err(err) => return Err(err.into()),
        };

        // Output results
        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if !cli.quiet {
            print_summary(&report);
        }

        // Exit with error if any check failed
        if !report.passed() {
            std::process::exit(exit_codes::CHECKS_FAILED);
        }

        Ok(())
    }
}

/// Live per-check console output for text runs
struct ConsoleReporter {
    verbose: bool,
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::RunStarted { .. } | TaskEvent::RunCompleted { .. } => {}
            TaskEvent::PhaseStarted { bucket, task_count } => {
                println!(
                    "  {} {} phase ({} checks)",
                    style("→").blue(),
                    style(bucket).bold(),
                    task_count
                );
            }
            TaskEvent::TaskStarted { id, command } => {
                if self.verbose {
                    println!("      {} {} {}", style("→").blue(), id, style(command).dim());
                }
            }
            TaskEvent::TaskFinished { result } => print_result(result),
            TaskEvent::Verified { total } => {
                println!(
                    "  {} repo unchanged since the last green run ({} checks)",
                    style("✓").green(),
                    total
                );
            }
        }
    }
}

fn print_result(result: &TaskResult) {
    let elapsed = output::format_duration_ms(result.elapsed_ms);
    match &result.status {
        TaskStatus::Ok => {
            let cached = if result.cache == CacheProvenance::Hit {
                style(" (cached)").dim().to_string()
            } else {
                String::new()
            };
            println!(
                "      {} {} ({elapsed}){cached}",
                style("✓").green(),
                result.id
            );
        }
        TaskStatus::Fail => {
            println!(
                "      {} {} ({elapsed})",
                style("✗").red(),
                style(&result.id).red()
            );
        }
        TaskStatus::Skipped { reason, .. } => {
            println!(
                "      {} {} {}",
                style("○").yellow(),
                style(&result.id).yellow(),
                style(format!("skipped: {reason}")).dim()
            );
        }
        TaskStatus::TimedOut => {
            println!(
                "      {} {} {}",
                style("✗").red(),
                style(&result.id).red(),
                style(format!("timed out after {elapsed}")).dim()
            );
        }
        TaskStatus::Errored { message } => {
            println!(
                "      {} {} {}",
                style("✗").red(),
                style(&result.id).red(),
                style(message).dim()
            );
        }
    }
}

fn print_summary(report: &RunReport) {
    // Failure output, first lines only
    for result in report.results.iter().filter(|r| r.is_failure()) {
        if result.output.is_empty() {
            continue;
        }
        println!();
        println!("  {} {}", style("✗").red().bold(), style(&result.id).bold());
        for line in result.output.lines().take(30) {
            println!("      {}", style(line).dim());
        }
        if result.output.lines().count() > 30 {
            println!("      {}", style("...").dim());
        }
    }

    println!();
    println!(
        "  {} {}, {} {}, {} {}, {} {} ({})",
        style(report.passed_count()).green().bold(),
        style("passed").dim(),
        style(report.failed_count()).red().bold(),
        style("failed").dim(),
        style(report.skipped_count()).yellow().bold(),
        style("skipped").dim(),
        style(report.cached_count()).cyan().bold(),
        style("cached").dim(),
        output::format_duration_ms(report.total_ms)
    );

    println!();
    if report.passed() {
        if report.verified_from_cache {
            println!(
                "  {} {}",
                style("✓").green().bold(),
                style("All checks verified from cache.").green()
            );
        } else {
            println!(
                "  {} {}",
                style("✓").green().bold(),
                style("All checks passed!").green()
            );
        }
    } else {
        println!(
            "  {} {}",
            style("✗").red().bold(),
            style("Some checks failed.").red()
        );
    }
    println!();
}
