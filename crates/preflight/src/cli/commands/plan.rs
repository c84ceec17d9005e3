//! Plan command - show the execution plan without running anything

use clap::{Args, ValueEnum};
use console::style;

use preflight_core::{load_config_or_default, Bucket, ExecutionProfile, PreflightError};
use preflight_engine::{Pipeline, Plan};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Show the execution plan without running anything
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Execution profile
    #[arg(short, long)]
    pub profile: Option<ProfileArg>,
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

impl PlanCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
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

        let pipeline = Pipeline::new(&root, config, config_bytes).with_profile(profile);
        let plan = match pipeline.plan() {
            Ok(plan) => plan,
            Err(PreflightError::Config(err)) => {
                output::error(&err.to_string());
                std::process::exit(exit_codes::CONFIG_ERROR);
            }
            Err(err) => return Err(err.into()),
        };

        if cli.format == OutputFormat::Json {
            let levels = plan.dag.levels()?;
            let json = serde_json::json!({
                "profile": profile,
                "dag": plan.dag,
                "rules": plan.rules,
                "levels": levels,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        } else if !cli.quiet {
            print_plan(&plan, profile)?;
        }

        Ok(())
    }
}

fn print_plan(plan: &Plan, profile: ExecutionProfile) -> anyhow::Result<()> {
    println!();
    println!(
        "{}",
        output::header(&format!("Execution plan ({profile} profile)"))
    );
    println!();

    for bucket in [Bucket::Fast, Bucket::Mutating, Bucket::Slow] {
        let tasks: Vec<_> = plan.dag.tasks().filter(|t| t.bucket == bucket).collect();
        if tasks.is_empty() {
            continue;
        }
        println!("  {} {} phase", style("→").blue(), style(bucket).bold());
        for task in tasks {
            println!(
                "      {}  {}",
                style(&task.id).cyan(),
                style(task.command.join(" ")).dim()
            );
            if !task.depends_on.is_empty() {
                let deps: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
                println!("          after {}", style(deps.join(", ")).dim());
            }
        }
    }

    if !plan.rules.is_empty() {
        println!();
        println!("  {}", style("Skip rules").bold());
        for rule in plan.rules.rules() {
            let strictness = if rule.strict { "strict" } else { "lenient" };
            println!(
                "      {} needs {} ({})",
                style(&rule.dependent).cyan(),
                style(&rule.prerequisite).cyan(),
                style(strictness).dim()
            );
        }
    }

    let levels = plan.dag.levels()?;
    println!();
    println!("  {}", style("Waves").bold());
    for (i, level) in levels.iter().enumerate() {
        println!("      {}: {}", i + 1, level.join(", "));
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use preflight_core::Config;
    use preflight_engine::build_plan;

    #[test]
    fn test_profile_conversion() {
        let dev: ExecutionProfile = ProfileArg::Dev.into();
        assert!(matches!(dev, ExecutionProfile::Dev));
    }

    #[test]
    fn test_full_profile_spans_all_phases() {
        let plan = build_plan(&Config::default(), ExecutionProfile::Full).unwrap();

        let buckets: Vec<Bucket> = plan.dag.tasks().map(|t| t.bucket).collect();
        assert!(buckets.contains(&Bucket::Fast));
        assert!(buckets.contains(&Bucket::Mutating));
        assert!(buckets.contains(&Bucket::Slow));
    }
}
