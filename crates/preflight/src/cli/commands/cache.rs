//! Cache management command

use std::time::Duration;

use clap::{Args, Subcommand};
use console::style;

use preflight_core::load_config_or_default;
use preflight_engine::CacheStore;

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Result cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
}

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: 7)
    #[arg(long, default_value = "7")]
    pub max_age_days: u64,
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.action {
            CacheAction::Prune(cmd) => cmd.execute(cli),
            CacheAction::Status(cmd) => cmd.execute(cli),
            CacheAction::Clean(cmd) => cmd.execute(cli),
        }
    }
}

/// Resolve the cache location the engine would use here
fn open_store() -> anyhow::Result<CacheStore> {
    let cwd = std::env::current_dir()?;
    let (config, _) = match load_config_or_default(&cwd) {
        Ok(loaded) => loaded,
        Err(err) => {
            output::error(&err.to_string());
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
    };
    Ok(CacheStore::new(cwd.join(&config.engine.cache_dir)))
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let store = open_store()?;
        let max_age = Duration::from_secs(self.max_age_days * 24 * 60 * 60);

        if !cli.quiet {
            output::info(&format!(
                "Pruning cache entries older than {} days...",
                self.max_age_days
            ));
        }

        let stats = store.prune(max_age)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            output::success(&format!(
                "Removed {} of {} entries ({} kept)",
                stats.removed, stats.total, stats.kept
            ));
        }

        Ok(())
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let store = open_store()?;

        let stats = store.status()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "total_size": stats.total_size,
                "total_size_formatted": stats.formatted_size(),
                "cache_dir": store.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", output::header("Check Cache Status"));
            println!();
            println!(
                "{}",
                output::key_value("Location", &store.cache_dir().display().to_string())
            );
            println!("{}", output::key_value("Entries", &stats.entries.to_string()));
            println!(
                "{}",
                output::key_value("Size", &style(stats.formatted_size()).yellow().to_string())
            );
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let store = open_store()?;
        let cache_dir = store.cache_dir().to_path_buf();

        if !cache_dir.exists() {
            if !cli.quiet {
                println!("{} Cache directory does not exist.", style("✓").green());
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cached entries at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                output::warning("Aborted.");
                return Ok(());
            }
        }

        store.clean()?;

        if !cli.quiet {
            output::success(&format!(
                "Cache cleared at {}",
                style(cache_dir.display()).cyan()
            ));
        }

        Ok(())
    }
}
