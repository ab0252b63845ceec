mod cache;
mod cli;
mod config;
mod download;
mod errors;
mod history;
mod install;
mod manager;
mod platform;
mod release;
mod system;

use anyhow::Result;
use cache::{CacheMode, CacheStore};
use clap::Parser;
use cli::{CacheAction, Cli, Commands, HistoryAction};
use config::GlobalOptions;
use console::style;
use errors::GhrmError;
use history::HistoryLedger;
use manager::{OperationReport, ToolManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match &cli.command {
        Commands::Init => {
            let path = config::get_user_config_dir()?.join(config::CONFIG_FILE_NAME);
            config::create_default_config(&path)?;
            println!(
                "{} Created default toolset at {}",
                style("✔").green(),
                path.display()
            );
        }

        // Cache and history maintenance work without a toolset file.
        Commands::Cache { action } => {
            let cache = CacheStore::new(config::get_cache_dir()?, CacheMode::Enabled);
            match action {
                CacheAction::Info => print_cache_info(&cache),
                CacheAction::Clear => {
                    cache.clear_all()?;
                    println!("{} Cache cleared", style("✔").green());
                }
            }
        }

        Commands::History { action, limit } => {
            let ledger = HistoryLedger::new(config::get_history_file_path()?);
            match action {
                Some(HistoryAction::Clear) => {
                    ledger.clear()?;
                    println!("{} History cleared", style("✔").green());
                }
                None => {
                    let records = ledger.list(None, *limit);
                    if records.is_empty() {
                        println!("{}", style("No history entries found.").yellow());
                    } else {
                        for record in &records {
                            let line = record.format_line();
                            match record.outcome {
                                history::Outcome::Success => println!("{}", style(line).green()),
                                history::Outcome::Failure => println!("{}", style(line).red()),
                            }
                        }
                        println!("\nTotal entries: {}", records.len());
                    }
                }
            }
        }

        command => {
            let config_path = config::find_config_file(cli.config.as_deref())?;
            let toolset = config::load_toolset(&config_path)?;
            tracing::debug!("Using toolset file {}", config_path.display());

            let mode = resolve_cache_mode(&cli, &toolset.options);
            if mode == CacheMode::Bypassed && cli.no_cache {
                tracing::info!("Caching disabled for this run");
            }

            let cache = CacheStore::new(config::get_cache_dir()?, mode);
            let ledger = HistoryLedger::new(config::get_history_file_path()?);
            let mut manager = ToolManager::new(toolset, config_path, cache, ledger)?;

            let reports = match command {
                Commands::Install { repo } => manager.install(repo.as_deref()).await,
                Commands::Rollback { repo } => vec![manager.rollback(repo)],
                Commands::Clean => manager.clean(),
                Commands::Add {
                    repo,
                    path,
                    install,
                } => manager.add_tool(repo, path.clone(), *install).await,
                Commands::Remove { repo, purge } => vec![manager.remove_tool(repo, *purge)],
                Commands::List => {
                    manager.list_tools().await;
                    Vec::new()
                }
                // Handled above.
                Commands::Init | Commands::Cache { .. } | Commands::History { .. } => {
                    unreachable!()
                }
            };

            if print_reports(&reports) {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn resolve_cache_mode(cli: &Cli, options: &GlobalOptions) -> CacheMode {
    if cli.no_cache {
        CacheMode::Bypassed
    } else if cli.force_cache {
        CacheMode::Forced
    } else if !options.cache_enabled {
        CacheMode::Bypassed
    } else {
        CacheMode::Enabled
    }
}

/// Print per-repository outcomes; returns true when any repository failed.
fn print_reports(reports: &[OperationReport]) -> bool {
    let mut any_failed = false;
    for report in reports {
        match &report.result {
            Ok(message) => {
                println!(
                    "{} {}: {}",
                    style("✔").green(),
                    style(&report.repo).bold(),
                    message
                );
            }
            Err(err) => {
                any_failed = true;
                eprintln!(
                    "{} {}: {}",
                    style("✖").red(),
                    style(&report.repo).bold(),
                    err
                );
                if let GhrmError::PermissionDenied { .. } = err {
                    if !system::sudo_available() {
                        eprintln!(
                            "  {}",
                            style("Note: passwordless sudo is not available either.").yellow()
                        );
                    }
                } else if err.is_retryable() {
                    eprintln!("  {}", style("This failure may be transient; re-running the same command can succeed.").yellow());
                }
            }
        }
    }
    any_failed
}

fn print_cache_info(cache: &CacheStore) {
    let stats = cache.stats();
    println!("Cache directory: {}", cache.root().display());
    println!(
        "Cache size: {:.2} MB",
        stats.total_bytes as f64 / (1024.0 * 1024.0)
    );
    println!("API cache entries: {}", stats.api_entries);
    println!("Download cache entries: {}", stats.asset_entries);
    if let Some(oldest) = stats.oldest_entry {
        println!("Oldest entry: {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}
