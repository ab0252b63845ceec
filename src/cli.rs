use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn get_version() -> &'static str {
    const BASE_VERSION: &str = env!("CARGO_PKG_VERSION");

    // If there's a git tag at HEAD, use just the tag (release build)
    if let Some(tag) = option_env!("GHRM_GIT_TAG") {
        return tag;
    }

    // Not on a tag - include commit hash and branch (dev build)
    let commit = option_env!("GHRM_GIT_COMMIT").unwrap_or("unknown");
    let branch = option_env!("GHRM_GIT_BRANCH").unwrap_or("unknown");

    // Return a static string by leaking the formatted string
    // This is safe because it only happens once at startup
    let version = format!("v{}-{} ({})", BASE_VERSION, commit, branch);
    Box::leak(version.into_boxed_str())
}

#[derive(Parser)]
#[command(name = "ghrm")]
#[command(about = "Install, update and roll back CLI tools shipped as GitHub release assets")]
#[command(version = get_version(), propagate_version = true)]
pub struct Cli {
    /// Path to the toolset file (default: discovered, see 'ghrm init')
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Skip cache reads for this run; entries are kept on disk
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Treat every cache entry as fresh, ignoring TTLs
    #[arg(long, global = true, conflicts_with = "no_cache")]
    pub force_cache: bool,

    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install or update all configured tools, or a single repository
    Install {
        /// Repository to install (e.g. 'derailed/k9s'); all tools when omitted
        repo: Option<String>,
    },

    /// Re-activate the version installed before the current one
    Rollback {
        /// Repository to roll back (e.g. 'derailed/k9s')
        repo: String,
    },

    /// Delete installed versions beyond the keep_versions setting
    Clean,

    /// List configured tools with installed, active and latest versions
    List,

    /// Add a repository to the toolset
    Add {
        /// Repository in owner/name form
        repo: String,
        /// Install into this directory instead of the default location
        #[arg(long)]
        path: Option<PathBuf>,
        /// Install immediately after adding
        #[arg(long)]
        install: bool,
    },

    /// Remove a repository from the toolset
    Remove {
        /// Repository in owner/name form
        repo: String,
        /// Also delete the installed versions from disk
        #[arg(long)]
        purge: bool,
    },

    /// Inspect or clear the release/download cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the operation history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
        /// Limit output to the N most recent entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Create a default toolset file in the user config directory
    Init,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show cache location, entry counts and size
    Info,
    /// Remove every cached entry
    Clear,
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// Clear the operation history
    Clear,
}
