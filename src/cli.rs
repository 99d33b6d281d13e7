use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "system-updater",
    about = "Keep Homebrew, npm and other package managers up to date from one YAML config",
    version,
    author
)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/system-updater/config.yaml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show what would be updated without changing anything
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Show per-package details
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Update one package manager, or every enabled one with `all`
    Update {
        /// Manager name (e.g. homebrew, npm) or `all`
        #[arg(value_name = "MANAGER")]
        manager: String,

        /// Only update these packages (not allowed with `all`)
        #[arg(value_name = "PACKAGES")]
        packages: Vec<String>,
    },

    /// List configured package managers
    List,

    /// Show which managers are available and what is outdated
    Status,

    /// Show, create or validate the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long, conflicts_with = "validate")]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,

        /// Check the configuration and report problems
        #[arg(long)]
        validate: bool,
    },
}
