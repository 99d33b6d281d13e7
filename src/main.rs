mod cli;
mod config;
mod error;
mod logging;
mod managers;
mod orchestrator;
mod utils;
mod workflow;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use config::{ConfigLoader, ConfigOverrides};
use orchestrator::SystemUpdater;
use std::process;
use std::sync::Arc;
use utils::command::SystemRunner;
use workflow::Outcome;

fn main() {
    let cli = Cli::parse();

    match run(cli) {
        Ok(outcome) => process::exit(outcome.exit_code()),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<Outcome> {
    // `config --init` must work even when the existing file is broken.
    if let Commands::Config {
        init: true, force, ..
    } = cli.command
    {
        return workflow::execute_config_init(cli.config.as_deref(), force)
            .context("Failed to write configuration");
    }

    let overrides = ConfigOverrides {
        dry_run: cli.dry_run.then_some(true),
    };
    let loaded = ConfigLoader::new(cli.config.clone())
        .load(&overrides)
        .context("Failed to load configuration")?;

    let log_file = logging::init(&loaded.config).context("Failed to set up logging")?;
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }
    if let Some(source) = &loaded.source {
        tracing::debug!(path = %source.display(), "configuration loaded");
    }
    if let Some(path) = &log_file {
        tracing::debug!(path = %path.display(), "logging to file");
    }

    let runner = Arc::new(SystemRunner::new());

    let outcome = match cli.command {
        Commands::Update { manager, packages } => {
            let mut updater = SystemUpdater::new(&loaded.config, runner);
            workflow::execute_update(
                &mut updater,
                &manager,
                &packages,
                loaded.config.dry_run,
                cli.verbose,
            )?
        }
        Commands::List => {
            let updater = SystemUpdater::new(&loaded.config, runner);
            workflow::execute_list(&updater, cli.verbose)?
        }
        Commands::Status => {
            let updater = SystemUpdater::new(&loaded.config, runner);
            workflow::execute_status(&updater, cli.verbose)?
        }
        Commands::Config { validate, .. } => workflow::execute_config(&loaded, validate)?,
    };

    Ok(outcome)
}
