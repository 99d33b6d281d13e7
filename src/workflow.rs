use crate::config::{LoadedConfig, SystemConfig, default_config_path, save_config};
use crate::error::{Result, UpdaterError};
use crate::managers::{PackageInfo, RunSummary, UpdateResult, UpdateStatus};
use crate::orchestrator::SystemUpdater;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use jiff::Timestamp;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const STATUS_PREVIEW: usize = 5;

/// How a command ended, mapped to the process exit code by `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
        }
    }
}

/// Execute the update workflow for one manager or `all`
pub fn execute_update(
    updater: &mut SystemUpdater,
    manager: &str,
    packages: &[String],
    dry_run: bool,
    verbose: bool,
) -> Result<Outcome> {
    let all = manager.eq_ignore_ascii_case("all");

    if all && !packages.is_empty() {
        return Err(UpdaterError::ConfigInvalid(
            "Package names can only be given together with a single manager".into(),
        ));
    }

    if all && dry_run {
        println!("{}", "Dry run: checking what would be updated...".cyan().bold());
        let preview = updater.dry_run_all();
        print_available_updates(&preview);
        return Ok(Outcome::Success);
    }

    let target = if all { "all package managers" } else { manager };
    let mode = if dry_run { " (dry run)" } else { "" };
    println!("{}", format!("Updating {target}{mode}...").cyan().bold());

    let started = Timestamp::now();
    let results = if all {
        updater.update_all()
    } else {
        let selection = (!packages.is_empty()).then_some(packages);
        updater.update_manager(manager, selection)
    };
    let elapsed = Timestamp::now().duration_since(started);

    print_results(&results, verbose);

    let summary = RunSummary::from_results(&results);
    print_summary(&summary, elapsed.as_secs_f64());

    Ok(if summary.is_success() {
        Outcome::Success
    } else {
        Outcome::Failure
    })
}

fn print_results(results: &[UpdateResult], verbose: bool) {
    if results.is_empty() {
        println!("\n{}", "✨ Everything is up to date!".green().bold());
        return;
    }

    let mut by_manager: BTreeMap<&str, Vec<&UpdateResult>> = BTreeMap::new();
    for result in results {
        by_manager
            .entry(result.package.manager.as_str())
            .or_default()
            .push(result);
    }

    for (manager, results) in by_manager {
        println!("\n{}:", manager.cyan().bold());
        for result in results {
            let name = result.package.name.as_str();
            let marker = match result.status {
                UpdateStatus::Success => "✓".green(),
                UpdateStatus::Failed => "✗".red(),
                UpdateStatus::Skipped => "-".yellow(),
                UpdateStatus::NotAvailable => "?".dimmed(),
                UpdateStatus::Pending | UpdateStatus::InProgress => "…".normal(),
            };

            match (&result.error, &result.message) {
                (Some(error), _) => println!("  {marker} {} {}", name.white().bold(), error.red()),
                (None, Some(message)) if verbose || result.status != UpdateStatus::Success => {
                    println!("  {marker} {} {}", name.white().bold(), message.dimmed())
                }
                _ => println!("  {marker} {}", name.white().bold()),
            }
        }
    }
}

fn print_summary(summary: &RunSummary, seconds: f64) {
    println!("\n{}", "Summary".cyan().bold());
    println!(
        "  {} succeeded, {} failed, {} skipped, {} not available ({} total, {:.1}s)",
        summary.success.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().yellow(),
        summary.not_available,
        summary.total,
        seconds
    );

    if summary.is_success() {
        println!("\n{}", "✨ Update completed successfully!".green().bold());
    } else {
        println!("\n{}", "⚠ Some updates failed".red().bold());
    }
}

fn print_available_updates(updates: &BTreeMap<String, Vec<PackageInfo>>) {
    if updates.is_empty() {
        println!("\n{}", "✨ Everything is up to date!".green().bold());
        return;
    }

    let total: usize = updates.values().map(Vec::len).sum();
    println!("\n{}", "📦 Available Updates:".cyan().bold());
    println!("{}", format!("Found {total} update(s)").yellow());

    for (manager, packages) in updates {
        println!("\n{} ({}):", manager.cyan().bold(), packages.len());
        for package in packages {
            print_package(package);
        }
    }
}

fn print_package(package: &PackageInfo) {
    let current = package.current_version.as_deref().unwrap_or("?");
    match &package.available_version {
        Some(available) => println!(
            "  • {} {} → {} {}",
            package.name.white().bold(),
            current.red(),
            available.green().bold(),
            format!("({})", package.update_kind()).dimmed()
        ),
        None => println!("  • {} {}", package.name.white().bold(), current.dimmed()),
    }
}

/// List configured package managers
pub fn execute_list(updater: &SystemUpdater, verbose: bool) -> Result<Outcome> {
    println!("{}", "Configured package managers:".cyan().bold());

    for name in updater.manager_names() {
        let Some(manager) = updater.manager(name) else {
            continue;
        };

        let enabled = if manager.enabled() {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        let available = manager.is_available();
        let installed = if available {
            "installed".green()
        } else {
            "not installed".red()
        };
        let sudo = if manager.requires_sudo() {
            " (requires sudo)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  • {} [{enabled}, {installed}]{sudo}", name.white().bold());

        if verbose && available {
            match manager.get_installed_packages() {
                Ok(packages) => {
                    println!("    {} installed package(s)", packages.len());
                    for package in &packages {
                        println!(
                            "      {} {}",
                            package.name,
                            package.current_version.as_deref().unwrap_or("").dimmed()
                        );
                    }
                }
                Err(e) => println!("    {}", format!("Could not list packages: {e}").red()),
            }
        }
    }

    for name in updater.unsupported_managers() {
        println!("  • {} {}", name.dimmed(), "(no adapter)".dimmed());
    }

    Ok(Outcome::Success)
}

/// Show availability and pending updates per manager
pub fn execute_status(updater: &SystemUpdater, verbose: bool) -> Result<Outcome> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Querying package managers...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let status = updater.get_system_status();
    spinner.finish_and_clear();

    println!("{}", "System status".cyan().bold());
    println!("  {}", format!("Generated at {}", status.generated_at).dimmed());
    println!(
        "  Managers: {} total, {} enabled, {} available",
        status.total_managers, status.enabled_managers, status.available_managers
    );
    println!("  Updates available: {}", status.total_updates.to_string().yellow());

    for manager in &status.managers {
        let state = match (manager.enabled, manager.available) {
            (false, _) => "disabled".yellow(),
            (true, false) => "not installed".red(),
            (true, true) => "ready".green(),
        };
        let sudo = if manager.requires_sudo { " (requires sudo)" } else { "" };
        println!(
            "\n{} [{state}] {} update(s){}",
            manager.name.cyan().bold(),
            manager.updates.len(),
            sudo.dimmed()
        );

        if let Some(error) = &manager.error {
            println!("  {}", error.red());
        }

        if verbose {
            for package in manager.updates.iter().take(STATUS_PREVIEW) {
                print_package(package);
            }
            if manager.updates.len() > STATUS_PREVIEW {
                println!(
                    "  {}",
                    format!("... and {} more", manager.updates.len() - STATUS_PREVIEW).dimmed()
                );
            }
        }
    }

    Ok(Outcome::Success)
}

/// Print the effective configuration, or validate it
pub fn execute_config(loaded: &LoadedConfig, validate: bool) -> Result<Outcome> {
    if validate {
        return Ok(validate_config(loaded));
    }

    match &loaded.source {
        Some(path) => println!("{}", format!("# Loaded from {}", path.display()).dimmed()),
        None => println!("{}", "# Using built-in defaults".dimmed()),
    }
    print!("{}", serde_yaml::to_string(&loaded.config)?);
    Ok(Outcome::Success)
}

fn validate_config(loaded: &LoadedConfig) -> Outcome {
    for warning in &loaded.warnings {
        println!("{} {warning}", "⚠".yellow());
    }

    let errors = loaded.config.validate();
    if errors.is_empty() {
        println!("{}", "✓ Configuration is valid".green());
        return Outcome::Success;
    }

    println!(
        "{}",
        format!("✗ Found {} problem(s):", errors.len()).red().bold()
    );
    for error in &errors {
        println!("  • {}", error.red());
    }
    Outcome::Failure
}

/// Write a default configuration file
pub fn execute_config_init(path: Option<&Path>, force: bool) -> Result<Outcome> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path().ok_or_else(|| {
            UpdaterError::ConfigInvalid("Cannot determine the home directory".into())
        })?,
    };

    if target.exists() && !force {
        println!(
            "{}",
            format!(
                "✗ {} already exists, use --force to overwrite it",
                target.display()
            )
            .red()
        );
        return Ok(Outcome::Failure);
    }

    let written = save_config(&SystemConfig::default(), &target)?;
    println!(
        "{}",
        format!("✓ Wrote default configuration to {}", written.display()).green()
    );
    Ok(Outcome::Success)
}
