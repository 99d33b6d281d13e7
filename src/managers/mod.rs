use crate::config::SudoMode;
use crate::error::Result;
use crate::utils::command::{CommandRunner, CommandSpec};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub mod factory;
pub mod homebrew;
pub mod npm;
pub mod version;

pub use factory::ManagerFactory;
pub use version::UpdateKind;

/// Outcome of a single package update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum UpdateStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Skipped,
    NotAvailable,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::InProgress => "in_progress",
            UpdateStatus::Success => "success",
            UpdateStatus::Failed => "failed",
            UpdateStatus::Skipped => "skipped",
            UpdateStatus::NotAvailable => "not_available",
        };
        f.write_str(label)
    }
}

/// A package as reported by one manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub current_version: Option<String>,
    pub available_version: Option<String>,
    /// Name of the manager that produced this record.
    pub manager: String,
}

impl PackageInfo {
    pub fn new(name: impl Into<String>, manager: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_version: None,
            available_version: None,
            manager: manager.into(),
        }
    }

    pub fn with_versions(mut self, current: Option<String>, available: Option<String>) -> Self {
        self.current_version = current;
        self.available_version = available;
        self
    }

    /// Size of the version jump, when both ends are known.
    pub fn update_kind(&self) -> UpdateKind {
        match (&self.current_version, &self.available_version) {
            (Some(current), Some(available)) => UpdateKind::classify(current, available),
            _ => UpdateKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub package: PackageInfo,
    pub status: UpdateStatus,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl UpdateResult {
    pub fn success(package: PackageInfo, message: impl Into<String>) -> Self {
        Self {
            package,
            status: UpdateStatus::Success,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(package: PackageInfo, error: impl Into<String>) -> Self {
        Self {
            package,
            status: UpdateStatus::Failed,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped(package: PackageInfo, message: impl Into<String>) -> Self {
        Self {
            package,
            status: UpdateStatus::Skipped,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn not_available(package: PackageInfo, message: impl Into<String>) -> Self {
        Self {
            package,
            status: UpdateStatus::NotAvailable,
            message: Some(message.into()),
            error: None,
        }
    }
}

/// Tally of an update run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_available: usize,
}

impl RunSummary {
    pub fn from_results(results: &[UpdateResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                UpdateStatus::Success => summary.success += 1,
                UpdateStatus::Failed => summary.failed += 1,
                UpdateStatus::Skipped => summary.skipped += 1,
                UpdateStatus::NotAvailable => summary.not_available += 1,
                UpdateStatus::Pending | UpdateStatus::InProgress => {}
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Resolved per-manager settings. `dry_run` is the only field changed after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub enabled: bool,
    pub dry_run: bool,
    pub requires_sudo: bool,
    pub sudo_mode: SudoMode,
    /// Union of the global and per-manager exclusion lists.
    pub exclude_packages: BTreeSet<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
            requires_sudo: false,
            sudo_mode: SudoMode::default(),
            exclude_packages: BTreeSet::new(),
        }
    }
}

impl ManagerSettings {
    /// Whether `manager` may run a sudo-requiring invocation under the global
    /// sudo mode.
    pub fn sudo_permitted(&self, manager: &str) -> bool {
        match self.sudo_mode {
            SudoMode::Prompt | SudoMode::Cache => true,
            SudoMode::Skip => false,
            SudoMode::HomebrewOnly => manager == homebrew::NAME,
        }
    }
}

/// Everything an adapter receives at construction.
pub struct ManagerContext {
    pub settings: ManagerSettings,
    pub options: BTreeMap<String, serde_yaml::Value>,
    pub runner: Arc<dyn CommandRunner>,
}

/// Capability interface every package manager adapter implements.
///
/// Only availability, checking and applying are required; the remaining
/// operations have defaults for managers that have nothing to do there.
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> &ManagerSettings;

    fn settings_mut(&mut self) -> &mut ManagerSettings;

    /// Probe whether the backing tool is installed. Never fails.
    fn is_available(&self) -> bool;

    /// Outdated packages, excluding the exclusion set. Tool failures yield an
    /// empty list.
    fn check_updates(&self) -> Result<Vec<PackageInfo>>;

    /// Update `packages`, or everything `check_updates` reports when `None`.
    fn update_packages(&self, packages: Option<&[String]>) -> Result<Vec<UpdateResult>>;

    fn update_self(&self) -> Result<UpdateResult> {
        Ok(UpdateResult::not_available(
            self.own_package(),
            "Self-update not supported",
        ))
    }

    fn cleanup(&self) -> Result<bool> {
        Ok(true)
    }

    fn get_installed_packages(&self) -> Result<Vec<PackageInfo>> {
        Ok(Vec::new())
    }

    fn enabled(&self) -> bool {
        self.settings().enabled
    }

    fn dry_run(&self) -> bool {
        self.settings().dry_run
    }

    fn set_dry_run(&mut self, dry_run: bool) {
        self.settings_mut().dry_run = dry_run;
    }

    fn requires_sudo(&self) -> bool {
        self.settings().requires_sudo
    }

    fn should_update_package(&self, name: &str) -> bool {
        !self.settings().exclude_packages.contains(name)
    }

    /// The record used when a result concerns the manager as a whole.
    fn own_package(&self) -> PackageInfo {
        PackageInfo::new(self.name(), self.name())
    }
}

/// Rejects names that the tool would read as flags or that carry shell
/// metacharacters.
pub struct PackageNameValidator {
    pattern: Regex,
}

impl PackageNameValidator {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"^[A-Za-z0-9@][A-Za-z0-9@._+/-]*$")?;
        Ok(Self { pattern })
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

/// Packages that survived screening, plus the results for those that did not.
#[derive(Debug, Default)]
pub(crate) struct Screened {
    pub accepted: Vec<String>,
    pub rejected: Vec<UpdateResult>,
}

/// Drops duplicates, excluded names and invalid names from an explicit target
/// list. Rejected names get a result of their own and never reach the tool.
pub(crate) fn screen_packages(
    manager: &dyn PackageManager,
    validator: &PackageNameValidator,
    names: &[String],
) -> Screened {
    let mut screened = Screened::default();
    let mut seen = BTreeSet::new();

    for name in names {
        let name = name.trim();
        if !seen.insert(name.to_string()) {
            continue;
        }

        let package = PackageInfo::new(name, manager.name());
        if !validator.is_valid(name) {
            tracing::warn!(manager = manager.name(), package = name, "rejecting invalid package name");
            screened
                .rejected
                .push(UpdateResult::failed(package, format!("Invalid package name: '{name}'")));
        } else if !manager.should_update_package(name) {
            tracing::info!(manager = manager.name(), package = name, "skipping excluded package");
            screened
                .rejected
                .push(UpdateResult::skipped(package, "Excluded by configuration"));
        } else {
            screened.accepted.push(name.to_string());
        }
    }

    screened
}

/// One `skipped` result per package, for batches that must not run.
pub(crate) fn skip_all(manager: &str, packages: &[String], message: &str) -> Vec<UpdateResult> {
    packages
        .iter()
        .map(|name| UpdateResult::skipped(PackageInfo::new(name, manager), message))
        .collect()
}

/// Runs one apply invocation covering every package in the batch and stamps
/// its outcome onto each of them.
pub(crate) fn apply_batch(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    manager: &str,
    packages: &[String],
) -> Vec<UpdateResult> {
    tracing::info!(manager, count = packages.len(), command = %spec.display(), "applying updates");

    let outcome = match runner.run(spec) {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => {
            let stderr = output.stderr.trim();
            Err(if spec.attach_terminal || stderr.is_empty() {
                match output.code {
                    Some(code) => format!("Update failed (exit code {code})"),
                    None => "Update failed (terminated by signal)".to_string(),
                }
            } else {
                stderr.to_string()
            })
        }
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(()) => {
            tracing::info!(manager, count = packages.len(), "updated successfully");
            packages
                .iter()
                .map(|name| {
                    UpdateResult::success(PackageInfo::new(name, manager), "Updated successfully")
                })
                .collect()
        }
        Err(error) => {
            tracing::error!(manager, %error, "update failed");
            packages
                .iter()
                .map(|name| UpdateResult::failed(PackageInfo::new(name, manager), error.clone()))
                .collect()
        }
    }
}

/// Deserializes adapter-specific options from a manager's config section.
pub(crate) fn parse_options<T: serde::de::DeserializeOwned>(
    options: &BTreeMap<String, serde_yaml::Value>,
) -> Result<T> {
    let value = serde_yaml::to_value(options)?;
    Ok(serde_yaml::from_value(value)?)
}
