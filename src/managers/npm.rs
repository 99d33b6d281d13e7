use super::{
    ManagerContext, ManagerSettings, PackageInfo, PackageManager, PackageNameValidator,
    UpdateResult, apply_batch, parse_options, screen_packages, skip_all,
};
use crate::error::{Result, UpdaterError};
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "npm";
const PROGRAM: &str = "npm";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const OUTDATED_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NpmOptions {
    pub global_only: bool,
}

impl Default for NpmOptions {
    fn default() -> Self {
        Self { global_only: true }
    }
}

/// One value of the `npm outdated --json` object, keyed by package name.
#[derive(Debug, Deserialize)]
struct OutdatedEntry {
    current: Option<String>,
    latest: Option<String>,
}

/// `npm ls -g --depth=0 --json`
#[derive(Debug, Default, Deserialize)]
struct ListReport {
    #[serde(default)]
    dependencies: BTreeMap<String, ListedPackage>,
}

#[derive(Debug, Deserialize)]
struct ListedPackage {
    version: Option<String>,
}

/// Globally installed npm packages.
pub struct NpmManager {
    settings: ManagerSettings,
    runner: Arc<dyn CommandRunner>,
    validator: PackageNameValidator,
}

impl NpmManager {
    pub fn new(ctx: ManagerContext) -> Result<Self> {
        Self::parse_options(&ctx.options)?;
        Ok(Self {
            settings: ctx.settings,
            runner: ctx.runner,
            validator: PackageNameValidator::new()?,
        })
    }

    pub fn parse_options(options: &BTreeMap<String, serde_yaml::Value>) -> Result<NpmOptions> {
        let options: NpmOptions = parse_options(options)?;
        if !options.global_only {
            return Err(UpdaterError::ConfigInvalid(
                "global_only: false is not supported, only global packages are managed"
                    .to_string(),
            ));
        }
        Ok(options)
    }

    /// `npm outdated` exits 1 whenever something is outdated.
    fn outdated_output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.runner.run(spec)?;
        match output.code {
            Some(1) if !output.stdout.trim().is_empty() => Ok(output),
            _ => output.into_success(spec),
        }
    }

    fn outdated(&self) -> Result<Vec<PackageInfo>> {
        let spec = CommandSpec::new(PROGRAM, ["outdated", "-g", "--json"], OUTDATED_TIMEOUT);
        let output = self.outdated_output(&spec)?;

        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let malformed = |detail: String| UpdaterError::MalformedOutput {
            tool: spec.display(),
            detail,
        };

        // Failures can also exit 1, with an error object on stdout.
        let document: serde_json::Value =
            serde_json::from_str(&output.stdout).map_err(|e| malformed(e.to_string()))?;
        if let Some(error) = document.get("error") {
            return Err(UpdaterError::ToolFailed {
                command: spec.display(),
                code: output.code.unwrap_or(-1),
                stderr: error.to_string(),
            });
        }

        let report: BTreeMap<String, OutdatedEntry> =
            serde_json::from_value(document).map_err(|e| malformed(e.to_string()))?;
        if let Some((name, _)) = report.iter().find(|(_, entry)| entry.latest.is_none()) {
            return Err(malformed(format!("no latest version for '{name}'")));
        }

        Ok(report
            .into_iter()
            .filter(|(name, _)| {
                let keep = self.should_update_package(name);
                if !keep {
                    tracing::info!(manager = NAME, package = %name, "skipping excluded package");
                }
                keep
            })
            .map(|(name, entry)| {
                PackageInfo::new(name, NAME).with_versions(entry.current, entry.latest)
            })
            .collect())
    }

    fn install(&self, names: &[String]) -> Vec<UpdateResult> {
        if names.is_empty() {
            return Vec::new();
        }
        if self.dry_run() {
            return skip_all(NAME, names, "Dry run mode");
        }

        let needs_sudo = self.requires_sudo();
        if needs_sudo && !self.settings.sudo_permitted(NAME) {
            return skip_all(NAME, names, "Requires sudo");
        }

        let mut args = vec!["install".to_string(), "-g".to_string()];
        args.extend(names.iter().map(|name| format!("{name}@latest")));

        let spec = if needs_sudo {
            let mut sudo_args = vec![PROGRAM.to_string()];
            sudo_args.extend(args);
            CommandSpec::new("sudo", sudo_args, INSTALL_TIMEOUT).attached(true)
        } else {
            CommandSpec::new(PROGRAM, args, INSTALL_TIMEOUT)
        };
        apply_batch(self.runner.as_ref(), &spec, NAME, names)
    }
}

impl PackageManager for NpmManager {
    fn name(&self) -> &str {
        NAME
    }

    fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ManagerSettings {
        &mut self.settings
    }

    fn is_available(&self) -> bool {
        let spec = CommandSpec::new(PROGRAM, ["--version"], PROBE_TIMEOUT);
        matches!(self.runner.run(&spec), Ok(output) if output.success())
    }

    fn check_updates(&self) -> Result<Vec<PackageInfo>> {
        if !self.is_available() {
            tracing::warn!(manager = NAME, "npm not available");
            return Ok(Vec::new());
        }

        self.outdated().or_else(|e| {
            tracing::error!(manager = NAME, error = %e, "failed to check for updates");
            Ok(Vec::new())
        })
    }

    fn update_packages(&self, packages: Option<&[String]>) -> Result<Vec<UpdateResult>> {
        if !self.is_available() {
            return Ok(vec![UpdateResult::not_available(
                self.own_package(),
                "npm not available",
            )]);
        }

        let mut results = Vec::new();
        let targets: Vec<String> = match packages {
            Some(names) => {
                let screened = screen_packages(self, &self.validator, names);
                results.extend(screened.rejected);
                screened.accepted
            }
            None => self
                .check_updates()?
                .into_iter()
                .map(|package| package.name)
                .collect(),
        };

        if targets.is_empty() {
            tracing::info!(manager = NAME, "no packages to update");
        }

        results.extend(self.install(&targets));
        Ok(results)
    }

    fn get_installed_packages(&self) -> Result<Vec<PackageInfo>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }

        let spec = CommandSpec::new(PROGRAM, ["ls", "-g", "--depth=0", "--json"], LIST_TIMEOUT);
        let output = self.runner.run(&spec)?.into_success(&spec)?;
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let report: ListReport =
            serde_json::from_str(&output.stdout).map_err(|e| UpdaterError::MalformedOutput {
                tool: spec.display(),
                detail: e.to_string(),
            })?;

        Ok(report
            .dependencies
            .into_iter()
            .map(|(name, package)| PackageInfo::new(name, NAME).with_versions(package.version, None))
            .collect())
    }
}
