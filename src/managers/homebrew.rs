use super::{
    ManagerContext, ManagerSettings, PackageInfo, PackageManager, PackageNameValidator,
    UpdateResult, apply_batch, parse_options, screen_packages, skip_all,
};
use crate::error::{Result, UpdaterError};
use crate::utils::command::{CommandRunner, CommandSpec};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const NAME: &str = "homebrew";
const PROGRAM: &str = "brew";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const INDEX_TIMEOUT: Duration = Duration::from_secs(120);
const OUTDATED_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const FORMULA_TIMEOUT: Duration = Duration::from_secs(300);
const CASK_TIMEOUT: Duration = Duration::from_secs(600);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HomebrewOptions {
    pub update_formulae: bool,
    pub update_casks: bool,
    pub cleanup: bool,
    /// Also report casks that auto-update themselves.
    pub greedy_casks: bool,
}

impl Default for HomebrewOptions {
    fn default() -> Self {
        Self {
            update_formulae: true,
            update_casks: true,
            cleanup: true,
            greedy_casks: false,
        }
    }
}

/// `brew outdated --json=v2`
#[derive(Debug, Default, Deserialize)]
struct OutdatedReport {
    #[serde(default)]
    formulae: Vec<OutdatedEntry>,
    #[serde(default)]
    casks: Vec<OutdatedEntry>,
}

#[derive(Debug, Deserialize)]
struct OutdatedEntry {
    name: String,
    #[serde(default)]
    installed_versions: InstalledVersions,
    current_version: Option<String>,
    #[serde(default)]
    pinned: bool,
}

/// Formulae list every installed version, casks report a single string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InstalledVersions {
    One(String),
    Many(Vec<String>),
}

impl Default for InstalledVersions {
    fn default() -> Self {
        InstalledVersions::Many(Vec::new())
    }
}

impl InstalledVersions {
    fn newest(&self) -> Option<String> {
        match self {
            InstalledVersions::One(version) => Some(version.clone()),
            InstalledVersions::Many(versions) => versions.last().cloned(),
        }
    }
}

#[derive(Debug, Default)]
struct Outdated {
    formulae: Vec<PackageInfo>,
    casks: Vec<PackageInfo>,
}

pub struct HomebrewManager {
    settings: ManagerSettings,
    options: HomebrewOptions,
    runner: Arc<dyn CommandRunner>,
    validator: PackageNameValidator,
    index_refreshed: AtomicBool,
}

impl HomebrewManager {
    pub fn new(ctx: ManagerContext) -> Result<Self> {
        let options = Self::parse_options(&ctx.options)?;
        Ok(Self {
            settings: ctx.settings,
            options,
            runner: ctx.runner,
            validator: PackageNameValidator::new()?,
            index_refreshed: AtomicBool::new(false),
        })
    }

    pub fn parse_options(
        options: &std::collections::BTreeMap<String, serde_yaml::Value>,
    ) -> Result<HomebrewOptions> {
        parse_options(options)
    }

    fn brew<const N: usize>(args: [&str; N], timeout: Duration) -> CommandSpec {
        CommandSpec::new(PROGRAM, args, timeout)
    }

    /// `brew update`, at most once per instance and never in dry run.
    fn refresh_index(&self) {
        if self.dry_run() || self.index_refreshed.load(Ordering::Relaxed) {
            return;
        }

        let spec = Self::brew(["update"], INDEX_TIMEOUT);
        match self.runner.run(&spec).and_then(|out| out.into_success(&spec)) {
            Ok(_) => self.index_refreshed.store(true, Ordering::Relaxed),
            Err(e) => tracing::warn!(manager = NAME, error = %e, "index refresh failed"),
        }
    }

    fn outdated(&self) -> Result<Outdated> {
        self.refresh_index();

        let mut args = vec!["outdated", "--json=v2"];
        if self.options.greedy_casks {
            args.push("--greedy");
        }
        let spec = CommandSpec::new(PROGRAM, args, OUTDATED_TIMEOUT);
        let output = self.runner.run(&spec)?.into_success(&spec)?;

        if output.stdout.trim().is_empty() {
            return Ok(Outdated::default());
        }

        let report: OutdatedReport =
            serde_json::from_str(&output.stdout).map_err(|e| UpdaterError::MalformedOutput {
                tool: spec.display(),
                detail: e.to_string(),
            })?;

        let mut outdated = Outdated::default();

        if self.options.update_formulae {
            for entry in report.formulae {
                if entry.pinned {
                    tracing::info!(manager = NAME, package = %entry.name, "skipping pinned formula");
                    continue;
                }
                if let Some(package) = self.admit(entry) {
                    outdated.formulae.push(package);
                }
            }
        }

        if self.options.update_casks {
            outdated
                .casks
                .extend(report.casks.into_iter().filter_map(|entry| self.admit(entry)));
        }

        Ok(outdated)
    }

    fn admit(&self, entry: OutdatedEntry) -> Option<PackageInfo> {
        if !self.should_update_package(&entry.name) {
            tracing::info!(manager = NAME, package = %entry.name, "skipping excluded package");
            return None;
        }

        let current = entry.installed_versions.newest();
        Some(PackageInfo::new(entry.name, NAME).with_versions(current, entry.current_version))
    }

    fn is_cask(&self, name: &str) -> bool {
        let spec = Self::brew(["info", "--cask", name], PROBE_TIMEOUT);
        matches!(self.runner.run(&spec), Ok(output) if output.success())
    }

    fn upgrade_formulae(&self, names: &[String]) -> Vec<UpdateResult> {
        if names.is_empty() {
            return Vec::new();
        }
        if !self.options.update_formulae {
            return skip_all(NAME, names, "Formula updates disabled");
        }
        if self.dry_run() {
            return skip_all(NAME, names, "Dry run mode");
        }

        let mut args = vec!["upgrade".to_string()];
        args.extend(names.iter().cloned());
        let spec = CommandSpec::new(PROGRAM, args, FORMULA_TIMEOUT);
        apply_batch(self.runner.as_ref(), &spec, NAME, names)
    }

    fn upgrade_casks(&self, names: &[String]) -> Vec<UpdateResult> {
        if names.is_empty() {
            return Vec::new();
        }
        if !self.options.update_casks {
            return skip_all(NAME, names, "Cask updates disabled");
        }
        if self.dry_run() {
            return skip_all(NAME, names, "Dry run mode");
        }

        let needs_sudo = self.requires_sudo();
        if needs_sudo && !self.settings.sudo_permitted(NAME) {
            return skip_all(NAME, names, "Requires sudo");
        }

        let mut args = vec!["upgrade".to_string(), "--cask".to_string()];
        args.extend(names.iter().cloned());
        let spec = CommandSpec::new(PROGRAM, args, CASK_TIMEOUT).attached(needs_sudo);
        apply_batch(self.runner.as_ref(), &spec, NAME, names)
    }

    fn list_versions(&self, cask: bool) -> Result<Vec<PackageInfo>> {
        let spec = if cask {
            Self::brew(["list", "--cask", "--versions"], LIST_TIMEOUT)
        } else {
            Self::brew(["list", "--versions"], LIST_TIMEOUT)
        };
        let output = self.runner.run(&spec)?.into_success(&spec)?;

        Ok(output
            .stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let name = parts.next()?;
                let version = parts.last().map(str::to_string);
                Some(PackageInfo::new(name, NAME).with_versions(version, None))
            })
            .collect())
    }
}

impl PackageManager for HomebrewManager {
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
        let spec = Self::brew(["--version"], PROBE_TIMEOUT);
        matches!(self.runner.run(&spec), Ok(output) if output.success())
    }

    fn check_updates(&self) -> Result<Vec<PackageInfo>> {
        if !self.is_available() {
            tracing::warn!(manager = NAME, "Homebrew not available");
            return Ok(Vec::new());
        }

        match self.outdated() {
            Ok(outdated) => Ok(outdated.formulae.into_iter().chain(outdated.casks).collect()),
            Err(e) => {
                tracing::error!(manager = NAME, error = %e, "failed to check for updates");
                Ok(Vec::new())
            }
        }
    }

    fn update_packages(&self, packages: Option<&[String]>) -> Result<Vec<UpdateResult>> {
        if !self.is_available() {
            return Ok(vec![UpdateResult::not_available(
                self.own_package(),
                "Homebrew not available",
            )]);
        }

        let mut results = Vec::new();
        let (formulae, casks) = match packages {
            Some(names) => {
                let screened = screen_packages(self, &self.validator, names);
                results.extend(screened.rejected);
                screened
                    .accepted
                    .into_iter()
                    .partition::<Vec<_>, _>(|name| !self.is_cask(name))
            }
            None => match self.outdated() {
                Ok(outdated) => (
                    outdated.formulae.into_iter().map(|p| p.name).collect(),
                    outdated.casks.into_iter().map(|p| p.name).collect(),
                ),
                Err(e) => {
                    tracing::error!(manager = NAME, error = %e, "failed to check for updates");
                    (Vec::new(), Vec::new())
                }
            },
        };

        if formulae.is_empty() && casks.is_empty() {
            tracing::info!(manager = NAME, "no packages to update");
        }

        results.extend(self.upgrade_formulae(&formulae));
        results.extend(self.upgrade_casks(&casks));
        Ok(results)
    }

    fn update_self(&self) -> Result<UpdateResult> {
        if self.dry_run() {
            return Ok(UpdateResult::skipped(self.own_package(), "Dry run mode"));
        }

        tracing::info!(manager = NAME, "updating Homebrew");
        let spec = Self::brew(["update"], INDEX_TIMEOUT);
        let result = match self.runner.run(&spec) {
            Ok(output) if output.success() => {
                self.index_refreshed.store(true, Ordering::Relaxed);
                UpdateResult::success(self.own_package(), "Homebrew updated successfully")
            }
            Ok(output) => UpdateResult::failed(self.own_package(), output.stderr.trim()),
            Err(e) => UpdateResult::failed(self.own_package(), e.to_string()),
        };
        Ok(result)
    }

    fn cleanup(&self) -> Result<bool> {
        if !self.options.cleanup {
            return Ok(true);
        }
        if self.dry_run() {
            tracing::info!(manager = NAME, "dry run, skipping cleanup");
            return Ok(true);
        }

        tracing::info!(manager = NAME, "running cleanup");
        let spec = Self::brew(["cleanup"], CLEANUP_TIMEOUT);
        match self.runner.run(&spec).and_then(|out| out.into_success(&spec)) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::error!(manager = NAME, error = %e, "cleanup failed");
                Ok(false)
            }
        }
    }

    fn get_installed_packages(&self) -> Result<Vec<PackageInfo>> {
        if !self.is_available() {
            return Ok(Vec::new());
        }

        let mut packages = self.list_versions(false)?;
        packages.extend(self.list_versions(true)?);
        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SudoMode;
    use crate::managers::UpdateStatus;
    use crate::utils::command::testing::{Scripted, ScriptedRunner};
    use std::collections::BTreeMap;

    const OUTDATED: &str = r#"{
        "formulae": [
            {"name": "wget", "installed_versions": ["1.21.3"], "current_version": "1.21.4", "pinned": false},
            {"name": "node", "installed_versions": ["21.0.0", "22.1.0"], "current_version": "22.2.0", "pinned": false},
            {"name": "postgresql@14", "installed_versions": ["14.9"], "current_version": "14.10", "pinned": true}
        ],
        "casks": [
            {"name": "firefox", "installed_versions": "126.0", "current_version": "127.0"}
        ]
    }"#;

    fn manager(
        runner: &Arc<ScriptedRunner>,
        settings: ManagerSettings,
        options: &[(&str, bool)],
    ) -> HomebrewManager {
        let options: BTreeMap<String, serde_yaml::Value> = options
            .iter()
            .map(|(k, v)| (k.to_string(), serde_yaml::Value::Bool(*v)))
            .collect();
        let runner: Arc<dyn CommandRunner> = runner.clone();
        HomebrewManager::new(ManagerContext {
            settings,
            options,
            runner,
        })
        .unwrap()
    }

    fn installed() -> ScriptedRunner {
        ScriptedRunner::new().on("brew --version", Scripted::ok("Homebrew 4.3.1\n"))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn check_updates_parses_formulae_and_casks() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok(OUTDATED)),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        let updates = brew.check_updates().unwrap();
        let found: Vec<&str> = updates.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(found, vec!["wget", "node", "firefox"]);
        assert!(updates.iter().all(|p| p.manager == NAME));
        assert_eq!(updates[1].current_version.as_deref(), Some("22.1.0"));
        assert_eq!(updates[2].current_version.as_deref(), Some("126.0"));

        brew.check_updates().unwrap();
        let refreshes = runner.calls().iter().filter(|c| *c == "brew update").count();
        assert_eq!(refreshes, 1);
    }

    #[test]
    fn excluded_packages_never_reported() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok(OUTDATED)),
        );
        let mut settings = ManagerSettings::default();
        settings.exclude_packages.insert("node".into());
        settings.exclude_packages.insert("firefox".into());
        let brew = manager(&runner, settings, &[]);

        let updates = brew.check_updates().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "wget");
    }

    #[test]
    fn disabled_classes_are_not_checked() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok(OUTDATED)),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[("update_casks", false)]);

        let updates = brew.check_updates().unwrap();
        assert!(updates.iter().all(|p| p.name != "firefox"));
    }

    #[test]
    fn greedy_casks_adds_flag() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok("{}")),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[("greedy_casks", true)]);

        assert!(brew.check_updates().unwrap().is_empty());
        assert!(runner.called("brew outdated --json=v2 --greedy"));
    }

    #[test]
    fn failed_probe_means_unavailable_and_no_updates() {
        let runner = Arc::new(ScriptedRunner::new().on("brew --version", Scripted::exit(1, "", "")));
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        assert!(!brew.is_available());
        assert!(brew.check_updates().unwrap().is_empty());
        assert!(!runner.called("brew outdated"));

        let results = brew.update_packages(None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UpdateStatus::NotAvailable);
    }

    #[test]
    fn malformed_output_yields_no_updates() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok("not json")),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[]);
        assert!(brew.check_updates().unwrap().is_empty());
    }

    #[test]
    fn nothing_outdated_means_no_results() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok(r#"{"formulae": [], "casks": []}"#)),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        assert!(brew.update_packages(None).unwrap().is_empty());
        assert!(!runner.called("brew upgrade"));
    }

    #[test]
    fn discovered_packages_are_upgraded_per_class() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew outdated", Scripted::ok(OUTDATED))
                .on("brew upgrade --cask", Scripted::ok(""))
                .on("brew upgrade", Scripted::ok("")),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        let results = brew.update_packages(None).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == UpdateStatus::Success));
        assert!(results.iter().all(|r| r.package.manager == NAME));
        assert!(runner.called("brew upgrade wget node"));
        assert!(runner.called("brew upgrade --cask firefox"));
        assert!(!runner.called("brew info"));
    }

    #[test]
    fn dry_run_issues_no_mutating_calls() {
        let runner = Arc::new(
            installed()
                .on("brew outdated", Scripted::ok(OUTDATED))
                .on("brew info --cask firefox", Scripted::ok("")),
        );
        let settings = ManagerSettings {
            dry_run: true,
            ..ManagerSettings::default()
        };
        let brew = manager(&runner, settings, &[]);

        let discovered = brew.update_packages(None).unwrap();
        let named = brew
            .update_packages(Some(&names(&["wget", "firefox"])))
            .unwrap();

        for result in discovered.iter().chain(&named) {
            assert_eq!(result.status, UpdateStatus::Skipped);
        }
        assert_eq!(discovered.len(), 3);
        assert_eq!(named.len(), 2);
        assert_eq!(brew.update_self().unwrap().status, UpdateStatus::Skipped);
        assert!(brew.cleanup().unwrap());

        for call in runner.calls() {
            assert!(!call.starts_with("brew upgrade"), "unexpected {call}");
            assert!(!call.starts_with("brew update"), "unexpected {call}");
            assert!(!call.starts_with("brew cleanup"), "unexpected {call}");
        }
    }

    #[test]
    fn named_packages_are_screened_and_classified() {
        let runner = Arc::new(
            installed()
                .on("brew info --cask firefox", Scripted::ok("firefox: 127.0"))
                .on("brew upgrade --cask", Scripted::ok(""))
                .on("brew upgrade", Scripted::ok("")),
        );
        let mut settings = ManagerSettings::default();
        settings.exclude_packages.insert("node".into());
        let brew = manager(&runner, settings, &[]);

        let results = brew
            .update_packages(Some(&names(&["wget", "node", "--force", "firefox"])))
            .unwrap();

        let by_name = |name: &str| results.iter().find(|r| r.package.name == name).unwrap();
        assert_eq!(by_name("wget").status, UpdateStatus::Success);
        assert_eq!(by_name("firefox").status, UpdateStatus::Success);
        assert_eq!(by_name("node").status, UpdateStatus::Skipped);
        assert_eq!(by_name("--force").status, UpdateStatus::Failed);
        assert!(runner.called("brew upgrade wget"));
        assert!(runner.called("brew upgrade --cask firefox"));
        assert!(runner.calls().iter().all(|c| !c.contains("node") && !c.contains("--force")));
    }

    #[test]
    fn named_cask_with_casks_disabled_is_skipped() {
        let runner = Arc::new(installed().on("brew info --cask firefox", Scripted::ok("")));
        let brew = manager(&runner, ManagerSettings::default(), &[("update_casks", false)]);

        let results = brew.update_packages(Some(&names(&["firefox"]))).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UpdateStatus::Skipped);
        assert!(!runner.called("brew upgrade"));
    }

    #[test]
    fn timeout_fails_every_package_in_batch() {
        let runner = Arc::new(installed().on("brew upgrade", Scripted::Timeout));
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        let results = brew
            .update_packages(Some(&names(&["wget", "jq", "ripgrep"])))
            .unwrap();

        assert_eq!(results.len(), 3);
        for result in &results {
            assert_eq!(result.status, UpdateStatus::Failed);
            assert!(result.error.as_deref().unwrap().contains("timed out after 300s"));
        }
    }

    #[test]
    fn sudo_casks_run_attached_or_are_skipped() {
        let runner = Arc::new(
            installed()
                .on("brew info --cask", Scripted::ok(""))
                .on("brew upgrade --cask", Scripted::exit(1, "", "ignored")),
        );
        let settings = ManagerSettings {
            requires_sudo: true,
            ..ManagerSettings::default()
        };
        let brew = manager(&runner, settings.clone(), &[]);

        let results = brew.update_packages(Some(&names(&["firefox"]))).unwrap();
        assert_eq!(results[0].error.as_deref(), Some("Update failed (exit code 1)"));
        let upgrade = runner
            .specs()
            .into_iter()
            .find(|spec| spec.display().starts_with("brew upgrade --cask"))
            .unwrap();
        assert!(upgrade.attach_terminal);
        assert_eq!(upgrade.timeout, CASK_TIMEOUT);

        let skip_runner = Arc::new(installed().on("brew info --cask", Scripted::ok("")));
        let skipping = manager(
            &skip_runner,
            ManagerSettings {
                sudo_mode: SudoMode::Skip,
                ..settings
            },
            &[],
        );
        let results = skipping.update_packages(Some(&names(&["firefox"]))).unwrap();
        assert_eq!(results[0].status, UpdateStatus::Skipped);
        assert!(!skip_runner.called("brew upgrade"));
    }

    #[test]
    fn self_update_and_cleanup() {
        let runner = Arc::new(
            installed()
                .on("brew update", Scripted::ok(""))
                .on("brew cleanup", Scripted::exit(1, "", "locked"))
                .on("brew outdated", Scripted::ok("{}")),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        assert_eq!(brew.update_self().unwrap().status, UpdateStatus::Success);
        brew.check_updates().unwrap();
        assert_eq!(runner.calls().iter().filter(|c| *c == "brew update").count(), 1);
        assert!(!brew.cleanup().unwrap());

        let quiet_runner = Arc::new(installed());
        let quiet = manager(&quiet_runner, ManagerSettings::default(), &[("cleanup", false)]);
        assert!(quiet.cleanup().unwrap());
        assert!(!quiet_runner.called("brew cleanup"));
    }

    #[test]
    fn installed_packages_from_both_lists() {
        let runner = Arc::new(
            installed()
                .on("brew list --cask --versions", Scripted::ok("firefox 127.0\n"))
                .on("brew list --versions", Scripted::ok("wget 1.21.4\nnode 21.0.0 22.1.0\n\n")),
        );
        let brew = manager(&runner, ManagerSettings::default(), &[]);

        let packages = brew.get_installed_packages().unwrap();
        let found: Vec<(&str, Option<&str>)> = packages
            .iter()
            .map(|p| (p.name.as_str(), p.current_version.as_deref()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("wget", Some("1.21.4")),
                ("node", Some("22.1.0")),
                ("firefox", Some("127.0")),
            ]
        );
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut options = BTreeMap::new();
        options.insert("update_formula".to_string(), serde_yaml::Value::Bool(true));
        assert!(HomebrewManager::parse_options(&options).is_err());
        assert_eq!(
            HomebrewManager::parse_options(&BTreeMap::new()).unwrap(),
            HomebrewOptions::default()
        );
    }
}
