//! Sequences package manager runs and aggregates their results.

use crate::config::{SudoMode, SystemConfig};
use crate::error::{Result, UpdaterError};
use crate::managers::{
    ManagerContext, ManagerFactory, PackageInfo, PackageManager, UpdateResult, UpdateStatus,
};
use crate::utils::command::{CommandRunner, CommandSpec};
use jiff::Timestamp;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const SUDO_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-manager line of [`SystemStatus`].
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub name: String,
    pub enabled: bool,
    pub available: bool,
    pub requires_sudo: bool,
    pub updates: Vec<PackageInfo>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub generated_at: Timestamp,
    pub total_managers: usize,
    pub enabled_managers: usize,
    pub available_managers: usize,
    pub total_updates: usize,
    pub managers: Vec<ManagerStatus>,
}

pub struct SystemUpdater {
    managers: Vec<Box<dyn PackageManager>>,
    unsupported: Vec<String>,
    runner: Arc<dyn CommandRunner>,
    sudo_mode: SudoMode,
}

impl SystemUpdater {
    /// Registers an adapter for every configured manager that has one.
    pub fn new(config: &SystemConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let mut managers = Vec::new();

        for name in ManagerFactory::SUPPORTED {
            if !config.managers.contains_key(*name) {
                continue;
            }

            let ctx = ManagerContext {
                settings: config.manager_settings(name),
                options: config.manager_options(name),
                runner: Arc::clone(&runner),
            };
            match ManagerFactory::create(name, ctx) {
                Ok(Some(manager)) => {
                    tracing::debug!(manager = *name, "registered");
                    managers.push(manager);
                }
                Ok(None) => {}
                Err(e) => tracing::error!(manager = *name, error = %e, "failed to initialize"),
            }
        }

        let unsupported = config
            .managers
            .keys()
            .filter(|name| !ManagerFactory::supports(name))
            .cloned()
            .collect();

        tracing::info!(count = managers.len(), "initialized package managers");

        Self {
            managers,
            unsupported,
            runner,
            sudo_mode: config.sudo_mode,
        }
    }

    #[cfg(test)]
    fn with_managers(
        managers: Vec<Box<dyn PackageManager>>,
        runner: Arc<dyn CommandRunner>,
        sudo_mode: SudoMode,
    ) -> Self {
        Self {
            managers,
            unsupported: Vec::new(),
            runner,
            sudo_mode,
        }
    }

    pub fn manager_names(&self) -> Vec<&str> {
        self.managers.iter().map(|m| m.name()).collect()
    }

    pub fn manager(&self, name: &str) -> Option<&dyn PackageManager> {
        self.managers
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    /// Configured managers that have no adapter.
    pub fn unsupported_managers(&self) -> &[String] {
        &self.unsupported
    }

    /// Refreshes the sudo credential cache once when `sudo_mode` is `cache`
    /// and some manager is about to run a sudo-requiring batch.
    pub fn prepare_sudo(&self) -> bool {
        if self.sudo_mode != SudoMode::Cache {
            return true;
        }

        let needed = self.managers.iter().any(|m| {
            m.enabled() && m.requires_sudo() && !m.dry_run() && m.settings().sudo_permitted(m.name())
        });
        if !needed {
            return true;
        }

        tracing::info!("refreshing sudo credentials");
        let spec = CommandSpec::new("sudo", ["-v"], SUDO_TIMEOUT).attached(true);
        match self.runner.run(&spec).and_then(|out| out.into_success(&spec)) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "could not refresh sudo credentials");
                false
            }
        }
    }

    /// Runs every enabled, available adapter, then cleans up. Cleanup only
    /// runs for adapters that were processed; unavailable ones are left alone.
    pub fn update_all(&self) -> Vec<UpdateResult> {
        let enabled: Vec<&dyn PackageManager> = self
            .managers
            .iter()
            .map(|m| m.as_ref())
            .filter(|m| m.enabled())
            .collect();

        if enabled.is_empty() {
            tracing::warn!("no enabled package managers");
            return Vec::new();
        }

        tracing::info!(count = enabled.len(), "starting updates");
        self.prepare_sudo();

        let mut results = Vec::new();
        let mut processed = Vec::new();

        for manager in enabled {
            let span = tracing::info_span!("manager", name = manager.name());
            let _enter = span.enter();

            if !manager.is_available() {
                tracing::warn!("not available, skipping");
                continue;
            }

            results.extend(run_manager(manager, None));
            processed.push(manager);
        }

        for manager in processed {
            let span = tracing::info_span!("manager", name = manager.name());
            let _enter = span.enter();
            run_cleanup(manager);
        }

        tracing::info!(results = results.len(), "system update completed");
        results
    }

    pub fn update_manager(&self, name: &str, packages: Option<&[String]>) -> Vec<UpdateResult> {
        let own = || PackageInfo::new(name, name);

        let Some(manager) = self.manager(name) else {
            let error = UpdaterError::UnknownManager(name.to_string());
            tracing::error!(%error);
            return vec![UpdateResult::failed(own(), error.to_string())];
        };

        let span = tracing::info_span!("manager", name);
        let _enter = span.enter();

        if !manager.enabled() {
            let reason = UpdaterError::ManagerDisabled(name.to_string());
            tracing::warn!(%reason);
            return vec![UpdateResult::skipped(own(), reason.to_string())];
        }

        if !manager.is_available() {
            tracing::error!("not available");
            return vec![UpdateResult::not_available(
                own(),
                format!("{name} is not available"),
            )];
        }

        self.prepare_sudo();
        let results = run_manager(manager, packages);
        run_cleanup(manager);
        results
    }

    /// Outdated packages per enabled, available manager. Managers with nothing
    /// to update are left out.
    #[allow(dead_code)]
    pub fn check_all_updates(&self) -> BTreeMap<String, Vec<PackageInfo>> {
        check_all(&self.managers)
    }

    pub fn get_system_status(&self) -> SystemStatus {
        let mut status = SystemStatus {
            generated_at: Timestamp::now(),
            total_managers: self.managers.len(),
            enabled_managers: 0,
            available_managers: 0,
            total_updates: 0,
            managers: Vec::with_capacity(self.managers.len()),
        };

        for manager in &self.managers {
            let span = tracing::info_span!("manager", name = manager.name());
            let _enter = span.enter();

            let enabled = manager.enabled();
            let available = manager.is_available();
            let mut line = ManagerStatus {
                name: manager.name().to_string(),
                enabled,
                available,
                requires_sudo: manager.requires_sudo(),
                updates: Vec::new(),
                error: None,
            };

            if enabled {
                status.enabled_managers += 1;
            }

            if enabled && available {
                status.available_managers += 1;
                match manager.check_updates() {
                    Ok(updates) => {
                        status.total_updates += updates.len();
                        line.updates = updates;
                    }
                    Err(e) => line.error = Some(e.to_string()),
                }
            }

            status.managers.push(line);
        }

        status
    }

    /// What `update_all` would touch, computed with every adapter forced into
    /// dry run. Original flags are restored even if a check panics.
    pub fn dry_run_all(&mut self) -> BTreeMap<String, Vec<PackageInfo>> {
        let guard = DryRunGuard::engage(&mut self.managers);
        check_all(&*guard.managers)
    }
}

struct DryRunGuard<'a> {
    managers: &'a mut [Box<dyn PackageManager>],
    saved: Vec<bool>,
}

impl<'a> DryRunGuard<'a> {
    fn engage(managers: &'a mut [Box<dyn PackageManager>]) -> Self {
        let saved = managers.iter().map(|m| m.dry_run()).collect();
        for manager in managers.iter_mut() {
            manager.set_dry_run(true);
        }
        Self { managers, saved }
    }
}

impl Drop for DryRunGuard<'_> {
    fn drop(&mut self) {
        for (manager, dry_run) in self.managers.iter_mut().zip(&self.saved) {
            manager.set_dry_run(*dry_run);
        }
    }
}

fn check_all(managers: &[Box<dyn PackageManager>]) -> BTreeMap<String, Vec<PackageInfo>> {
    let mut updates = BTreeMap::new();

    for manager in managers.iter().filter(|m| m.enabled()) {
        let span = tracing::info_span!("manager", name = manager.name());
        let _enter = span.enter();

        if !manager.is_available() {
            continue;
        }

        match manager.check_updates() {
            Ok(found) if found.is_empty() => tracing::info!("up to date"),
            Ok(found) => {
                tracing::info!(count = found.len(), "updates available");
                updates.insert(manager.name().to_string(), found);
            }
            Err(e) => tracing::error!(error = %e, "failed to check for updates"),
        }
    }

    updates
}

/// Self-update then package updates. An adapter error becomes one failed
/// result for the manager; results gathered before it are kept.
fn run_manager(manager: &dyn PackageManager, packages: Option<&[String]>) -> Vec<UpdateResult> {
    let mut results = Vec::new();
    if let Err(e) = apply(manager, packages, &mut results) {
        tracing::error!(error = %e, "update failed");
        results.push(UpdateResult::failed(manager.own_package(), e.to_string()));
    }
    results
}

fn apply(
    manager: &dyn PackageManager,
    packages: Option<&[String]>,
    results: &mut Vec<UpdateResult>,
) -> Result<()> {
    tracing::info!("updating");

    let own = manager.update_self()?;
    if own.status != UpdateStatus::NotAvailable {
        results.push(own);
    }

    let updated = manager.update_packages(packages)?;
    tracing::info!(count = updated.len(), "packages processed");
    results.extend(updated);
    Ok(())
}

fn run_cleanup(manager: &dyn PackageManager) {
    match manager.cleanup() {
        Ok(true) => tracing::debug!("cleanup completed"),
        Ok(false) => tracing::warn!("cleanup failed"),
        Err(e) => tracing::error!(error = %e, "cleanup error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::managers::ManagerSettings;
    use crate::utils::command::testing::{Scripted, ScriptedRunner};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeManager {
        name: &'static str,
        settings: ManagerSettings,
        available: bool,
        updates: Vec<&'static str>,
        fail_update: bool,
        fail_check: bool,
        panic_on_check: bool,
        log: Log,
    }

    impl FakeManager {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                settings: ManagerSettings::default(),
                available: true,
                updates: Vec::new(),
                fail_update: false,
                fail_check: false,
                panic_on_check: false,
                log: Arc::clone(log),
            }
        }

        fn record(&self, op: &str) {
            self.log.lock().unwrap().push(format!("{}:{op}", self.name));
        }
    }

    impl PackageManager for FakeManager {
        fn name(&self) -> &str {
            self.name
        }

        fn settings(&self) -> &ManagerSettings {
            &self.settings
        }

        fn settings_mut(&mut self) -> &mut ManagerSettings {
            &mut self.settings
        }

        fn is_available(&self) -> bool {
            self.record("probe");
            self.available
        }

        fn check_updates(&self) -> Result<Vec<PackageInfo>> {
            self.record("check");
            if self.panic_on_check {
                panic!("adapter blew up");
            }
            if self.fail_check {
                return Err(UpdaterError::ToolFailed {
                    command: format!("{} outdated", self.name),
                    code: 1,
                    stderr: "index unreachable".to_string(),
                });
            }
            Ok(self
                .updates
                .iter()
                .map(|name| PackageInfo::new(*name, self.name))
                .collect())
        }

        fn update_packages(&self, packages: Option<&[String]>) -> Result<Vec<UpdateResult>> {
            self.record("update");
            if self.fail_update {
                return Err(UpdaterError::MalformedOutput {
                    tool: self.name.to_string(),
                    detail: "garbage".to_string(),
                });
            }
            let names: Vec<String> = match packages {
                Some(names) => names.to_vec(),
                None => self.updates.iter().map(|s| s.to_string()).collect(),
            };
            Ok(names
                .into_iter()
                .map(|name| {
                    let package = PackageInfo::new(name, self.name);
                    if self.dry_run() {
                        UpdateResult::skipped(package, "Dry run mode")
                    } else {
                        UpdateResult::success(package, "Updated successfully")
                    }
                })
                .collect())
        }

        fn cleanup(&self) -> Result<bool> {
            self.record("cleanup");
            Ok(true)
        }
    }

    fn updater(managers: Vec<FakeManager>) -> SystemUpdater {
        let boxed = managers
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn PackageManager>)
            .collect();
        SystemUpdater::with_managers(boxed, Arc::new(ScriptedRunner::new()), SudoMode::Prompt)
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn update_all_isolates_failures_and_cleans_up_after() {
        let log = log();
        let mut first = FakeManager::new("first", &log);
        first.updates = vec!["a", "b"];
        let mut broken = FakeManager::new("broken", &log);
        broken.fail_update = true;
        let mut missing = FakeManager::new("missing", &log);
        missing.available = false;
        let mut off = FakeManager::new("off", &log);
        off.settings.enabled = false;

        let results = updater(vec![first, broken, missing, off]).update_all();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, UpdateStatus::Success);
        assert_eq!(results[2].status, UpdateStatus::Failed);
        assert_eq!(results[2].package.manager, "broken");
        assert!(results[2].error.as_deref().unwrap().contains("garbage"));

        let log = log.lock().unwrap().clone();
        assert!(!log.iter().any(|entry| entry.starts_with("off:")));
        assert!(!log.contains(&"missing:update".to_string()));
        assert!(!log.contains(&"missing:cleanup".to_string()));

        let first_cleanup = log.iter().position(|e| e.ends_with(":cleanup")).unwrap();
        let last_update = log.iter().rposition(|e| e.ends_with(":update")).unwrap();
        assert!(first_cleanup > last_update);
        assert!(log.contains(&"broken:cleanup".to_string()));
    }

    #[test]
    fn update_all_with_nothing_outdated_is_empty() {
        let log = log();
        let results = updater(vec![FakeManager::new("quiet", &log)]).update_all();
        assert!(results.is_empty());
    }

    #[test]
    fn unknown_manager_is_one_failure() {
        let results = updater(Vec::new()).update_manager("nonexistent", None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UpdateStatus::Failed);
        assert_eq!(results[0].error.as_deref(), Some("Unknown manager: nonexistent"));
    }

    #[test]
    fn disabled_manager_is_skipped_without_calls() {
        let log = log();
        let mut off = FakeManager::new("homebrew", &log);
        off.settings.enabled = false;

        let results = updater(vec![off]).update_manager("homebrew", None);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UpdateStatus::Skipped);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn disabled_in_config_is_skipped_without_running_tools() {
        let mut config = SystemConfig::default();
        config.managers.insert(
            "homebrew".into(),
            ManagerConfig {
                enabled: Some(false),
                ..ManagerConfig::default()
            },
        );

        let runner = Arc::new(ScriptedRunner::new());
        let shared: Arc<dyn CommandRunner> = runner.clone();
        let updater = SystemUpdater::new(&config, shared);

        let results = updater.update_manager("homebrew", None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UpdateStatus::Skipped);
        assert_eq!(results[0].message.as_deref(), Some("Manager is disabled: homebrew"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn unavailable_manager_is_not_available() {
        let log = log();
        let mut missing = FakeManager::new("npm", &log);
        missing.available = false;

        let results = updater(vec![missing]).update_manager("npm", None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, UpdateStatus::NotAvailable);
    }

    #[test]
    fn update_manager_passes_named_packages_and_cleans_up() {
        let log = log();
        let updater = updater(vec![FakeManager::new("npm", &log)]);

        let results = updater.update_manager("npm", Some(&["typescript".to_string()]));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].package.name, "typescript");
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["npm:probe", "npm:update", "npm:cleanup"]
        );
    }

    #[test]
    fn check_all_updates_only_lists_managers_with_updates() {
        let log = log();
        let mut busy = FakeManager::new("busy", &log);
        busy.updates = vec!["x"];
        let idle = FakeManager::new("idle", &log);

        let updates = updater(vec![busy, idle]).check_all_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates["busy"][0].name, "x");
    }

    #[test]
    fn dry_run_all_restores_flags() {
        let log = log();
        let mut live = FakeManager::new("live", &log);
        live.updates = vec!["x"];
        let mut already = FakeManager::new("already", &log);
        already.settings.dry_run = true;

        let mut updater = updater(vec![live, already]);
        let preview = updater.dry_run_all();

        assert_eq!(preview.len(), 1);
        assert!(!updater.manager("live").unwrap().dry_run());
        assert!(updater.manager("already").unwrap().dry_run());
    }

    #[test]
    fn dry_run_all_restores_flags_after_panic() {
        let log = log();
        let first = FakeManager::new("first", &log);
        let mut exploding = FakeManager::new("exploding", &log);
        exploding.panic_on_check = true;

        let mut updater = updater(vec![first, exploding]);
        let outcome = catch_unwind(AssertUnwindSafe(|| updater.dry_run_all()));

        assert!(outcome.is_err());
        assert!(!updater.manager("first").unwrap().dry_run());
        assert!(!updater.manager("exploding").unwrap().dry_run());
    }

    #[test]
    fn status_counts_and_records_breakdown() {
        let log = log();
        let mut busy = FakeManager::new("busy", &log);
        busy.updates = vec!["x", "y"];
        let mut missing = FakeManager::new("missing", &log);
        missing.available = false;
        let mut off = FakeManager::new("off", &log);
        off.settings.enabled = false;

        let status = updater(vec![busy, missing, off]).get_system_status();

        assert_eq!(status.total_managers, 3);
        assert_eq!(status.enabled_managers, 2);
        assert_eq!(status.available_managers, 1);
        assert_eq!(status.total_updates, 2);
        assert_eq!(status.managers[0].updates.len(), 2);
        assert!(!status.managers[1].available);
        assert!(status.managers.iter().all(|m| m.error.is_none()));
    }

    #[test]
    fn check_errors_are_isolated_per_manager() {
        let log = log();
        let mut broken = FakeManager::new("broken", &log);
        broken.updates = vec!["x"];
        broken.fail_check = true;
        let mut busy = FakeManager::new("busy", &log);
        busy.updates = vec!["y"];

        let updater = updater(vec![broken, busy]);

        let status = updater.get_system_status();
        assert_eq!(status.available_managers, 2);
        assert_eq!(status.total_updates, 1);
        let broken_line = &status.managers[0];
        assert!(broken_line.updates.is_empty());
        assert!(broken_line.error.as_deref().unwrap().contains("index unreachable"));
        assert!(status.managers[1].error.is_none());
        assert_eq!(status.managers[1].updates.len(), 1);

        let updates = updater.check_all_updates();
        assert_eq!(updates.len(), 1);
        assert!(!updates.contains_key("broken"));
        assert_eq!(updates["busy"][0].name, "y");
    }

    #[test]
    fn cache_mode_refreshes_sudo_once_when_needed() {
        let log = log();
        let mut needs = FakeManager::new("homebrew", &log);
        needs.settings.requires_sudo = true;
        needs.settings.sudo_mode = SudoMode::Cache;

        let runner = Arc::new(ScriptedRunner::new().on("sudo -v", Scripted::ok("")));
        let shared: Arc<dyn CommandRunner> = runner.clone();
        let updater = SystemUpdater::with_managers(vec![Box::new(needs)], shared, SudoMode::Cache);

        updater.update_all();
        let specs = runner.specs();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].attach_terminal);

        let prompt_runner = Arc::new(ScriptedRunner::new());
        let shared: Arc<dyn CommandRunner> = prompt_runner.clone();
        let log = self::log();
        let mut needs = FakeManager::new("homebrew", &log);
        needs.settings.requires_sudo = true;
        let updater = SystemUpdater::with_managers(vec![Box::new(needs)], shared, SudoMode::Prompt);
        assert!(updater.prepare_sudo());
        assert!(prompt_runner.calls().is_empty());
    }

    #[test]
    fn registers_configured_adapters_in_order() {
        let config = SystemConfig::default();
        let updater = SystemUpdater::new(&config, Arc::new(ScriptedRunner::new()));

        assert_eq!(updater.manager_names(), vec!["homebrew", "npm"]);
        assert_eq!(updater.unsupported_managers().len(), 6);
        assert!(updater.unsupported_managers().contains(&"texlive".to_string()));
    }

    #[test]
    fn broken_adapter_options_skip_registration() {
        let mut config = SystemConfig::default();
        config.managers.remove("npm");
        config.managers.insert(
            "homebrew".into(),
            ManagerConfig::enabled().option("update_formula", true),
        );

        let updater = SystemUpdater::new(&config, Arc::new(ScriptedRunner::new()));
        assert!(updater.manager_names().is_empty());
        assert!(updater.update_manager("homebrew", None)[0].error.is_some());
    }
}
