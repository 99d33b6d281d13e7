use super::{LogLevel, ManagerConfig, Schedule, SudoMode, SystemConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The configuration file as written: every key optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileConfig {
    pub log_level: Option<LogLevel>,
    pub log_file: Option<PathBuf>,
    pub dry_run: Option<bool>,
    pub sudo_mode: Option<SudoMode>,
    pub auto_update: Option<bool>,
    pub schedule: Option<Schedule>,
    /// A bare `npm:` entry deserializes to `None` and means "present, all defaults".
    pub managers: Option<BTreeMap<String, Option<ManagerConfig>>>,
    pub exclude_packages: Option<Vec<String>>,

    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub dry_run: Option<bool>,
}

/// Layers `file` and then `overrides` on top of `defaults`.
///
/// Scalars are replaced. Manager sections are merged key by key so a file
/// that only sets `homebrew.update_casks` keeps the other homebrew defaults.
/// Exclusion lists are appended, keeping first occurrences.
pub fn merge(defaults: SystemConfig, file: FileConfig, overrides: &ConfigOverrides) -> SystemConfig {
    let mut config = defaults;

    if let Some(level) = file.log_level {
        config.log_level = level;
    }
    if let Some(log_file) = file.log_file {
        config.log_file = Some(log_file);
    }
    if let Some(dry_run) = file.dry_run {
        config.dry_run = dry_run;
    }
    if let Some(mode) = file.sudo_mode {
        config.sudo_mode = mode;
    }
    if let Some(auto_update) = file.auto_update {
        config.auto_update = auto_update;
    }
    if let Some(schedule) = file.schedule {
        config.schedule = schedule;
    }

    if let Some(managers) = file.managers {
        for (name, section) in managers {
            let section = section.unwrap_or_default();
            let merged = match config.managers.remove(&name) {
                Some(base) => merge_manager(base, section),
                None => section,
            };
            config.managers.insert(name, merged);
        }
    }

    if let Some(exclude) = file.exclude_packages {
        append_unique(&mut config.exclude_packages, exclude);
    }

    if let Some(dry_run) = overrides.dry_run {
        config.dry_run = dry_run;
        // A command-line dry run must not be undone by a manager section.
        for section in config.managers.values_mut() {
            section.dry_run = Some(dry_run);
        }
    }

    config
}

fn merge_manager(base: ManagerConfig, layer: ManagerConfig) -> ManagerConfig {
    let mut merged = base;
    if layer.enabled.is_some() {
        merged.enabled = layer.enabled;
    }
    if layer.dry_run.is_some() {
        merged.dry_run = layer.dry_run;
    }
    if layer.requires_sudo.is_some() {
        merged.requires_sudo = layer.requires_sudo;
    }
    append_unique(&mut merged.exclude_packages, layer.exclude_packages);
    merged.options.extend(layer.options);
    merged
}

fn append_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
