//! Configuration loading, layering and validation.
//!
//! The effective configuration is built in three layers: built-in defaults,
//! the YAML file found on disk, and command-line overrides. Layering itself
//! lives in [`merge`] and never touches the filesystem.

use crate::error::{Result, UpdaterError};
use crate::managers::{ManagerFactory, ManagerSettings};
use crate::utils::path_validator::PathValidator;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod merge;

pub use merge::{ConfigOverrides, FileConfig, merge};

const APP_DIR: &str = "system-updater";

macro_rules! config_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str().eq_ignore_ascii_case(value.trim()))
                    .ok_or_else(|| {
                        let expected: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        format!(
                            "Invalid {}: '{}' (expected one of {})",
                            $field,
                            value,
                            expected.join(", ")
                        )
                    })
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> std::result::Result<Self, String> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

config_enum!(
    /// Logging threshold, spelled the way the configuration file spells it.
    LogLevel, "log_level", {
        Debug => "DEBUG",
        Info => "INFO",
        Warning => "WARNING",
        Error => "ERROR",
        Critical => "CRITICAL",
    }
);

config_enum!(
    /// How sudo-requiring invocations are handled.
    SudoMode, "sudo_mode", {
        Prompt => "prompt",
        Cache => "cache",
        Skip => "skip",
        HomebrewOnly => "homebrew_only",
    }
);

config_enum!(
    /// Recorded for external schedulers; nothing in this tool schedules runs.
    Schedule, "schedule", {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
);

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl Default for SudoMode {
    fn default() -> Self {
        SudoMode::Prompt
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Weekly
    }
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// One entry under `managers:`. Unset common keys fall back to the global
/// settings when resolved; anything else is an adapter-specific option.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_sudo: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_packages: Vec<String>,

    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl ManagerConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }

    pub fn option(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// The effective configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub dry_run: bool,
    pub sudo_mode: SudoMode,
    pub auto_update: bool,
    pub schedule: Schedule,
    pub managers: BTreeMap<String, ManagerConfig>,
    pub exclude_packages: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let managers = [
            (
                "homebrew",
                ManagerConfig::enabled()
                    .option("update_formulae", true)
                    .option("update_casks", true)
                    .option("cleanup", true),
            ),
            ("mac_app_store", ManagerConfig::enabled()),
            ("npm", ManagerConfig::enabled().option("global_only", true)),
            (
                "python",
                ManagerConfig::enabled()
                    .option("pip_user_only", true)
                    .option("update_pip", true)
                    .option("use_uv", true),
            ),
            (
                "ruby",
                ManagerConfig::enabled()
                    .option("user_install", true)
                    .option("update_system", false),
            ),
            (
                "r_packages",
                ManagerConfig::enabled()
                    .option("cran_mirror", "https://cran.rstudio.com")
                    .option("update_bioconductor", true),
            ),
            ("texlive", ManagerConfig::enabled().option("update_all", true)),
            (
                "vscode",
                ManagerConfig::enabled().option("auto_update_extensions", true),
            ),
        ]
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect();

        Self {
            log_level: LogLevel::default(),
            log_file: None,
            dry_run: false,
            sudo_mode: SudoMode::default(),
            auto_update: true,
            schedule: Schedule::default(),
            managers,
            exclude_packages: Vec::new(),
        }
    }
}

impl SystemConfig {
    /// Settings for `name` with the global defaults and exclusions folded in.
    pub fn manager_settings(&self, name: &str) -> ManagerSettings {
        let section = self.managers.get(name).cloned().unwrap_or_default();

        let exclude_packages: BTreeSet<String> = self
            .exclude_packages
            .iter()
            .chain(section.exclude_packages.iter())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        ManagerSettings {
            enabled: section.is_enabled(),
            dry_run: section.dry_run.unwrap_or(self.dry_run),
            requires_sudo: section.requires_sudo.unwrap_or(false),
            sudo_mode: self.sudo_mode,
            exclude_packages,
        }
    }

    /// Adapter-specific options for `name`.
    pub fn manager_options(&self, name: &str) -> BTreeMap<String, serde_yaml::Value> {
        self.managers
            .get(name)
            .map(|section| section.options.clone())
            .unwrap_or_default()
    }

    /// Semantic checks beyond what parsing already enforces.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.exclude_packages.iter().any(|name| name.trim().is_empty()) {
            errors.push("exclude_packages contains an empty package name".to_string());
        }

        if let Some(log_file) = &self.log_file {
            if expand_home(log_file).is_dir() {
                errors.push(format!(
                    "log_file '{}' is a directory",
                    log_file.display()
                ));
            }
        }

        for (name, section) in &self.managers {
            if section.exclude_packages.iter().any(|p| p.trim().is_empty()) {
                errors.push(format!(
                    "managers.{name}.exclude_packages contains an empty package name"
                ));
            }
            if ManagerFactory::supports(name) {
                if let Err(e) = ManagerFactory::validate_options(name, &section.options) {
                    errors.push(format!("managers.{name}: {e}"));
                }
            }
        }

        errors
    }
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Where `config --init` writes by default.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join(APP_DIR).join("config.yaml"))
}

/// Result of loading: the effective config and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SystemConfig,
    pub source: Option<PathBuf>,
    /// Problems noticed before logging was configured.
    pub warnings: Vec<String>,
}

/// Locates, reads and layers the configuration file.
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }

    /// Candidate locations, in priority order, when no path is given.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join(APP_DIR).join("config.yaml"));
            paths.push(home.join(".system-updater.yaml"));
        }
        paths.push(PathBuf::from("config").join("default.yaml"));
        paths
    }

    fn find(&self, warnings: &mut Vec<String>) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            let path = expand_home(path);
            if path.exists() {
                return Some(path);
            }
            warnings.push(format!(
                "Specified config file not found: {}",
                path.display()
            ));
            return None;
        }

        Self::search_paths().into_iter().find(|path| path.exists())
    }

    pub fn load(&self, overrides: &ConfigOverrides) -> Result<LoadedConfig> {
        let mut warnings = Vec::new();
        let source = self.find(&mut warnings);

        let file = match &source {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        for key in file.unknown.keys() {
            warnings.push(format!("Ignoring unknown configuration key: {key}"));
        }

        let config = merge(SystemConfig::default(), file, overrides);

        Ok(LoadedConfig {
            config,
            source,
            warnings,
        })
    }
}

/// Parses configuration file contents. An empty document is an empty layer.
pub fn parse_file_config(content: &str) -> Result<FileConfig> {
    let invalid = |e: serde_yaml::Error| UpdaterError::ConfigInvalid(e.to_string());

    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    // Comment-only documents parse as null.
    let document: serde_yaml::Value = serde_yaml::from_str(content).map_err(invalid)?;
    if document.is_null() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(content).map_err(invalid)
}

pub fn read_file_config(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)?;
    parse_file_config(&content).map_err(|e| match e {
        UpdaterError::ConfigInvalid(detail) => {
            UpdaterError::ConfigInvalid(format!("{}: {detail}", path.display()))
        }
        other => other,
    })
}

/// Writes `config` as YAML, creating parent directories as needed.
pub fn save_config(config: &SystemConfig, path: &Path) -> Result<PathBuf> {
    let path = PathValidator::validate_output_file(path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let yaml = serde_yaml::to_string(config)?;
    fs::write(&path, yaml)?;
    Ok(path)
}
