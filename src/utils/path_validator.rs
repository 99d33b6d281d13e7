use crate::config::expand_home;
use crate::error::{Result, UpdaterError};
use std::path::{Component, Path, PathBuf};

const FORBIDDEN: &[&str] = &["/etc", "/sys", "/proc", "/dev", "/boot"];

/// Guards the files this tool writes (config file, log file).
pub struct PathValidator;

impl PathValidator {
    /// Validates a file path we are about to create or overwrite and returns it
    /// with `~` expanded and `..` components rejected.
    pub fn validate_output_file(path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = expand_home(path.as_ref());

        if path.as_os_str().is_empty() {
            return Err(UpdaterError::ConfigInvalid("Empty file path".to_string()));
        }

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(UpdaterError::ConfigInvalid(format!(
                "Path '{}' must not contain '..'",
                path.display()
            )));
        }

        if path.is_dir() {
            return Err(UpdaterError::ConfigInvalid(format!(
                "Path '{}' is a directory",
                path.display()
            )));
        }

        let canonical_parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .and_then(|parent| parent.canonicalize().ok());

        for forbidden in FORBIDDEN {
            let forbidden_path = Path::new(forbidden);

            let inside = path.starts_with(forbidden_path)
                || canonical_parent
                    .as_ref()
                    .is_some_and(|parent| parent.starts_with(forbidden_path));

            if inside {
                return Err(UpdaterError::ConfigInvalid(format!(
                    "Writing into system directory '{}' is not allowed",
                    forbidden
                )));
            }
        }

        Ok(path)
    }
}
