use crate::config::SystemConfig;
use crate::error::Result;
use crate::utils::path_validator::PathValidator;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: stderr always, plus `log_file` when set.
/// `RUST_LOG` wins over the configured level.
///
/// Returns the log file actually opened.
pub fn init(config: &SystemConfig) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.filter_directive()));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, log_path) = match &config.log_file {
        Some(path) => {
            let (file, path) = open_log_file(path)?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("subscriber already installed");
    }

    Ok(log_path)
}

fn open_log_file(path: &Path) -> Result<(File, PathBuf)> {
    let path = PathValidator::validate_output_file(path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}
