use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    ToolTimeout { command: String, timeout: Duration },

    #[error("`{command}` failed with exit code {code}: {stderr}")]
    ToolFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Malformed output from {tool}: {detail}")]
    MalformedOutput { tool: String, detail: String },

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("Unknown manager: {0}")]
    UnknownManager(String),

    #[error("Manager is disabled: {0}")]
    ManagerDisabled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
