use crate::error::{Result, UpdaterError};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A single external tool invocation with its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Inherit the terminal instead of capturing output, so the tool can prompt
    /// for a password.
    pub attach_terminal: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
            attach_terminal: false,
        }
    }

    pub fn attached(mut self, attach: bool) -> Self {
        self.attach_terminal = attach;
        self
    }

    /// Human readable form used in logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turns a non-zero exit into `ToolFailed`.
    pub fn into_success(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        Err(UpdaterError::ToolFailed {
            command: spec.display(),
            code: self.code.unwrap_or(-1),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs external tools. A non-zero exit is reported in the output, not as an
/// error; errors are reserved for tools that are missing, time out, or cannot
/// be spawned.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the host with a hard deadline.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Child> {
        let program = which::which(&spec.program)
            .map_err(|_| UpdaterError::ToolNotFound(spec.program.clone()))?;

        let mut command = Command::new(program);
        command.args(&spec.args);

        if spec.attach_terminal {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }

        command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => UpdaterError::ToolNotFound(spec.program.clone()),
            _ => UpdaterError::Io(e),
        })
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec.display(), timeout_secs = spec.timeout.as_secs(), "running");

        let mut child = self.spawn(spec)?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if start.elapsed() > spec.timeout {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Grandchildren may still hold the pipes after a kill, so the reader
        // threads are only joined for processes that exited on their own.
        let Some(status) = status else {
            tracing::warn!(command = %spec.display(), "timed out");
            return Err(UpdaterError::ToolTimeout {
                command: spec.display(),
                timeout: spec.timeout,
            });
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut source: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
