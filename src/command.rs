// src/command.rs

//! External process execution with a hard timeout
//!
//! A command that outlives its timeout is killed and reported as
//! `Error::CommandTimeout`; there is no cooperative cancellation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// A command line to execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable command line
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| {
                if arg.contains(' ') || arg.contains('"') {
                    format!("\"{}\"", arg.replace('"', "\\\""))
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `spec` to completion or until `timeout` elapses.
///
/// Returns the captured output for any exit status; only spawn failures and
/// timeouts are errors.
pub fn run_command(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
    let (program, args) = spec
        .argv
        .split_first()
        .ok_or_else(|| Error::CommandError("Empty command line".to_string()))?;

    debug!("Executing: {}", spec.display());

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::IoError(format!("Failed to spawn '{}': {}", program, e)))?;

    // Drain both pipes while waiting so a chatty child never blocks on write
    let stdout_reader = child.stdout.take().map(drain);
    let stderr_reader = child.stderr.take().map(drain);

    match child.wait_timeout(timeout)? {
        Some(status) => {
            let stdout = collect(stdout_reader);
            let stderr = collect(stderr_reader);

            for line in stdout.lines() {
                debug!("[{}] {}", program, line);
            }
            for line in stderr.lines() {
                warn!("[{}] {}", program, line);
            }

            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        }
        None => {
            let _ = child.kill();
            let _ = child.wait();
            // Readers are left detached; a surviving grandchild may still hold the pipes
            Err(Error::CommandTimeout {
                command: spec.display(),
                seconds: timeout.as_secs(),
            })
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

/// Run `spec` and turn a non-zero exit into an error
pub fn run_checked(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
    let output = run_command(spec, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: spec.display(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
