//! External process invocation.
//!
//! Every tool the engine shells out to (haproxy, useradd, chpasswd, ssh,
//! replica sync scripts) goes through [`Invocation`], so failures carry the
//! command line and captured output in one error type.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::{debug, trace};

/// Errors from running an external command
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write stdin of '{command}': {source}")]
    Stdin {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {details}")]
    Failed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
        /// stderr if the tool wrote any, stdout otherwise
        details: String,
    },
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A command line to run, with optional stdin
#[derive(Clone)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
    stdin: Option<String>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // stdin may carry passwords
        f.debug_struct("Invocation")
            .field("command", &self.display())
            .field("has_stdin", &self.stdin.is_some())
            .finish()
    }
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Run an opaque operator-supplied command line through `sh -c`
    pub fn shell(command_line: &str) -> Self {
        Self::new("sh").arg("-c").arg(command_line)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Feed this text to the process on stdin
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Command line for logs and error messages (stdin is never shown)
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion, requiring exit code 0
    pub fn run(&self) -> Result<CommandOutput, ProcessError> {
        let command = self.display();
        trace!(command = %command, "Running external command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (self.stdin.as_ref(), child.stdin.take()) {
            if let Err(source) = pipe.write_all(input.as_bytes()) {
                drop(pipe);
                // reap the child so it does not linger as a zombie
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Stdin { command, source });
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        check_output(command, output)
    }

    /// Async variant used by the replica fan-out
    pub async fn run_async(&self) -> Result<CommandOutput, ProcessError> {
        let command = self.display();
        trace!(command = %command, "Running external command (async)");

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        check_output(command, output)
    }
}

fn check_output(command: String, output: Output) -> Result<CommandOutput, ProcessError> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        debug!(command = %command, "External command succeeded");
        return Ok(CommandOutput { stdout, stderr });
    }

    let status = match output.status.code() {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    };
    let details = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };

    Err(ProcessError::Failed {
        command,
        status,
        stdout,
        stderr,
        details,
    })
}
