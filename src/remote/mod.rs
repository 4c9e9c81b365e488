// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

pub mod key;
pub mod ssh;

#[cfg(test)]
pub(crate) mod fake;

use std::time::Duration;

use crate::error::Result;
use crate::model::Host;

pub use ssh::SshShell;

/// Exit status and captured output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CommandOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        CommandOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Decode raw streams. Invalid UTF-8 is replaced, never an error, so a
    /// half-written file reads as garbage text instead of a broken transport.
    pub fn from_bytes(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> Self {
        CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The command's own explanation: stderr, else stdout, else the exit code
    pub fn message(&self) -> String {
        let err = self.stderr.trim();
        if !err.is_empty() {
            return err.to_string();
        }
        let out = self.stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        format!("Exit code {}", self.exit_code)
    }
}

/// Connect and command budgets for remote sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(10),
            command: Duration::from_secs(30),
        }
    }
}

/// Opens sessions to remote hosts. One attempt per call, no retries.
pub trait RemoteShell: Send + Sync {
    /// Fails with `FipError::Connection` for any reason the session cannot be
    /// established within `timeout` (unreachable, refused, bad credentials).
    fn connect(&self, host: &Host, timeout: Duration) -> Result<Box<dyn ShellSession>>;
}

/// An open session, reusable for several sequential commands
pub trait ShellSession: Send {
    /// Fails with `FipError::Execution` when the command outlives `timeout`
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    fn close(self: Box<Self>);
}

/// Run `f` against a fresh session and close it on every exit path
pub fn with_session<T, F>(shell: &dyn RemoteShell, host: &Host, timeouts: Timeouts, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn ShellSession) -> Result<T>,
{
    let mut session = shell.connect(host, timeouts.connect)?;
    let result = f(session.as_mut());
    session.close();
    result
}

/// Connect, run a single command, close
pub fn execute(
    shell: &dyn RemoteShell,
    host: &Host,
    command: &str,
    timeouts: Timeouts,
) -> Result<CommandOutput> {
    with_session(shell, host, timeouts, |session| session.exec(command, timeouts.command))
}
