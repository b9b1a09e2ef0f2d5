//! Device command gateway
//!
//! The mirroring core only needs a handful of device operations: push a
//! file, run a shell command, spawn a long-running shell command, and
//! manage a reverse tunnel. They may be slow (USB or network adb), so every
//! call is async and never blocks the runtime.

use std::future::Future;
use std::io;
use std::path::Path;

use tokio::process::Child;

pub mod adb;
#[cfg(test)]
pub(crate) mod mock;

pub use adb::AdbGateway;

/// Result of a finished device command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful exit with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed exit with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Operations the supervisor performs against a device
///
/// `Err` means the command could not be run at all; a command that ran and
/// failed is an `Ok` with a non-zero [`CommandOutput::code`].
pub trait DeviceGateway: Send + Sync + 'static {
    /// Serial of the device to mirror, if one is selected
    fn current_device(&self) -> impl Future<Output = Option<String>> + Send;

    /// Copy a local file to the device
    fn push(
        &self,
        serial: &str,
        local: &Path,
        remote: &str,
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;

    /// Run a shell command to completion
    fn shell(
        &self,
        serial: &str,
        args: &[&str],
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;

    /// Start a long-running shell command without waiting for it
    ///
    /// The child must have piped stdout/stderr so diagnostics can be
    /// collected if it exits early.
    fn spawn_shell(&self, serial: &str, command: &str) -> io::Result<Child>;

    /// Map the device abstract socket `socket_name` to local `tcp:port`
    fn reverse(
        &self,
        serial: &str,
        socket_name: &str,
        local_port: u16,
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;

    /// Remove a reverse mapping
    fn remove_reverse(
        &self,
        serial: &str,
        socket_name: &str,
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        assert!(CommandOutput::ok("pushed").success());
        assert!(!CommandOutput::failed(1, "no device").success());
        assert!(!CommandOutput::default().success());
    }
}
