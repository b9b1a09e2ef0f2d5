//! Error types
//!
//! `StartError` covers everything that can abort a session start. Once a
//! session is streaming, failures are reported as `Error::StreamIo` and end
//! the session; per-sink failures (`SinkError`) only drop that sink.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a running session
#[derive(Error, Debug)]
pub enum Error {
    /// Fatal socket failure while streaming
    #[error("stream I/O error: {0}")]
    StreamIo(#[source] io::Error),
}

/// Failure while bringing a mirroring session up
///
/// Every variant is produced after the partially started session has been
/// torn down again.
#[derive(Error, Debug)]
pub enum StartError {
    /// The gateway has no device selected
    #[error("no target device selected")]
    NoDevice,

    /// The scrcpy server resource is not present locally
    #[error("server resource missing: {}", .0.display())]
    ResourceMissing(PathBuf),

    /// `adb push` exited non-zero
    #[error("push to device failed (exit {code:?}): {stderr}")]
    PushFailed { code: Option<i32>, stderr: String },

    /// `adb reverse` exited non-zero
    #[error("reverse tunnel failed (exit {code:?}): {stderr}")]
    TunnelFailed { code: Option<i32>, stderr: String },

    /// The local listening port could not be bound
    #[error("failed to bind local port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The device-side server exited during the startup grace period
    #[error("server exited early: {0}")]
    ServerExitedEarly(Diagnostics),

    /// The device never dialed the local listener
    #[error("timed out waiting for device connection: {0}")]
    AcceptTimeout(Diagnostics),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The start was abandoned by its caller or by a stop
    #[error("session start cancelled")]
    Cancelled,

    /// A subscriber joining a live session could not take the keyframe replay
    #[error("keyframe replay to new subscriber failed: {0}")]
    Replay(#[source] SinkError),

    /// The gateway could not run a command at all
    #[error("device gateway error: {0}")]
    Gateway(#[from] io::Error),
}

/// Session header read failure
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The header was not complete within the handshake timeout
    #[error("handshake timed out")]
    Timeout,

    /// The peer closed before the requested length was satisfied
    #[error("connection closed during handshake (wanted {wanted} bytes for {field})")]
    ConnectionClosed { field: &'static str, wanted: usize },

    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
}

/// Per-sink delivery failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The consumer went away
    #[error("sink closed")]
    Closed,

    /// The consumer is not keeping up
    #[error("sink full")]
    Full,
}

/// Operator diagnostics attached to start failures
///
/// Never drives control flow, only reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Exit code of the launch process, if it exited
    pub exit_code: Option<i32>,
    /// Captured stdout of the launch process
    pub stdout: String,
    /// Captured stderr of the launch process
    pub stderr: String,
    /// Matching lines from the device process listing
    pub device_processes: Vec<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {}", code)?,
            None => write!(f, "process running")?,
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "; stderr: {}", self.stderr.trim())?;
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "; stdout: {}", self.stdout.trim())?;
        }
        if !self.device_processes.is_empty() {
            write!(f, "; device processes: [{}]", self.device_processes.join(" | "))?;
        }
        Ok(())
    }
}
