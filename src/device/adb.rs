//! `adb` command-line gateway

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::{CommandOutput, DeviceGateway};

/// Gateway that shells out to the `adb` binary
#[derive(Debug, Clone)]
pub struct AdbGateway {
    adb: PathBuf,
    serial: Option<String>,
    command_timeout: Duration,
}

impl Default for AdbGateway {
    fn default() -> Self {
        Self::new("adb")
    }
}

impl AdbGateway {
    /// Use a specific adb executable
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self {
            adb: adb.into(),
            serial: None,
            command_timeout: Duration::from_secs(30),
        }
    }

    /// Prefer a bundled adb if one of the candidates exists, else `adb` on PATH
    pub fn detect<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        match candidates.into_iter().find(|p| p.as_ref().is_file()) {
            Some(path) => {
                tracing::info!(adb = %path.as_ref().display(), "Using bundled adb");
                Self::new(path.as_ref())
            }
            None => Self::default(),
        }
    }

    /// Pin the target device
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Bound on each adb invocation
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    fn command(&self, serial: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> io::Result<CommandOutput> {
        match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(output) => Ok(output?.into()),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("adb command timed out after {:?}", self.command_timeout),
            )),
        }
    }

    /// List `(serial, state)` pairs from `adb devices`
    pub async fn devices(&self) -> io::Result<Vec<(String, String)>> {
        let mut cmd = self.command(None);
        cmd.arg("devices");
        let output = self.run(cmd).await?;
        Ok(parse_devices(&output.stdout))
    }
}

/// Parse `adb devices` output
pub fn parse_devices(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some((serial.to_string(), state.to_string()))
        })
        .collect()
}

impl DeviceGateway for AdbGateway {
    async fn current_device(&self) -> Option<String> {
        if let Some(serial) = &self.serial {
            return Some(serial.clone());
        }

        match self.devices().await {
            Ok(devices) => devices
                .into_iter()
                .find(|(_, state)| state == "device")
                .map(|(serial, _)| serial),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list adb devices");
                None
            }
        }
    }

    async fn push(&self, serial: &str, local: &Path, remote: &str) -> io::Result<CommandOutput> {
        let mut cmd = self.command(Some(serial));
        cmd.arg("push").arg(local).arg(remote);
        self.run(cmd).await
    }

    async fn shell(&self, serial: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let mut cmd = self.command(Some(serial));
        cmd.arg("shell").args(args);
        self.run(cmd).await
    }

    fn spawn_shell(&self, serial: &str, command: &str) -> io::Result<Child> {
        let mut cmd = self.command(Some(serial));
        cmd.arg("shell")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn()
    }

    async fn reverse(&self, serial: &str, socket_name: &str, local_port: u16) -> io::Result<CommandOutput> {
        let mut cmd = self.command(Some(serial));
        cmd.arg("reverse")
            .arg(format!("localabstract:{}", socket_name))
            .arg(format!("tcp:{}", local_port));
        self.run(cmd).await
    }

    async fn remove_reverse(&self, serial: &str, socket_name: &str) -> io::Result<CommandOutput> {
        let mut cmd = self.command(Some(serial));
        cmd.arg("reverse")
            .arg("--remove")
            .arg(format!("localabstract:{}", socket_name));
        self.run(cmd).await
    }
}
