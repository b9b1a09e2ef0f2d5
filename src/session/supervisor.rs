//! Tunnel and server process supervisor
//!
//! Start sequence (each step tears everything down again on failure):
//!
//! ```text
//! Host                                         Device
//!   |-- adb push scrcpy-server.jar ------------->|
//!   |-- adb reverse localabstract:scrcpy tcp:N ->|
//!   |   bind 127.0.0.1:N                         |
//!   |-- adb shell app_process ... Server ------->|
//!   |   (grace period, check early exit)         |
//!   |<========== device dials tcp:N =============|
//!   |<-- 76-byte session header -----------------|
//!   |<-- Annex-B video ... ----------------------|
//! ```
//!
//! The listener is bound before the server is launched because the server
//! connects out as soon as it starts.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::process::Child;
use tokio::task::JoinHandle;

use super::cancel::StartCancel;
use super::state::SessionState;
use crate::config::MirrorConfig;
use crate::device::DeviceGateway;
use crate::error::{Diagnostics, StartError};
use crate::protocol::{read_handshake, HandshakeInfo};

/// Bound on waiting for a cancelled streaming task
const CANCEL_WAIT: Duration = Duration::from_secs(2);

/// Everything a live session owns on the host and the device
struct ActiveSession {
    state: SessionState,
    tunnel: bool,
    listener: Option<TcpListener>,
    process: Option<Child>,
    task: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn new(state: SessionState) -> Self {
        Self {
            state,
            tunnel: false,
            listener: None,
            process: None,
            task: None,
        }
    }
}

/// The accepted, handshaken video connection of a new session
#[derive(Debug)]
pub struct MediaConnection {
    pub session_id: u64,
    pub info: HandshakeInfo,
    pub stream: TcpStream,
}

/// Owns at most one session and its tunnel, listener, process and task
///
/// Callers serialize access (the hub keeps it behind an async mutex), which
/// makes it the single-session boundary.
pub struct Supervisor<G> {
    gateway: Arc<G>,
    config: Arc<MirrorConfig>,
    session: Option<ActiveSession>,
    next_session_id: u64,
}

impl<G: DeviceGateway> Supervisor<G> {
    pub fn new(gateway: Arc<G>, config: Arc<MirrorConfig>) -> Self {
        Self {
            gateway,
            config,
            session: None,
            next_session_id: 1,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.state.id)
    }

    /// Bookkeeping of the live session
    pub fn state(&self) -> Option<&SessionState> {
        self.session.as_ref().map(|s| &s.state)
    }

    /// Bring a session up on `device`
    ///
    /// Returns `Ok(None)` without relaunching if a session is already live.
    /// Cancelling `cancel` abandons the start at its next suspension point
    /// and tears down whatever was already set up.
    pub async fn start(
        &mut self,
        device: &str,
        cancel: &StartCancel,
    ) -> Result<Option<MediaConnection>, StartError> {
        if let Some(session) = &self.session {
            tracing::debug!(session_id = session.state.id, "Session already running");
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(StartError::Cancelled);
        }

        let id = self.next_session_id;
        self.next_session_id += 1;

        tracing::info!(session_id = id, device = %device, "Starting mirroring session");

        let mut session = ActiveSession::new(SessionState::new(id, device, self.config.local_port));
        let launched = tokio::select! {
            result = self.launch(&mut session) => result,
            _ = cancel.cancelled() => Err(StartError::Cancelled),
        };
        match launched {
            Ok((stream, info)) => {
                session.state.on_handshake(info.clone());
                self.session = Some(session);
                Ok(Some(MediaConnection {
                    session_id: id,
                    info,
                    stream,
                }))
            }
            Err(StartError::Cancelled) => {
                tracing::info!(session_id = id, device = %device, "Session start cancelled");
                self.teardown(session).await;
                Err(StartError::Cancelled)
            }
            Err(e) => {
                tracing::error!(session_id = id, device = %device, error = %e, "Session start failed");
                self.teardown(session).await;
                Err(e)
            }
        }
    }

    /// Hand the streaming task of `session_id` to the supervisor
    ///
    /// The task is aborted immediately if that session is no longer live.
    pub fn attach_task(&mut self, session_id: u64, task: JoinHandle<()>) {
        match &mut self.session {
            Some(session) if session.state.id == session_id => session.task = Some(task),
            _ => {
                tracing::debug!(session_id = session_id, "Aborting task of stale session");
                task.abort();
            }
        }
    }

    /// Tear the live session down; a no-op when idle
    pub async fn stop(&mut self) {
        match self.session.take() {
            Some(session) => self.teardown(session).await,
            None => tracing::debug!("Stop requested with no active session"),
        }
    }

    async fn launch(&self, session: &mut ActiveSession) -> Result<(TcpStream, HandshakeInfo), StartError> {
        let config = &self.config;
        let serial = session.state.device.clone();

        if !config.server_path.is_file() {
            return Err(StartError::ResourceMissing(config.server_path.clone()));
        }

        let push = self
            .gateway
            .push(&serial, &config.server_path, &config.remote_path)
            .await?;
        if !push.success() {
            return Err(StartError::PushFailed {
                code: push.code,
                stderr: push.stderr,
            });
        }
        tracing::info!(
            device = %serial,
            remote = %config.remote_path,
            output = %push.stdout.trim(),
            "Server pushed"
        );
        self.log_remote_listing(&serial).await;

        let reverse = self
            .gateway
            .reverse(&serial, &config.socket_name, config.local_port)
            .await?;
        if !reverse.success() {
            return Err(StartError::TunnelFailed {
                code: reverse.code,
                stderr: reverse.stderr,
            });
        }
        session.tunnel = true;
        tracing::info!(
            device = %serial,
            socket = %config.socket_name,
            port = config.local_port,
            "Reverse tunnel established"
        );

        let listener = TcpListener::bind(config.bind_addr())
            .await
            .map_err(|source| StartError::BindFailed {
                port: config.local_port,
                source,
            })?;
        tracing::debug!(addr = %config.bind_addr(), "Listening for device connection");
        session.listener = Some(listener);

        let command = config.launch_command();
        tracing::info!(device = %serial, command = %command, "Launching server");
        session.process = Some(self.gateway.spawn_shell(&serial, &command)?);

        tokio::time::sleep(config.startup_grace).await;
        if let Some(process) = session.process.as_mut() {
            if process.try_wait()?.is_some() {
                let diagnostics = self.collect_diagnostics(session).await;
                tracing::error!(%diagnostics, "Server exited immediately");
                return Err(StartError::ServerExitedEarly(diagnostics));
            }
        }

        let accepted = match &session.listener {
            Some(listener) => tokio::time::timeout(config.accept_timeout, listener.accept()).await,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed").into()),
        };
        let mut stream = match accepted {
            Ok(Ok((stream, peer))) => {
                tracing::info!(peer = %peer, "Device connected");
                stream
            }
            Ok(Err(e)) => return Err(StartError::Gateway(e)),
            Err(_) => {
                let diagnostics = self.collect_diagnostics(session).await;
                tracing::error!(
                    timeout_ms = config.accept_timeout.as_millis() as u64,
                    %diagnostics,
                    "Device did not connect"
                );
                return Err(StartError::AcceptTimeout(diagnostics));
            }
        };
        session.state.on_connected();

        // Single-connection protocol
        session.listener = None;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let info = read_handshake(&mut stream, config.handshake_timeout).await?;
        tracing::info!(
            session_id = session.state.id,
            device_name = %info.device_name,
            codec = %info.codec(),
            width = info.width,
            height = info.height,
            "Handshake complete"
        );

        Ok((stream, info))
    }

    async fn log_remote_listing(&self, serial: &str) {
        match self
            .gateway
            .shell(serial, &["ls", "-l", self.config.remote_path.as_str()])
            .await
        {
            Ok(out) if out.success() => {
                tracing::debug!(listing = %out.stdout.trim(), "Remote server file")
            }
            Ok(out) => tracing::warn!(stderr = %out.stderr.trim(), "Failed to list remote server file"),
            Err(e) => tracing::warn!(error = %e, "Failed to list remote server file"),
        }
    }

    /// Gather process output and device process listing for operators
    async fn collect_diagnostics(&self, session: &mut ActiveSession) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();

        if let Some(mut process) = session.process.take() {
            match process.try_wait() {
                Ok(Some(_)) => {
                    match tokio::time::timeout(self.config.command_timeout, process.wait_with_output()).await {
                        Ok(Ok(output)) => {
                            diagnostics.exit_code = output.status.code();
                            diagnostics.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                            diagnostics.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                        }
                        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to collect server output"),
                        Err(_) => tracing::warn!("Timed out collecting server output"),
                    }
                }
                // Still running, keep it for teardown
                _ => session.process = Some(process),
            }
        }

        let serial = session.state.device.as_str();
        match self.gateway.shell(serial, &["ps", "-A"]).await {
            Ok(out) if out.success() => {
                diagnostics.device_processes = out
                    .stdout
                    .lines()
                    .filter(|line| line.contains("app_process") || line.to_lowercase().contains("scrcpy"))
                    .map(|line| line.trim().to_string())
                    .collect();
                if diagnostics.device_processes.is_empty() {
                    tracing::warn!(device = %serial, "No app_process or scrcpy process on device");
                }
            }
            Ok(out) => tracing::warn!(stderr = %out.stderr.trim(), "Device process listing failed"),
            Err(e) => tracing::warn!(error = %e, "Device process listing failed"),
        }

        // pgrep is missing on older devices
        if let Ok(out) = self.gateway.shell(serial, &["pgrep", "-f", "app_process"]).await {
            if out.success() && !out.stdout.trim().is_empty() {
                tracing::info!(pids = %out.stdout.trim(), "app_process PIDs on device");
            }
        }

        diagnostics
    }

    /// Release everything the session holds, logging but never failing
    async fn teardown(&self, mut session: ActiveSession) {
        let id = session.state.id;
        let mut failures = 0usize;

        if let Some(task) = session.task.take() {
            task.abort();
            match tokio::time::timeout(CANCEL_WAIT, task).await {
                Ok(Err(e)) if e.is_panic() => {
                    failures += 1;
                    tracing::warn!(session_id = id, "Streaming task panicked");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(session_id = id, "Streaming task did not stop in time");
                }
                _ => {}
            }
        }

        // Dropping the listener closes it
        session.listener.take();

        if let Some(mut process) = session.process.take() {
            if let Err(e) = terminate(&mut process, self.config.terminate_timeout).await {
                failures += 1;
                tracing::warn!(session_id = id, error = %e, "Failed to stop server process");
            }
        }

        if session.tunnel {
            match self
                .gateway
                .remove_reverse(&session.state.device, &self.config.socket_name)
                .await
            {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    failures += 1;
                    tracing::warn!(session_id = id, stderr = %out.stderr.trim(), "Failed to remove reverse tunnel");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(session_id = id, error = %e, "Failed to remove reverse tunnel");
                }
            }
        }

        tracing::info!(
            session_id = id,
            duration_ms = session.state.duration().as_millis() as u64,
            failures = failures,
            "Session stopped"
        );
    }
}

/// Ask the process to exit, then kill it after `grace`
async fn terminate(process: &mut Child, grace: Duration) -> io::Result<()> {
    if process.try_wait()?.is_some() {
        return Ok(());
    }

    if !send_terminate(process) {
        return process.kill().await;
    }

    match tokio::time::timeout(grace, process.wait()).await {
        Ok(status) => status.map(|_| ()),
        Err(_) => {
            tracing::debug!("Server process ignored terminate, killing");
            process.kill().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(process: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match process.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn send_terminate(_process: &Child) -> bool {
    false
}
