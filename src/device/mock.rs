//! Recording gateway for tests
//!
//! Spawns real local processes in place of the device server and can play
//! the device side of the video socket by dialing the local listener.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use super::{CommandOutput, DeviceGateway};
use crate::config::MirrorConfig;

/// A recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Push { local: PathBuf, remote: String },
    Shell(Vec<String>),
    Spawn(String),
    Reverse { socket_name: String, port: u16 },
    RemoveReverse(String),
}

/// How the fake device server behaves once launched
#[derive(Debug, Clone)]
pub enum MockServer {
    /// Process exits with an error right away
    ExitsImmediately,
    /// Process keeps running but never dials in
    NeverConnects,
    /// Dials in and writes `payload`; closes afterwards if `close`
    Streams { payload: Vec<u8>, close: bool },
}

#[derive(Debug)]
struct MockState {
    device: Option<String>,
    push_code: i32,
    reverse_code: i32,
    server: MockServer,
    calls: Mutex<Vec<Call>>,
    port: Mutex<Option<u16>>,
}

/// Recording, cloneable gateway
#[derive(Debug, Clone)]
pub struct MockGateway {
    state: Arc<MockState>,
}

impl MockGateway {
    pub fn new(server: MockServer) -> Self {
        Self::build(Some("emulator-5554".into()), 0, 0, server)
    }

    pub fn without_device() -> Self {
        Self::build(None, 0, 0, MockServer::NeverConnects)
    }

    pub fn failing_push() -> Self {
        Self::build(Some("emulator-5554".into()), 1, 0, MockServer::NeverConnects)
    }

    pub fn failing_reverse() -> Self {
        Self::build(Some("emulator-5554".into()), 0, 1, MockServer::NeverConnects)
    }

    fn build(device: Option<String>, push_code: i32, reverse_code: i32, server: MockServer) -> Self {
        Self {
            state: Arc::new(MockState {
                device,
                push_code,
                reverse_code,
                server,
                calls: Mutex::new(Vec::new()),
                port: Mutex::new(None),
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn spawns(&self) -> usize {
        self.count(|c| matches!(c, Call::Spawn(_)))
    }

    pub fn reverses(&self) -> usize {
        self.count(|c| matches!(c, Call::Reverse { .. }))
    }

    pub fn removals(&self) -> usize {
        self.count(|c| matches!(c, Call::RemoveReverse(_)))
    }

    fn record(&self, call: Call) {
        self.state.calls.lock().unwrap().push(call);
    }
}

impl DeviceGateway for MockGateway {
    async fn current_device(&self) -> Option<String> {
        self.state.device.clone()
    }

    async fn push(&self, _serial: &str, local: &Path, remote: &str) -> io::Result<CommandOutput> {
        self.record(Call::Push {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        Ok(match self.state.push_code {
            0 => CommandOutput::ok("1 file pushed"),
            code => CommandOutput::failed(code, "adb: error: failed to copy"),
        })
    }

    async fn shell(&self, _serial: &str, args: &[&str]) -> io::Result<CommandOutput> {
        self.record(Call::Shell(args.iter().map(|a| a.to_string()).collect()));
        Ok(match args.first() {
            Some(&"ps") => CommandOutput::ok(
                "USER PID PPID NAME\n\
                 root 1 0 init\n\
                 shell 4242 4200 app_process\n",
            ),
            Some(&"pgrep") => CommandOutput::ok("4242\n"),
            _ => CommandOutput::ok(""),
        })
    }

    fn spawn_shell(&self, _serial: &str, command: &str) -> io::Result<Child> {
        self.record(Call::Spawn(command.to_string()));

        let mut cmd = match &self.state.server {
            MockServer::ExitsImmediately => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg("echo 'server aborted' >&2; exit 1");
                cmd
            }
            MockServer::NeverConnects | MockServer::Streams { .. } => {
                let mut cmd = Command::new("sleep");
                cmd.arg("30");
                cmd
            }
        };
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let MockServer::Streams { payload, close } = &self.state.server {
            let port = self.state.port.lock().unwrap().unwrap_or_default();
            tokio::spawn(fake_device(port, payload.clone(), *close));
        }

        Ok(child)
    }

    async fn reverse(&self, _serial: &str, socket_name: &str, local_port: u16) -> io::Result<CommandOutput> {
        self.record(Call::Reverse {
            socket_name: socket_name.to_string(),
            port: local_port,
        });
        *self.state.port.lock().unwrap() = Some(local_port);
        Ok(match self.state.reverse_code {
            0 => CommandOutput::ok(""),
            code => CommandOutput::failed(code, "adb: error: cannot bind listener"),
        })
    }

    async fn remove_reverse(&self, _serial: &str, socket_name: &str) -> io::Result<CommandOutput> {
        self.record(Call::RemoveReverse(socket_name.to_string()));
        Ok(CommandOutput::ok(""))
    }
}

/// Device side of the video socket
async fn fake_device(port: u16, payload: Vec<u8>, close: bool) {
    let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)).await else {
        return;
    };
    if stream.write_all(&payload).await.is_err() {
        return;
    }
    if close {
        let _ = stream.shutdown().await;
        return;
    }
    // Hold the connection until the host closes it
    let mut buf = [0u8; 1];
    let _ = stream.read(&mut buf).await;
}

/// An unused local port
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config with a real server resource file and short timeouts
pub fn test_config(port: u16) -> MirrorConfig {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "droidmirror-server-{}-{}.jar",
        std::process::id(),
        n
    ));
    std::fs::write(&path, b"fake scrcpy server").unwrap();

    MirrorConfig::with_server(path)
        .local_port(port)
        .startup_grace(std::time::Duration::from_millis(100))
        .accept_timeout(std::time::Duration::from_secs(3))
        .handshake_timeout(std::time::Duration::from_secs(3))
        .terminate_timeout(std::time::Duration::from_secs(1))
}
