//! Mirroring configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::VideoCodec;

/// Default abstract socket name the scrcpy server dials
pub const DEFAULT_SOCKET_NAME: &str = "scrcpy";

/// Default local port the reverse tunnel targets
pub const DEFAULT_LOCAL_PORT: u16 = 27183;

/// Version baked into the bundled `scrcpy-server.jar`
pub const DEFAULT_SERVER_VERSION: &str = "3.3";

/// Session configuration options
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Local path of the scrcpy server resource
    pub server_path: PathBuf,

    /// Where the server is pushed on the device
    pub remote_path: String,

    /// Device-side abstract socket name for the reverse tunnel
    pub socket_name: String,

    /// Local TCP port the tunnel maps to
    pub local_port: u16,

    /// Host the local listener binds to
    pub bind_host: String,

    /// Protocol version; must match the pushed server
    pub server_version: String,

    /// Server log level
    pub log_level: String,

    /// Encoder bit rate in bits/sec
    pub video_bit_rate: u32,

    /// Frame rate cap
    pub max_fps: u32,

    /// Requested video codec
    pub video_codec: VideoCodec,

    /// Longest screen dimension cap (None = native)
    pub max_size: Option<u32>,

    /// Keep the device awake while mirroring
    pub stay_awake: bool,

    /// How long to wait before checking the server did not exit immediately
    pub startup_grace: Duration,

    /// How long to wait for the device to dial in
    pub accept_timeout: Duration,

    /// Total time allowed for the session header
    pub handshake_timeout: Duration,

    /// Socket read chunk size for the demuxer
    pub read_chunk_size: usize,

    /// Grace period between terminate and kill on teardown
    pub terminate_timeout: Duration,

    /// Bound on collecting an exited server's output for diagnostics
    ///
    /// Gateway commands carry their own timeout, see
    /// [`AdbGateway::command_timeout`](crate::device::AdbGateway::command_timeout).
    pub command_timeout: Duration,

    /// Queue depth for channel-backed subscribers
    pub sink_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            server_path: PathBuf::from("resources/scrcpy-server.jar"),
            remote_path: "/data/local/tmp/scrcpy-server.jar".into(),
            socket_name: DEFAULT_SOCKET_NAME.into(),
            local_port: DEFAULT_LOCAL_PORT,
            bind_host: "127.0.0.1".into(),
            server_version: DEFAULT_SERVER_VERSION.into(),
            log_level: "info".into(),
            video_bit_rate: 2_000_000,
            max_fps: 30,
            video_codec: VideoCodec::H264,
            max_size: None,
            stay_awake: true,
            startup_grace: Duration::from_millis(500),
            accept_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            read_chunk_size: 64 * 1024, // 64KB
            terminate_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(30),
            sink_capacity: 256,
        }
    }
}

impl MirrorConfig {
    /// Create a config for a specific server resource
    pub fn with_server(path: impl Into<PathBuf>) -> Self {
        Self {
            server_path: path.into(),
            ..Default::default()
        }
    }

    /// Use the first existing candidate as the server resource
    ///
    /// Keeps the current path if none exist, so the start step still
    /// reports it as missing.
    pub fn locate_server<I, P>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        if let Some(found) = candidates.into_iter().find(|p| p.as_ref().is_file()) {
            self.server_path = found.as_ref().to_path_buf();
        } else {
            tracing::warn!(path = %self.server_path.display(), "No server resource candidate found");
        }
        self
    }

    /// Set the local tunnel port
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Set the device socket name
    pub fn socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = name.into();
        self
    }

    /// Set the server protocol version
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Set the video codec
    pub fn video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = codec;
        self
    }

    /// Set the bit rate
    pub fn video_bit_rate(mut self, bit_rate: u32) -> Self {
        self.video_bit_rate = bit_rate;
        self
    }

    /// Set the frame rate cap
    pub fn max_fps(mut self, fps: u32) -> Self {
        self.max_fps = fps;
        self
    }

    /// Cap the longest screen dimension
    pub fn max_size(mut self, size: u32) -> Self {
        self.max_size = Some(size);
        self
    }

    /// Set startup grace period
    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Set accept timeout
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set terminate grace period
    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Set subscriber queue depth
    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity.max(1);
        self
    }

    /// Address string for the local listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.local_port)
    }

    /// Shell command that launches the server on the device
    pub fn launch_command(&self) -> String {
        let mut cmd = format!(
            "CLASSPATH={} app_process / com.genymobile.scrcpy.Server {} \
             log_level={} video_bit_rate={} max_fps={} video_codec={} \
             tunnel_forward=false audio=false control=false stay_awake={}",
            self.remote_path,
            self.server_version,
            self.log_level,
            self.video_bit_rate,
            self.max_fps,
            self.video_codec.option_name(),
            self.stay_awake,
        );
        if let Some(size) = self.max_size {
            cmd.push_str(&format!(" max_size={}", size));
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();

        assert_eq!(config.local_port, DEFAULT_LOCAL_PORT);
        assert_eq!(config.socket_name, "scrcpy");
        assert_eq!(config.server_version, "3.3");
        assert_eq!(config.read_chunk_size, 65536);
        assert_eq!(config.accept_timeout, Duration::from_secs(10));
        assert_eq!(config.startup_grace, Duration::from_millis(500));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.bind_addr(), "127.0.0.1:27183");
    }

    #[test]
    fn test_launch_command() {
        let cmd = MirrorConfig::default().launch_command();

        assert!(cmd.starts_with("CLASSPATH=/data/local/tmp/scrcpy-server.jar app_process /"));
        assert!(cmd.contains("com.genymobile.scrcpy.Server 3.3 "));
        assert!(cmd.contains("tunnel_forward=false"));
        assert!(cmd.contains("audio=false"));
        assert!(cmd.contains("control=false"));
        assert!(cmd.contains("video_codec=h264"));
        assert!(!cmd.contains("max_size"));
    }

    #[test]
    fn test_launch_command_options() {
        let cmd = MirrorConfig::default()
            .server_version("3.1")
            .video_codec(VideoCodec::H265)
            .max_size(1024)
            .max_fps(60)
            .launch_command();

        assert!(cmd.contains("Server 3.1 "));
        assert!(cmd.contains("video_codec=h265"));
        assert!(cmd.contains("max_fps=60"));
        assert!(cmd.ends_with(" max_size=1024"));
    }

    #[test]
    fn test_builder_chaining() {
        let config = MirrorConfig::with_server("/opt/scrcpy-server.jar")
            .local_port(27200)
            .socket_name("mirror")
            .accept_timeout(Duration::from_secs(3))
            .handshake_timeout(Duration::from_secs(2))
            .sink_capacity(0);

        assert_eq!(config.server_path, PathBuf::from("/opt/scrcpy-server.jar"));
        assert_eq!(config.local_port, 27200);
        assert_eq!(config.socket_name, "mirror");
        assert_eq!(config.accept_timeout, Duration::from_secs(3));
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.sink_capacity, 1);
    }

    #[test]
    fn test_locate_server() {
        let dir = std::env::temp_dir().join(format!("droidmirror-locate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let jar = dir.join("scrcpy-server.jar");
        std::fs::write(&jar, b"jar").unwrap();

        let config = MirrorConfig::default().locate_server([dir.join("missing.jar"), jar.clone()]);
        assert_eq!(config.server_path, jar);

        let config = MirrorConfig::default().locate_server([dir.join("missing.jar")]);
        assert_eq!(config.server_path, PathBuf::from("resources/scrcpy-server.jar"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
