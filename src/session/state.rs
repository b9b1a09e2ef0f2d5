//! Session state machine
//!
//! ```text
//!   Idle ──► Starting ──► Streaming ──► Stopping ──► Idle
//!              │                                      ▲
//!              └──────────── (start failed) ──────────┘
//! ```

use std::time::{Duration, Instant};

use crate::protocol::HandshakeInfo;

/// Mirroring session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionPhase {
    /// No session
    #[default]
    Idle,
    /// Tunnel, server launch, accept and handshake in progress
    Starting,
    /// Units are being demuxed and broadcast
    Streaming,
    /// Teardown in progress
    Stopping,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of this phase
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Streaming)
                | (Starting, Idle)
                | (Starting, Stopping)
                | (Streaming, Stopping)
                | (Stopping, Idle)
        )
    }

    /// Whether a session currently holds device resources
    pub fn is_active(self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }
}

/// Bookkeeping for one mirroring run
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Target device serial
    pub device: String,

    /// Local port the tunnel targets
    pub local_port: u16,

    /// When start began
    pub started_at: Instant,

    /// When the device connection was accepted
    pub connected_at: Option<Instant>,

    /// Session header, once read
    pub info: Option<HandshakeInfo>,
}

impl SessionState {
    pub fn new(id: u64, device: impl Into<String>, local_port: u16) -> Self {
        Self {
            id,
            device: device.into(),
            local_port,
            started_at: Instant::now(),
            connected_at: None,
            info: None,
        }
    }

    /// Record the accepted device connection
    pub fn on_connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    /// Record the session header
    pub fn on_handshake(&mut self, info: HandshakeInfo) {
        self.info = Some(info);
    }

    /// Time since start began
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time from start to the device dialing in
    pub fn connect_latency(&self) -> Option<Duration> {
        self.connected_at.map(|t| t.duration_since(self.started_at))
    }
}
