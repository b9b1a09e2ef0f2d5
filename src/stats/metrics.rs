//! Statistics for mirroring sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::media::MediaUnit;

/// Live counters, updated from the streaming task
#[derive(Debug, Default)]
pub struct MirrorStats {
    units: AtomicU64,
    keyframe_units: AtomicU64,
    bytes: AtomicU64,
    session_bytes: AtomicU64,
    sinks_dropped: AtomicU64,
    sessions_started: AtomicU64,
    streaming_since: Mutex<Option<Instant>>,
}

impl MirrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one broadcast unit
    pub fn record_unit(&self, unit: &MediaUnit) {
        self.units.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(unit.len() as u64, Ordering::Relaxed);
        self.session_bytes.fetch_add(unit.len() as u64, Ordering::Relaxed);
        if unit.is_keyframe_class() {
            self.keyframe_units.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dropped_sinks(&self, count: usize) {
        self.sinks_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Mark a session as streaming
    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.session_bytes.store(0, Ordering::Relaxed);
        *self.lock_since() = Some(Instant::now());
    }

    pub fn session_ended(&self) {
        *self.lock_since() = None;
    }

    fn lock_since(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.streaming_since
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            units: self.units.load(Ordering::Relaxed),
            keyframe_units: self.keyframe_units.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            session_bytes: self.session_bytes.load(Ordering::Relaxed),
            sinks_dropped: self.sinks_dropped.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            streaming_for: self.lock_since().map(|t| t.elapsed()),
        }
    }
}

/// Counters at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Units broadcast since creation
    pub units: u64,
    /// Parameter-set and keyframe units among them
    pub keyframe_units: u64,
    /// Bytes broadcast, start codes included
    pub bytes: u64,
    /// Bytes broadcast since the current session started
    pub session_bytes: u64,
    /// Subscribers removed after a failed delivery
    pub sinks_dropped: u64,
    /// Sessions that reached streaming
    pub sessions_started: u64,
    /// Age of the current session, if one is streaming
    pub streaming_for: Option<Duration>,
}

impl StatsSnapshot {
    /// Average bitrate of the current session in bits per second
    pub fn bitrate(&self) -> u64 {
        match self.streaming_for.map(|d| d.as_secs()) {
            Some(secs) if secs > 0 => (self.session_bytes * 8) / secs,
            _ => 0,
        }
    }
}
