//! Mirroring hub implementation
//!
//! Owns the supervisor and the subscriber set. Lock order is always
//! supervisor (async) before fan-out (sync); the fan-out lock is never held
//! across an await. The supervisor lock is held for a whole start, so
//! `stop` and `unsubscribe` cancel the start before waiting on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::fanout::{Delivery, FanOut};
use super::sink::{ChannelSink, MediaSink, SinkId, Subscription};
use crate::config::MirrorConfig;
use crate::device::DeviceGateway;
use crate::error::StartError;
use crate::media::{MediaUnit, UnitReader};
use crate::protocol::{HandshakeInfo, VideoCodec};
use crate::session::{SessionPhase, StartCancel, Supervisor};
use crate::stats::{MirrorStats, StatsSnapshot};

struct Inner<G> {
    config: Arc<MirrorConfig>,
    gateway: Arc<G>,
    supervisor: AsyncMutex<Supervisor<G>>,
    fanout: Mutex<FanOut>,
    phase: watch::Sender<SessionPhase>,
    info: Mutex<Option<HandshakeInfo>>,
    /// Cancellation of the start currently holding the supervisor
    starting: Mutex<Option<StartCancel>>,
    next_sink_id: AtomicU64,
    stats: MirrorStats,
}

/// Fan-out hub driving one mirroring session
///
/// The first subscriber starts the session; the last one leaving stops it.
/// Cheap to clone; clones share the same session.
pub struct MirrorHub<G> {
    inner: Arc<Inner<G>>,
}

impl<G> Clone for MirrorHub<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: DeviceGateway> MirrorHub<G> {
    pub fn new(gateway: G, config: MirrorConfig) -> Self {
        let gateway = Arc::new(gateway);
        let config = Arc::new(config);
        let (phase, _) = watch::channel(SessionPhase::Idle);

        Self {
            inner: Arc::new(Inner {
                supervisor: AsyncMutex::new(Supervisor::new(Arc::clone(&gateway), Arc::clone(&config))),
                config,
                gateway,
                fanout: Mutex::new(FanOut::new()),
                phase,
                info: Mutex::new(None),
                starting: Mutex::new(None),
                next_sink_id: AtomicU64::new(1),
                stats: MirrorStats::new(),
            }),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &G {
        &self.inner.gateway
    }

    /// Register a sink, starting the session if none is running
    ///
    /// A sink joining a live session first receives the cached parameter
    /// sets and keyframe; if that replay fails the sink is not kept and
    /// `StartError::Replay` is returned. Subscribing a sink that is already
    /// present returns its existing id. Start failures are returned to this
    /// caller and the sink is not kept.
    ///
    /// The start runs on its own task. Dropping this future or calling
    /// [`stop`](Self::stop) cancels it, and everything it set up is torn
    /// down before the hub goes back to idle.
    pub async fn subscribe(&self, sink: Arc<dyn MediaSink>) -> Result<SinkId, StartError> {
        let id = SinkId(self.inner.next_sink_id.fetch_add(1, Ordering::Relaxed));
        let cancel = StartCancel::new();
        let guard = cancel.drop_guard();

        let task = tokio::spawn(self.clone().join(id, sink, cancel));
        let result = match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(StartError::Cancelled),
        };

        guard.disarm();
        result
    }

    async fn join(self, id: SinkId, sink: Arc<dyn MediaSink>, cancel: StartCancel) -> Result<SinkId, StartError> {
        let mut sup = self.inner.supervisor.lock().await;
        if cancel.is_cancelled() {
            return Err(StartError::Cancelled);
        }

        if sup.is_running() {
            let joined = self.fanout().insert(id, sink, true);
            return match joined {
                Ok(joined) => {
                    tracing::info!(sink = %joined, subscribers = self.subscriber_count(), "Subscriber added");
                    Ok(joined)
                }
                Err(e) => Err(StartError::Replay(e)),
            };
        }

        self.set_phase(SessionPhase::Starting);
        let inserted = self.fanout().insert(id, sink, false);
        if let Err(e) = inserted {
            self.set_phase(SessionPhase::Idle);
            return Err(StartError::Replay(e));
        }
        *self.lock_starting() = Some(cancel.clone());

        let started = match self.inner.gateway.current_device().await {
            Some(device) => sup.start(&device, &cancel).await,
            None => Err(StartError::NoDevice),
        };
        *self.lock_starting() = None;

        match started {
            Ok(Some(conn)) => {
                let codec = conn.info.codec();
                *self.lock_info() = Some(conn.info);
                self.inner.stats.session_started();

                let task = tokio::spawn(self.clone().run_stream(conn.session_id, codec, conn.stream));
                sup.attach_task(conn.session_id, task);
                self.set_phase(SessionPhase::Streaming);

                tracing::info!(sink = %id, session_id = conn.session_id, "First subscriber, session streaming");
                Ok(id)
            }
            Ok(None) => Ok(id),
            Err(e) => {
                self.fanout().remove(id);
                self.set_phase(SessionPhase::Idle);
                Err(e)
            }
        }
    }

    /// Subscribe a bounded channel sink sized by the config
    pub async fn subscribe_channel(&self) -> Result<Subscription, StartError> {
        let (sink, rx) = ChannelSink::new(self.inner.config.sink_capacity);
        let id = self.subscribe(Arc::new(sink)).await?;
        Ok(Subscription::new(id, rx))
    }

    /// Remove a sink; stops the session if it was the last one
    ///
    /// A start still in progress for that sink is cancelled rather than
    /// waited out.
    pub async fn unsubscribe(&self, id: SinkId) {
        let remaining = {
            let mut fanout = self.fanout();
            if fanout.remove(id).is_none() {
                tracing::debug!(sink = %id, "Unsubscribe of unknown sink");
                return;
            }
            fanout.len()
        };
        tracing::info!(sink = %id, subscribers = remaining, "Subscriber removed");

        if remaining == 0 {
            self.cancel_start();
            let mut sup = self.inner.supervisor.lock().await;
            // Someone may have joined while we waited for the lock
            if self.subscriber_count() == 0 {
                self.stop_locked(&mut sup).await;
            }
        }
    }

    /// Stop the session and disconnect every subscriber
    ///
    /// Safe to call at any time; a no-op when idle. A start in progress is
    /// cancelled and its subscriber gets `StartError::Cancelled`.
    pub async fn stop(&self) {
        self.cancel_start();
        let mut sup = self.inner.supervisor.lock().await;
        self.stop_locked(&mut sup).await;
    }

    fn cancel_start(&self) {
        let starting = self.lock_starting().clone();
        if let Some(cancel) = starting {
            tracing::debug!("Cancelling session start in progress");
            cancel.cancel();
        }
    }

    /// Deliver one unit to every current subscriber
    pub fn broadcast(&self, unit: &MediaUnit) -> Delivery {
        let delivery = self.fanout().broadcast(unit);

        self.inner.stats.record_unit(unit);
        if delivery.dropped > 0 {
            self.inner.stats.record_dropped_sinks(delivery.dropped);
        }
        tracing::trace!(
            len = unit.len(),
            nal_type = ?unit.nal_type(),
            delivered = delivery.delivered,
            "Unit broadcast"
        );

        delivery
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    /// Receiver notified on every phase change
    pub fn phase_updates(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase.subscribe()
    }

    /// Header of the live session
    pub fn handshake_info(&self) -> Option<HandshakeInfo> {
        self.lock_info().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.fanout().len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    async fn stop_locked(&self, sup: &mut Supervisor<G>) {
        if !sup.is_running() {
            // With the lock held no start is in flight
            if self.phase() != SessionPhase::Idle {
                self.fanout().clear();
                self.set_phase(SessionPhase::Idle);
            }
            return;
        }

        self.set_phase(SessionPhase::Stopping);
        sup.stop().await;

        let disconnected = {
            let mut fanout = self.fanout();
            let n = fanout.len();
            fanout.clear();
            n
        };
        *self.lock_info() = None;
        self.inner.stats.session_ended();
        self.set_phase(SessionPhase::Idle);

        if disconnected > 0 {
            tracing::info!(subscribers = disconnected, "Subscribers disconnected");
        }
    }

    /// Streaming task: demux and broadcast until the stream ends
    async fn run_stream(self, session_id: u64, codec: VideoCodec, stream: TcpStream) {
        let mut reader = UnitReader::new(stream, codec, self.inner.config.read_chunk_size);

        loop {
            match reader.next_unit().await {
                Ok(Some(unit)) => {
                    let delivery = self.broadcast(&unit);
                    if delivery.dropped > 0 && delivery.remaining == 0 {
                        tracing::info!(session_id = session_id, "Last subscriber dropped");
                        tokio::spawn(self.clone().stop_if_idle(session_id));
                    }
                }
                Ok(None) => {
                    tracing::info!(
                        session_id = session_id,
                        bytes = reader.bytes_read(),
                        "Device closed video stream"
                    );
                    break;
                }
                Err(e) => {
                    tracing::error!(session_id = session_id, error = %e, "Video stream failed");
                    break;
                }
            }
        }

        // Stopping aborts this task, so it runs elsewhere
        tokio::spawn(self.end_session(session_id));
    }

    async fn stop_if_idle(self, session_id: u64) {
        let mut sup = self.inner.supervisor.lock().await;
        if sup.session_id() == Some(session_id) && self.subscriber_count() == 0 {
            self.stop_locked(&mut sup).await;
        }
    }

    async fn end_session(self, session_id: u64) {
        let mut sup = self.inner.supervisor.lock().await;
        if sup.session_id() == Some(session_id) {
            self.stop_locked(&mut sup).await;
        }
    }

    fn set_phase(&self, next: SessionPhase) {
        let prev = self.inner.phase.send_replace(next);
        if prev != next {
            if !prev.can_transition_to(next) {
                tracing::warn!(from = ?prev, to = ?next, "Unexpected phase transition");
            }
            tracing::debug!(from = ?prev, to = ?next, "Phase changed");
        }
    }

    fn fanout(&self) -> MutexGuard<'_, FanOut> {
        self.inner.fanout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_starting(&self) -> MutexGuard<'_, Option<StartCancel>> {
        self.inner.starting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_info(&self) -> MutexGuard<'_, Option<HandshakeInfo>> {
        self.inner.info.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::device::mock::{free_port, test_config, MockGateway, MockServer};
    use crate::protocol::handshake::encode_header;
    use std::time::Duration;
    use tokio::time::timeout;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE, 0x3C];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84];
    const P: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A];
    const AUD: &[u8] = &[0, 0, 0, 1, 0x09, 0x10];

    fn stream(units: &[&[u8]]) -> Vec<u8> {
        let mut payload = encode_header("Pixel 7", *b"h264", 1080, 2400);
        for unit in units {
            payload.extend_from_slice(unit);
        }
        payload
    }

    fn hub(gateway: &MockGateway) -> MirrorHub<MockGateway> {
        MirrorHub::new(gateway.clone(), test_config(free_port()))
    }

    async fn next(sub: &mut Subscription) -> Option<bytes::Bytes> {
        timeout(Duration::from_secs(5), sub.recv()).await.unwrap()
    }

    #[tokio::test]
    async fn test_units_arrive_in_order() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[SPS, PPS, IDR, P, AUD]),
            close: false,
        });
        let hub = hub(&gateway);

        let mut sub = hub.subscribe_channel().await.unwrap();
        assert_eq!(hub.phase(), SessionPhase::Streaming);
        assert_eq!(hub.handshake_info().map(|i| i.device_name), Some("Pixel 7".into()));

        // AUD stays buffered until the next boundary
        for expected in [SPS, PPS, IDR, P] {
            assert_eq!(next(&mut sub).await.unwrap(), expected);
        }

        hub.stop().await;
        assert_eq!(next(&mut sub).await, None);
        assert_eq!(hub.phase(), SessionPhase::Idle);
        assert_eq!(hub.stats().units, 4);
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_starts_once() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[]),
            close: false,
        });
        let hub = hub(&gateway);

        let (a, b) = tokio::join!(hub.subscribe_channel(), hub.subscribe_channel());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.id(), b.id());
        assert_eq!(gateway.spawns(), 1);
        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(hub.stats().sessions_started, 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn test_last_unsubscribe_stops_once() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[]),
            close: false,
        });
        let hub = hub(&gateway);

        let a = hub.subscribe_channel().await.unwrap();
        let b = hub.subscribe_channel().await.unwrap();

        hub.unsubscribe(a.id()).await;
        assert_eq!(gateway.removals(), 0);
        assert_eq!(hub.phase(), SessionPhase::Streaming);

        hub.unsubscribe(b.id()).await;
        assert_eq!(gateway.removals(), 1);
        assert_eq!(hub.phase(), SessionPhase::Idle);

        hub.stop().await;
        hub.stop().await;
        hub.unsubscribe(b.id()).await;
        assert_eq!(gateway.removals(), 1);
    }

    #[tokio::test]
    async fn test_late_joiner_receives_keyframe_cache() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[SPS, PPS, IDR, P, P, AUD]),
            close: false,
        });
        let hub = hub(&gateway);

        let mut first = hub.subscribe_channel().await.unwrap();
        for _ in 0..5 {
            next(&mut first).await.unwrap();
        }

        let mut late = hub.subscribe_channel().await.unwrap();
        assert_eq!(late.try_recv().unwrap(), SPS);
        assert_eq!(late.try_recv().unwrap(), PPS);
        assert_eq!(late.try_recv().unwrap(), IDR);
        assert!(late.try_recv().is_none());
        assert_eq!(gateway.spawns(), 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn test_end_of_stream_disconnects_subscribers() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[IDR, P]),
            close: true,
        });
        let hub = hub(&gateway);
        let mut phases = hub.phase_updates();

        let mut sub = hub.subscribe_channel().await.unwrap();

        // Final unit is flushed at end of stream
        assert_eq!(next(&mut sub).await.unwrap(), IDR);
        assert_eq!(next(&mut sub).await.unwrap(), P);
        assert_eq!(next(&mut sub).await, None);

        timeout(Duration::from_secs(5), phases.wait_for(|p| *p == SessionPhase::Idle))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gateway.removals(), 1);
        assert!(hub.handshake_info().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_stops_session() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[SPS, PPS, IDR]),
            close: false,
        });
        let hub = hub(&gateway);
        let mut phases = hub.phase_updates();

        let sub = hub.subscribe_channel().await.unwrap();
        drop(sub);

        timeout(Duration::from_secs(5), phases.wait_for(|p| *p == SessionPhase::Idle))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gateway.removals(), 1);
        assert_eq!(hub.stats().sinks_dropped, 1);
    }

    #[tokio::test]
    async fn test_abandoned_subscribe_releases_session() {
        let gateway = MockGateway::new(MockServer::NeverConnects);
        let hub = hub(&gateway);
        let mut phases = hub.phase_updates();

        let pending = timeout(Duration::from_millis(400), hub.subscribe_channel()).await;
        assert!(pending.is_err());

        timeout(Duration::from_secs(2), phases.wait_for(|p| *p == SessionPhase::Idle))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gateway.removals(), 1);
        assert_eq!(hub.subscriber_count(), 0);

        timeout(Duration::from_millis(500), hub.stop()).await.unwrap();
        assert_eq!(gateway.removals(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_start_in_progress() {
        let gateway = MockGateway::new(MockServer::NeverConnects);
        let hub = hub(&gateway);

        let pending = tokio::spawn({
            let hub = hub.clone();
            async move { hub.subscribe_channel().await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hub.phase(), SessionPhase::Starting);

        let began = std::time::Instant::now();
        hub.stop().await;
        assert!(began.elapsed() < Duration::from_secs(1));

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, StartError::Cancelled));
        assert_eq!(gateway.removals(), 1);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_same_sink_subscribed_once() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[]),
            close: false,
        });
        let hub = hub(&gateway);

        let (sink, _rx) = ChannelSink::new(8);
        let sink: Arc<dyn MediaSink> = Arc::new(sink);
        let first = hub.subscribe(Arc::clone(&sink)).await.unwrap();
        let second = hub.subscribe(sink).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(hub.subscriber_count(), 1);

        hub.unsubscribe(first).await;
        assert_eq!(gateway.removals(), 1);
        assert_eq!(hub.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_replay_is_reported() {
        let gateway = MockGateway::new(MockServer::Streams {
            payload: stream(&[SPS, PPS, IDR, P]),
            close: false,
        });
        let hub = hub(&gateway);

        let mut first = hub.subscribe_channel().await.unwrap();
        for _ in 0..3 {
            next(&mut first).await.unwrap();
        }

        // Three cached units cannot fit in one slot
        let (tiny, _rx) = ChannelSink::new(1);
        let err = hub.subscribe(Arc::new(tiny)).await.unwrap_err();
        assert!(matches!(err, StartError::Replay(crate::error::SinkError::Full)));
        assert_eq!(hub.subscriber_count(), 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn test_start_failure_propagates() {
        let gateway = MockGateway::failing_push();
        let hub = hub(&gateway);

        let err = hub.subscribe_channel().await.unwrap_err();
        assert!(matches!(err, StartError::PushFailed { .. }));
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_no_device() {
        let gateway = MockGateway::without_device();
        let hub = hub(&gateway);

        let err = hub.subscribe_channel().await.unwrap_err();
        assert!(matches!(err, StartError::NoDevice));
        assert!(gateway.calls().is_empty());
        assert_eq!(hub.phase(), SessionPhase::Idle);
    }
}
