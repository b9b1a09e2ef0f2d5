//! Subscriber sinks

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::media::MediaUnit;

/// Hub-assigned subscriber identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub(crate) u64);

impl SinkId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Consumer of media units
///
/// `deliver` is called with the fan-out lock held, so it must not block.
/// Any error removes the sink from the hub.
pub trait MediaSink: Send + Sync {
    fn deliver(&self, unit: &MediaUnit) -> Result<(), SinkError>;
}

impl<F> MediaSink for F
where
    F: Fn(&MediaUnit) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(&self, unit: &MediaUnit) -> Result<(), SinkError> {
        self(unit)
    }
}

/// Sink backed by a bounded channel of raw unit bytes
///
/// A consumer that falls `capacity` units behind is dropped rather than
/// slowing the others.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl MediaSink for ChannelSink {
    fn deliver(&self, unit: &MediaUnit) -> Result<(), SinkError> {
        self.tx.try_send(unit.data().clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Receiving end of a channel subscription
///
/// Yields one buffer per unit, start code included. `recv` returns `None`
/// once the hub disconnects the subscriber (session ended or sink dropped).
#[derive(Debug)]
pub struct Subscription {
    id: SinkId,
    rx: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub(crate) fn new(id: SinkId, rx: mpsc::Receiver<Bytes>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}
