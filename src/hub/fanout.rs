//! Subscriber set and per-unit delivery

use std::collections::HashMap;
use std::sync::Arc;

use super::sink::{MediaSink, SinkId};
use crate::error::SinkError;
use crate::media::{KeyframeCache, MediaUnit};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sinks that accepted the unit
    pub delivered: usize,
    /// Sinks removed because delivery failed
    pub dropped: usize,
    /// Sinks left afterwards
    pub remaining: usize,
}

/// Current sinks plus the keyframe cache replayed to new ones
///
/// Not synchronized itself; the hub guards it with one lock so membership
/// changes and broadcasts never interleave.
#[derive(Default)]
pub struct FanOut {
    sinks: HashMap<SinkId, Arc<dyn MediaSink>>,
    keyframes: KeyframeCache,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink, first replaying the cached keyframe units if `replay`
    ///
    /// Membership is a set: a sink that is already present keeps its
    /// existing id and is not replayed to again. A failed replay leaves the
    /// sink out.
    pub fn insert(&mut self, id: SinkId, sink: Arc<dyn MediaSink>, replay: bool) -> Result<SinkId, SinkError> {
        if let Some(existing) = self.find(&sink) {
            tracing::debug!(sink = %existing, "Sink already subscribed");
            return Ok(existing);
        }

        if replay {
            for unit in self.keyframes.units() {
                if let Err(e) = sink.deliver(&unit) {
                    tracing::warn!(sink = %id, error = %e, "Keyframe replay failed, sink not added");
                    return Err(e);
                }
            }
            if !self.keyframes.is_empty() {
                tracing::debug!(sink = %id, units = self.keyframes.len(), "Replayed keyframe cache");
            }
        }
        self.sinks.insert(id, sink);
        Ok(id)
    }

    /// Id of `sink` if that same sink object is subscribed
    pub fn find(&self, sink: &Arc<dyn MediaSink>) -> Option<SinkId> {
        let target = Arc::as_ptr(sink) as *const ();
        self.sinks
            .iter()
            .find(|(_, s)| Arc::as_ptr(s) as *const () == target)
            .map(|(id, _)| *id)
    }

    pub fn remove(&mut self, id: SinkId) -> Option<Arc<dyn MediaSink>> {
        self.sinks.remove(&id)
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn keyframes(&self) -> &KeyframeCache {
        &self.keyframes
    }

    /// Deliver `unit` to every sink, dropping the ones that fail
    pub fn broadcast(&mut self, unit: &MediaUnit) -> Delivery {
        if self.keyframes.update(unit) {
            tracing::trace!(
                nal_type = ?unit.nal_type(),
                cached = self.keyframes.len(),
                "Keyframe cache updated"
            );
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sink) in &self.sinks {
            match sink.deliver(unit) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((*id, e)),
            }
        }

        for (id, error) in &failed {
            self.sinks.remove(id);
            tracing::warn!(sink = %id, error = %error, "Dropping subscriber after failed delivery");
        }

        Delivery {
            delivered,
            dropped: failed.len(),
            remaining: self.sinks.len(),
        }
    }

    /// Drop every sink and the cache
    ///
    /// Dropping a channel sink closes it, which its receiver sees as a
    /// disconnection.
    pub fn clear(&mut self) {
        self.sinks.clear();
        self.keyframes.clear();
    }
}
