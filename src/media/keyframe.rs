//! Keyframe cache for late-joiner support
//!
//! When a viewer joins a running session it needs:
//! 1. The parameter sets (SPS/PPS, plus VPS for H.265)
//! 2. The most recent keyframe
//!
//! Replaying those lets its decoder start immediately instead of waiting
//! for the next keyframe.

use super::nal::UnitKind;
use super::unit::MediaUnit;

/// Most recent parameter sets and keyframe of the live session
#[derive(Debug, Default)]
pub struct KeyframeCache {
    /// Latest unit per parameter-set type, in first-seen order
    parameter_sets: Vec<(Option<u8>, MediaUnit)>,
    /// Slices of the latest keyframe
    keyframe: Vec<MediaUnit>,
    /// Whether the previous unit was a keyframe slice
    in_keyframe: bool,
}

impl KeyframeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a demuxed unit
    ///
    /// Must see every unit in stream order so consecutive keyframe slices
    /// are grouped. Returns true if the cache changed.
    pub fn update(&mut self, unit: &MediaUnit) -> bool {
        match unit.kind() {
            UnitKind::ParameterSet => {
                self.in_keyframe = false;
                match self
                    .parameter_sets
                    .iter_mut()
                    .find(|(t, _)| *t == unit.nal_type())
                {
                    Some((_, cached)) => *cached = unit.clone(),
                    None => self.parameter_sets.push((unit.nal_type(), unit.clone())),
                }
                true
            }
            UnitKind::Keyframe => {
                if !self.in_keyframe {
                    // Start of a new keyframe replaces the old one
                    self.keyframe.clear();
                }
                self.keyframe.push(unit.clone());
                self.in_keyframe = true;
                true
            }
            UnitKind::Ordinary => {
                self.in_keyframe = false;
                false
            }
        }
    }

    /// Units to replay to a new subscriber: parameter sets, then keyframe
    pub fn units(&self) -> Vec<MediaUnit> {
        self.parameter_sets
            .iter()
            .map(|(_, unit)| unit)
            .chain(self.keyframe.iter())
            .cloned()
            .collect()
    }

    /// Parameter sets and a keyframe are both present
    pub fn is_ready(&self) -> bool {
        !self.parameter_sets.is_empty() && !self.keyframe.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.parameter_sets.is_empty() && self.keyframe.is_empty()
    }

    /// Number of cached units
    pub fn len(&self) -> usize {
        self.parameter_sets.len() + self.keyframe.len()
    }

    /// Cached bytes
    pub fn size(&self) -> usize {
        self.parameter_sets
            .iter()
            .map(|(_, unit)| unit)
            .chain(self.keyframe.iter())
            .map(MediaUnit::len)
            .sum()
    }

    pub fn clear(&mut self) {
        self.parameter_sets.clear();
        self.keyframe.clear();
        self.in_keyframe = false;
    }
}
