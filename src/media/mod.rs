//! Media handling
//!
//! This module provides:
//! - Annex-B start code search and NAL classification
//! - Incremental demuxing of the device video stream
//! - Keyframe caching for late joiners

pub mod demux;
pub mod keyframe;
pub mod nal;
pub mod unit;

pub use demux::{Demuxer, UnitReader};
pub use keyframe::KeyframeCache;
pub use nal::UnitKind;
pub use unit::MediaUnit;
