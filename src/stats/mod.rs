//! Mirroring statistics

pub mod metrics;

pub use metrics::{MirrorStats, StatsSnapshot};
