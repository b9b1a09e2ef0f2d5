//! Fan-out hub
//!
//! Distributes demuxed units to live subscribers and ties the session
//! lifecycle to subscriber count.
//!
//! ```text
//!                      MirrorHub (Arc<Inner>)
//!               ┌───────────────────────────────┐
//!               │ supervisor: Mutex<Supervisor> │
//!               │ fanout: Mutex<FanOut {        │
//!               │   sinks, keyframe cache }>    │
//!               └───────────────┬───────────────┘
//!                               │
//!   UnitReader ──► broadcast() ─┼──► sink.deliver() ──► viewer
//!                               ├──► sink.deliver() ──► viewer
//!                               └──► sink.deliver() ──► viewer
//! ```
//!
//! Units are `bytes::Bytes`, so every subscriber shares one allocation.
//! Delivery never waits: a sink that fails (closed or full) is removed.

pub mod fanout;
pub mod sink;
pub mod store;

pub use fanout::{Delivery, FanOut};
pub use sink::{ChannelSink, MediaSink, SinkId, Subscription};
pub use store::MirrorHub;
