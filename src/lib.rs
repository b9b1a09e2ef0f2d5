//! Android screen mirroring relay
//!
//! Drives a scrcpy server on an Android device over an `adb reverse` tunnel,
//! demultiplexes its Annex-B video stream into discrete units and fans those
//! units out to any number of live subscribers.
//!
//! ```text
//!   MirrorHub ──► Supervisor ──► DeviceGateway (adb push / reverse / shell)
//!       ▲              │
//!       │              ▼
//!   broadcast ◄── UnitReader ◄── handshake ◄── TcpStream (device dials in)
//! ```
//!
//! The first subscriber starts a session, the last one leaving stops it.
//!
//! # Example
//! ```no_run
//! use droidmirror::{AdbGateway, MirrorConfig, MirrorHub};
//!
//! # async fn example() -> Result<(), droidmirror::StartError> {
//! let hub = MirrorHub::new(AdbGateway::default(), MirrorConfig::default());
//! let mut sub = hub.subscribe_channel().await?;
//! while let Some(unit) = sub.recv().await {
//!     println!("unit: {} bytes", unit.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod hub;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;

pub use config::MirrorConfig;
pub use device::{AdbGateway, CommandOutput, DeviceGateway};
pub use error::{Error, Result, StartError};
pub use hub::{ChannelSink, MediaSink, MirrorHub, SinkId, Subscription};
pub use media::{Demuxer, KeyframeCache, MediaUnit, UnitReader};
pub use protocol::{HandshakeInfo, VideoCodec};
pub use session::SessionPhase;
