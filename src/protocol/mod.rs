//! scrcpy video socket protocol
//!
//! The device sends a fixed 76-byte session header once, then a raw
//! Annex-B byte stream with no further framing:
//!
//! ```text
//! +----------------------+----------+----------+----------+----------------
//! | device name (64, \0) | codec(4) | width(4) | height(4)| 00 00 01 ...
//! +----------------------+----------+----------+----------+----------------
//! ```

pub mod codec;
pub mod handshake;

pub use codec::VideoCodec;
pub use handshake::{read_handshake, HandshakeInfo, HANDSHAKE_SIZE};
