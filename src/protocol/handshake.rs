//! Session header ("device meta") parsing
//!
//! Sent exactly once per connection, before any video data:
//!
//! ```text
//! offset  size  field
//!      0    64  device name, UTF-8, NUL padded
//!     64     4  codec id
//!     68     4  width  (u32, big-endian)
//!     72     4  height (u32, big-endian)
//! ```
//!
//! Each field is read with an exact-length read. A peer that closes early
//! fails the handshake; the whole sequence is bounded by one timeout.

use std::io;
use std::time::Duration;

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::HandshakeError;
use crate::protocol::codec::VideoCodec;

/// Length of the NUL-padded device name
pub const DEVICE_NAME_SIZE: usize = 64;

/// Total header size
pub const HANDSHAKE_SIZE: usize = DEVICE_NAME_SIZE + 4 + 4 + 4;

/// Immutable session information read from the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Device-reported name with padding stripped
    pub device_name: String,
    /// Raw codec id bytes
    pub codec_id: [u8; 4],
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl HandshakeInfo {
    /// Parse a complete header
    pub fn parse(header: &[u8; HANDSHAKE_SIZE]) -> Self {
        let mut buf = &header[..];

        let device_name = decode_name(&buf[..DEVICE_NAME_SIZE]);
        buf.advance(DEVICE_NAME_SIZE);

        let mut codec_id = [0u8; 4];
        buf.copy_to_slice(&mut codec_id);

        let width = buf.get_u32();
        let height = buf.get_u32();

        Self {
            device_name,
            codec_id,
            width,
            height,
        }
    }

    /// Codec derived from the codec id
    pub fn codec(&self) -> VideoCodec {
        VideoCodec::from_id(self.codec_id)
    }
}

/// Decode the name field, dropping NUL padding and invalid UTF-8
fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end])
        .replace(char::REPLACEMENT_CHARACTER, "")
        .trim()
        .to_string()
}

/// Read the session header from a freshly accepted connection
pub async fn read_handshake<R>(reader: &mut R, timeout: Duration) -> Result<HandshakeInfo, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_fields(reader)).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

async fn read_fields<R>(reader: &mut R) -> Result<HandshakeInfo, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HANDSHAKE_SIZE];
    let (name, rest) = header.split_at_mut(DEVICE_NAME_SIZE);
    let (codec, rest) = rest.split_at_mut(4);
    let (width, height) = rest.split_at_mut(4);

    recv_exact(reader, name, "device name").await?;
    recv_exact(reader, codec, "codec id").await?;
    recv_exact(reader, width, "width").await?;
    recv_exact(reader, height, "height").await?;

    Ok(HandshakeInfo::parse(&header))
}

async fn recv_exact<R>(reader: &mut R, buf: &mut [u8], field: &'static str) -> Result<(), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(HandshakeError::ConnectionClosed {
            field,
            wanted: buf.len(),
        }),
        Err(e) => Err(HandshakeError::Io(e)),
    }
}

#[cfg(test)]
pub(crate) fn encode_header(name: &str, codec_id: [u8; 4], width: u32, height: u32) -> Vec<u8> {
    let mut header = vec![0u8; DEVICE_NAME_SIZE];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header.extend_from_slice(&codec_id);
    header.extend_from_slice(&width.to_be_bytes());
    header.extend_from_slice(&height.to_be_bytes());
    header
}
