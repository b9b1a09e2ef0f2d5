//! Video codec identifiers

use std::fmt;

/// Codec announced in the session header
///
/// scrcpy encodes the codec as four ASCII bytes read as a big-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// `h264`
    H264,
    /// `h265`
    H265,
    /// `\0av1`
    Av1,
    /// Anything else
    Unknown(u32),
}

impl VideoCodec {
    pub const H264_ID: u32 = 0x6832_3634;
    pub const H265_ID: u32 = 0x6832_3635;
    pub const AV1_ID: u32 = 0x0061_7631;

    pub fn from_id(id: [u8; 4]) -> Self {
        match u32::from_be_bytes(id) {
            Self::H264_ID => VideoCodec::H264,
            Self::H265_ID => VideoCodec::H265,
            Self::AV1_ID => VideoCodec::Av1,
            other => VideoCodec::Unknown(other),
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            VideoCodec::H264 => Self::H264_ID,
            VideoCodec::H265 => Self::H265_ID,
            VideoCodec::Av1 => Self::AV1_ID,
            VideoCodec::Unknown(id) => *id,
        }
    }

    /// Value for the server's `video_codec=` launch option
    pub fn option_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 | VideoCodec::Unknown(_) => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Av1 => "av1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::Unknown(id) => write!(f, "unknown(0x{:08x})", id),
            known => f.write_str(known.option_name()),
        }
    }
}
