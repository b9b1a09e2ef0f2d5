//! Annex-B start codes and NAL unit classification
//!
//! scrcpy sends raw Annex-B: every unit is introduced by a start code,
//! either `00 00 01` or `00 00 00 01`, with no length prefix.
//!
//! H.264 NAL header (1 byte):
//! ```text
//! +---+-----+---------+
//! | F | NRI |  Type   |
//! | 1 |  2  |    5    |
//! +---+-----+---------+
//! ```
//!
//! H.265 NAL header (2 bytes, type in the first):
//! ```text
//! +---+-------------+-----------+-----+
//! | F |    Type     | LayerId   | TID |
//! | 1 |      6      |     6     |  3  |
//! +---+-------------+-----------+-----+
//! ```

use crate::protocol::VideoCodec;

/// 3-byte start code
pub const START_CODE_3: [u8; 3] = [0x00, 0x00, 0x01];

/// 4-byte start code
pub const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Find the earliest start code at or after `from`
///
/// Returns `(position, start_code_len)`. A 3-byte match preceded by a zero
/// byte (still at or after `from`) is reported as a 4-byte start code.
pub fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    find_start_code_resumed(data, from, from)
}

/// Like [`find_start_code`], but skips straight to `resume` when the bytes
/// between `from` and `resume` are already known to hold no match.
pub(crate) fn find_start_code_resumed(data: &[u8], from: usize, resume: usize) -> Option<(usize, usize)> {
    let resume = resume.max(from);
    let pos = data
        .get(resume..)?
        .windows(3)
        .position(|w| w == START_CODE_3)?
        + resume;

    if pos > from && data[pos - 1] == 0x00 {
        Some((pos - 1, 4))
    } else {
        Some((pos, 3))
    }
}

/// Length of the start code at the very beginning of `data`, if any
pub fn leading_start_code(data: &[u8]) -> Option<usize> {
    if data.starts_with(&START_CODE_4) {
        Some(4)
    } else if data.starts_with(&START_CODE_3) {
        Some(3)
    } else {
        None
    }
}

/// Coarse unit classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    /// Anything a decoder can only use after a keyframe
    Ordinary,
    /// SPS/PPS (and VPS for H.265)
    ParameterSet,
    /// IDR / IRAP slice
    Keyframe,
}

impl UnitKind {
    /// Parameter-set or keyframe class
    pub fn is_keyframe_class(&self) -> bool {
        !matches!(self, UnitKind::Ordinary)
    }
}

/// H.264 IDR slice
pub const AVC_IDR: u8 = 5;

/// H.264 sequence parameter set
pub const AVC_SPS: u8 = 7;

/// H.264 picture parameter set
pub const AVC_PPS: u8 = 8;

/// H.264 NAL unit type field
pub fn avc_nal_type(b: u8) -> u8 {
    b & 0x1F
}

/// H.265 NAL unit type field
pub fn hevc_nal_type(b: u8) -> u8 {
    (b >> 1) & 0x3F
}

/// H.265 VPS/SPS/PPS
pub fn hevc_is_parameter_set(nal_type: u8) -> bool {
    matches!(nal_type, 32..=34)
}

/// H.265 IRAP range (BLA, IDR, CRA)
pub fn hevc_is_keyframe(nal_type: u8) -> bool {
    matches!(nal_type, 16..=21)
}

/// Extract the codec-specific NAL type from the first header byte
///
/// Unknown codec ids use the H.265 layout.
pub fn nal_type(codec: VideoCodec, header: u8) -> u8 {
    match codec {
        VideoCodec::H264 | VideoCodec::Av1 => avc_nal_type(header),
        VideoCodec::H265 | VideoCodec::Unknown(_) => hevc_nal_type(header),
    }
}

/// Classify a unit from the byte right after its start code
pub fn classify(codec: VideoCodec, header: u8) -> UnitKind {
    match codec {
        VideoCodec::H264 => match avc_nal_type(header) {
            AVC_SPS | AVC_PPS => UnitKind::ParameterSet,
            AVC_IDR => UnitKind::Keyframe,
            _ => UnitKind::Ordinary,
        },
        VideoCodec::H265 | VideoCodec::Unknown(_) => {
            let t = hevc_nal_type(header);
            if hevc_is_parameter_set(t) {
                UnitKind::ParameterSet
            } else if hevc_is_keyframe(t) {
                UnitKind::Keyframe
            } else {
                UnitKind::Ordinary
            }
        }
        // OBU headers are not NAL headers
        VideoCodec::Av1 => UnitKind::Ordinary,
    }
}
