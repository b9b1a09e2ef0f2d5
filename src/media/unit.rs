//! Demuxed media units

use bytes::Bytes;

use super::nal::{self, UnitKind};
use crate::protocol::VideoCodec;

/// One start-code-delimited access unit
///
/// Cheap to clone: the payload is reference counted, so every subscriber
/// shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUnit {
    data: Bytes,
    start_code_len: usize,
    nal_type: Option<u8>,
    kind: UnitKind,
}

impl MediaUnit {
    /// Build a unit from raw bytes that begin with a start code
    pub fn new(data: Bytes, start_code_len: usize, codec: VideoCodec) -> Self {
        let header = data.get(start_code_len).copied();
        Self {
            nal_type: header.map(|b| nal::nal_type(codec, b)),
            kind: header.map_or(UnitKind::Ordinary, |b| nal::classify(codec, b)),
            data,
            start_code_len,
        }
    }

    /// Raw bytes including the start code
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume into the raw bytes
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Bytes after the start code
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start_code_len..]
    }

    pub fn start_code_len(&self) -> usize {
        self.start_code_len
    }

    /// Codec-specific NAL type, if the unit has a header byte
    pub fn nal_type(&self) -> Option<u8> {
        self.nal_type
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Parameter-set or keyframe class
    pub fn is_keyframe_class(&self) -> bool {
        self.kind.is_keyframe_class()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_idr() {
        let unit = MediaUnit::new(
            Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88, 0x84]),
            4,
            VideoCodec::H264,
        );

        assert_eq!(unit.nal_type(), Some(5));
        assert_eq!(unit.kind(), UnitKind::Keyframe);
        assert!(unit.is_keyframe_class());
        assert_eq!(unit.payload(), &[0x65, 0x88, 0x84]);
        assert_eq!(unit.len(), 7);
    }

    #[test]
    fn test_unit_without_header() {
        let unit = MediaUnit::new(Bytes::from_static(&[0, 0, 1]), 3, VideoCodec::H264);

        assert_eq!(unit.nal_type(), None);
        assert_eq!(unit.kind(), UnitKind::Ordinary);
        assert!(unit.payload().is_empty());
    }
}
