//! Incremental Annex-B demuxer
//!
//! A unit's end is only known once the next start code has arrived, so the
//! demuxer keeps the unfinished tail between reads:
//!
//! ```text
//!   buf: [00 00 00 01 67 ..][00 00 01 68 ..][00 00 01 65 .. (partial)
//!         └─── emitted ────┘└── emitted ──┘└── retained ───────────
//! ```
//!
//! The emitted sequence does not depend on how the input was chunked.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::nal::{find_start_code, find_start_code_resumed, leading_start_code, START_CODE_4};
use super::unit::MediaUnit;
use crate::error::{Error, Result};
use crate::protocol::VideoCodec;

/// Back-off when a read reports it would block
const WOULD_BLOCK_RETRY: Duration = Duration::from_millis(10);

/// Splits a byte stream into start-code-delimited units
#[derive(Debug)]
pub struct Demuxer {
    codec: VideoCodec,
    buf: BytesMut,
    /// Offset below which the current unit holds no further start code
    scanned: usize,
}

impl Demuxer {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            buf: BytesMut::new(),
            scanned: 0,
        }
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Bytes held waiting for a unit boundary
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed a chunk and collect every unit whose end is now known
    pub fn push(&mut self, data: &[u8]) -> Vec<MediaUnit> {
        self.buf.extend_from_slice(data);

        let mut units = Vec::new();
        while let Some(start_len) = self.align() {
            match find_start_code_resumed(&self.buf, start_len, self.scanned) {
                Some((end, _)) => {
                    let data = self.buf.split_to(end).freeze();
                    units.push(MediaUnit::new(data, start_len, self.codec));
                    self.scanned = 0;
                }
                None => {
                    // A start code straddling the next chunk begins at most 3 bytes back
                    self.scanned = self.buf.len().saturating_sub(START_CODE_4.len() - 1);
                    break;
                }
            }
        }

        units
    }

    /// Emit the trailing unit at end of stream
    pub fn flush(&mut self) -> Option<MediaUnit> {
        let start_len = self.align()?;
        self.scanned = 0;
        if self.buf.len() <= start_len {
            self.buf.clear();
            return None;
        }
        let data = self.buf.split().freeze();
        Some(MediaUnit::new(data, start_len, self.codec))
    }

    /// Make the buffer begin with a start code, dropping leading garbage
    fn align(&mut self) -> Option<usize> {
        if let Some(len) = leading_start_code(&self.buf) {
            return Some(len);
        }

        match find_start_code(&self.buf, 0) {
            Some((pos, len)) => {
                tracing::trace!(skipped = pos, "Dropping bytes before start code");
                self.buf.advance(pos);
                self.scanned = 0;
                Some(len)
            }
            None => {
                // Only a start code prefix can matter here
                let excess = self.buf.len().saturating_sub(START_CODE_4.len() - 1);
                self.buf.advance(excess);
                self.scanned = 0;
                None
            }
        }
    }
}

/// Lazy unit sequence over a connection
///
/// Reads fixed-size chunks and yields units in stream order. Once the peer
/// closes (and the final unit has been returned) it yields `None` forever.
pub struct UnitReader<R> {
    io: R,
    demuxer: Demuxer,
    chunk: Vec<u8>,
    pending: VecDeque<MediaUnit>,
    bytes_read: u64,
    eof: bool,
}

impl<R: AsyncRead + Unpin> UnitReader<R> {
    pub fn new(io: R, codec: VideoCodec, chunk_size: usize) -> Self {
        Self {
            io,
            demuxer: Demuxer::new(codec),
            chunk: vec![0u8; chunk_size.max(1)],
            pending: VecDeque::new(),
            bytes_read: 0,
            eof: false,
        }
    }

    /// Total bytes read from the connection
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Next unit, `Ok(None)` at end of stream
    pub async fn next_unit(&mut self) -> Result<Option<MediaUnit>> {
        loop {
            if let Some(unit) = self.pending.pop_front() {
                return Ok(Some(unit));
            }
            if self.eof {
                return Ok(None);
            }

            match self.io.read(&mut self.chunk).await {
                Ok(0) => {
                    tracing::debug!(
                        buffered = self.demuxer.buffered(),
                        "Video socket closed by peer"
                    );
                    self.eof = true;
                    if let Some(tail) = self.demuxer.flush() {
                        self.pending.push_back(tail);
                    }
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    let units = self.demuxer.push(&self.chunk[..n]);
                    tracing::trace!(bytes = n, units = units.len(), "Chunk demuxed");
                    self.pending.extend(units);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    tokio::time::sleep(WOULD_BLOCK_RETRY).await;
                }
                Err(e) => return Err(Error::StreamIo(e)),
            }
        }
    }
}
