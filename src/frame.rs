//! Dual-mode frame decoder (C1).
//!
//! Parses inbound bytes into [`InboundFrame::Line`] frames, intrinsically
//! switching to [`InboundFrame::Chunk`] mode when it observes a `BDAT <n>`
//! line go by -- unless BDAT auto-detection has been suppressed (during
//! DATA ingestion, since a data line may itself start with the literal
//! text `BDAT`). The mode switch lives entirely inside the decoder so a
//! `BDAT` line and its chunk bytes arriving in the same TCP segment can
//! never race with an out-of-band signal from the dispatcher.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;
use crate::reply::Reply;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// One CRLF-terminated command/data line, CRLF stripped. 8-bit
    /// preserving: arbitrary octets round-trip because we never require
    /// the bytes to be valid UTF-8.
    Line(BytesMut),
    /// Exactly N raw bytes for a BDAT chunk.
    Chunk(BytesMut),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Line,
    Chunk(u64),
}

/// The frame decoder. One instance per connection; state is not shared.
#[derive(Debug)]
pub struct FrameCodec {
    mode: Mode,
    max_line_length: usize,
    max_chunk_size: u64,
    suppress_bdat_detection: bool,
}

impl FrameCodec {
    #[must_use]
    pub fn new(max_line_length: usize, max_chunk_size: u64) -> Self {
        FrameCodec {
            mode: Mode::Line,
            max_line_length,
            max_chunk_size,
            suppress_bdat_detection: false,
        }
    }

    /// One-bit mode signal the DATA interpreter flips while reading a
    /// DATA body, so a body line starting with `BDAT` is never mistaken
    /// for a chunked-transfer command (§4.1/§4.4).
    pub fn set_suppress_bdat_detection(&mut self, suppress: bool) {
        self.suppress_bdat_detection = suppress;
    }

    #[must_use]
    pub const fn is_chunking(&self) -> bool {
        matches!(self.mode, Mode::Chunk(_))
    }

    fn maybe_enter_chunk_mode(&mut self, line: &[u8]) -> Result<(), FrameError> {
        if self.suppress_bdat_detection {
            return Ok(());
        }
        let Some(size) = parse_bdat_size(line) else {
            return Ok(());
        };
        if size > self.max_chunk_size {
            return Err(FrameError::ChunkTooLarge { size, max: self.max_chunk_size });
        }
        self.mode = Mode::Chunk(size);
        Ok(())
    }
}

/// Recognize a `BDAT <n> ...` line case-insensitively and extract `n`.
/// Returns `None` for anything else, including a bare `BDAT` with no size.
fn parse_bdat_size(line: &[u8]) -> Option<u64> {
    if line.len() < 5 {
        return None;
    }
    if !line[..4].eq_ignore_ascii_case(b"BDAT") {
        return None;
    }
    if !line[4].is_ascii_whitespace() {
        return None;
    }
    let rest = &line[5..];
    let digits_end = rest.iter().position(|b| !b.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    std::str::from_utf8(&rest[..digits_end]).ok()?.parse::<u64>().ok()
}

impl Decoder for FrameCodec {
    type Item = InboundFrame;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.mode {
            Mode::Line => {
                let Some(lf_pos) = buf.iter().position(|b| *b == b'\n') else {
                    if buf.len() > self.max_line_length {
                        return Err(FrameError::LineTooLong { max: self.max_line_length });
                    }
                    return Ok(None);
                };

                let content_len = if lf_pos > 0 && buf[lf_pos - 1] == b'\r' { lf_pos - 1 } else { lf_pos };
                if content_len > self.max_line_length {
                    return Err(FrameError::LineTooLong { max: self.max_line_length });
                }

                let mut line = buf.split_to(lf_pos + 1);
                line.truncate(line.len() - 1); // drop LF
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }

                self.maybe_enter_chunk_mode(&line)?;

                Ok(Some(InboundFrame::Line(line)))
            }
            Mode::Chunk(n) => {
                let n = usize::try_from(n).unwrap_or(usize::MAX);
                if buf.len() < n {
                    return Ok(None);
                }
                let chunk = buf.split_to(n);
                self.mode = Mode::Line;
                Ok(Some(InboundFrame::Chunk(chunk)))
            }
        }
    }
}

impl Encoder<Reply> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = item.to_string();
        dst.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

/// Encoder for writing raw already-framed reply bytes (used when flushing
/// a pre-formatted greeting or the `220` that precedes a STARTTLS upgrade).
impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item);
        Ok(())
    }
}

pub(crate) fn advance_past(buf: &mut BytesMut, n: usize) {
    buf.advance(n);
}
