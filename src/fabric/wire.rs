//! Transport framing on the TCP stream.
//!
//! # Format
//! ```text
//! +------+-----------+------------+-----------------+
//! | kind | tag (u64) | len (u32)  | payload (len B) |
//! | 1 B  | LE        | LE         |                 |
//! +------+-----------+------------+-----------------+
//! ```
//!
//! The server side of every connection opens with exactly one control
//! frame: `Accept` once an endpoint is created from the request, or `Reject`
//! followed by close. Clients write nothing before reading it.
//!
//! Only the fabric reads these headers; the session layer hands raw buffers in
//! and gets raw buffers out.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::fabric::tag::Tag;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 13;

/// Frame discriminator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Tagged application message.
    Data = 1,
    /// The listener refused this connection; no payload.
    Reject = 2,
    /// The listener admitted this connection; no payload. First frame the
    /// server side writes on an accepted endpoint.
    Accept = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            1 => Ok(FrameKind::Data),
            2 => Ok(FrameKind::Reject),
            3 => Ok(FrameKind::Accept),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

/// Framing violations. Any of them fails the endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("frame of {len} bytes exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },

    #[error("frame header needs 13 bytes, got {0}")]
    ShortHeader(usize),
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub tag: Tag,
    pub len: u32,
}

impl FrameHeader {
    pub fn data(tag: Tag, len: usize) -> Self {
        Self {
            kind: FrameKind::Data,
            tag,
            len: len as u32,
        }
    }

    pub fn reject() -> Self {
        Self {
            kind: FrameKind::Reject,
            tag: Tag(0),
            len: 0,
        }
    }

    pub fn accept() -> Self {
        Self {
            kind: FrameKind::Accept,
            tag: Tag(0),
            len: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.kind as u8;
        LittleEndian::write_u64(&mut out[1..9], self.tag.0);
        LittleEndian::write_u32(&mut out[9..13], self.len);
        out
    }

    /// Decode a header from the first `HEADER_LEN` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::ShortHeader(buf.len()));
        }
        let kind = FrameKind::try_from(buf[0])?;
        Ok(Self {
            kind,
            tag: Tag(LittleEndian::read_u64(&buf[1..9])),
            len: LittleEndian::read_u32(&buf[9..13]),
        })
    }
}

/// A complete frame pulled off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

/// Accumulates stream bytes and yields whole frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is fully buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::decode(&self.buf[..HEADER_LEN])?;
        let len = header.len as usize;
        if len > self.max_len {
            return Err(WireError::TooLarge {
                len,
                max: self.max_len,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(Frame {
            kind: header.kind,
            tag: header.tag,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = FrameHeader::data(Tag(0x0102), 40).encode();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..3], &[0x02, 0x01]);
        assert_eq!(&bytes[9..13], &[40, 0, 0, 0]);
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let mut decoder = FrameDecoder::new(1024);
        let header = FrameHeader::data(Tag(3), 4).encode();

        decoder.extend(&header[..5]);
        assert_eq!(decoder.next_frame(), Ok(None));

        decoder.extend(&header[5..]);
        decoder.extend(&[9, 8]);
        assert_eq!(decoder.next_frame(), Ok(None));

        decoder.extend(&[7, 6, 0xaa]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.tag, Tag(3));
        assert_eq!(frame.payload, vec![9, 8, 7, 6]);
        // The trailing byte stays buffered for the next frame.
        assert_eq!(decoder.buffered(), 1);
    }

    #[test]
    fn test_control_frames_have_no_payload() {
        let mut decoder = FrameDecoder::new(8);
        decoder.extend(&FrameHeader::accept().encode());
        decoder.extend(&FrameHeader::reject().encode());
        assert_eq!(decoder.next_frame().unwrap().unwrap().kind, FrameKind::Accept);
        let reject = decoder.next_frame().unwrap().unwrap();
        assert_eq!(reject.kind, FrameKind::Reject);
        assert!(reject.payload.is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_short_header() {
        assert_eq!(FrameHeader::decode(&[1, 0, 0]), Err(WireError::ShortHeader(3)));
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let mut decoder = FrameDecoder::new(8);
        decoder.extend(&FrameHeader::data(Tag(0), 9).encode());
        assert_eq!(
            decoder.next_frame(),
            Err(WireError::TooLarge { len: 9, max: 8 })
        );
    }

    #[test]
    fn test_decoder_rejects_unknown_kind() {
        let mut decoder = FrameDecoder::new(8);
        let mut header = FrameHeader::reject().encode();
        header[0] = 0x7f;
        decoder.extend(&header);
        assert_eq!(decoder.next_frame(), Err(WireError::UnknownKind(0x7f)));
    }
}
