//! Packet framing.
//!
//! Every physical frame is a 3-byte little-endian payload length followed by
//! a 1-byte sequence number. A frame of exactly `MAX_PAYLOAD_LEN` bytes is a
//! continuation; the logical packet ends with the first shorter frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MySqlError, MySqlResult};

/// MySQL packet header: 3-byte length + 1-byte sequence
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 0xff_ffff;

/// One logical protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number of the first frame.
    pub sequence: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// The header byte that identifies the packet kind.
    pub fn header(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn is_ok(&self) -> bool {
        self.header() == Some(0x00)
    }

    pub fn is_err(&self) -> bool {
        self.header() == Some(0xff)
    }

    /// A legacy EOF packet (0xfe, at most 8 payload bytes after the header).
    pub fn is_eof(&self) -> bool {
        self.header() == Some(0xfe) && self.payload.len() < 9
    }

    /// End of a result set: an EOF packet, or an OK packet with the 0xfe
    /// header when CLIENT_DEPRECATE_EOF is negotiated.
    pub fn is_result_set_end(&self) -> bool {
        self.header() == Some(0xfe) && self.payload.len() < MAX_PAYLOAD_LEN
    }
}

/// Splits a byte stream into packets and frames outgoing payloads.
///
/// Holds the sequence counter shared by both directions of one exchange.
#[derive(Debug, Default)]
pub struct PacketCodec {
    sequence: u8,
    /// Payload collected from continuation frames so far.
    partial: Option<(u8, BytesMut)>,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number the next frame (in either direction) must carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Start a new top-level exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Whether continuation frames are buffered without their final frame.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Decode the next complete packet from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; incomplete frames are left
    /// in `src` untouched.
    pub fn decode(&mut self, src: &mut BytesMut) -> MySqlResult<Option<Packet>> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }
            let len = u32::from_le_bytes([src[0], src[1], src[2], 0]) as usize;
            let sequence = src[3];
            if src.len() < HEADER_SIZE + len {
                src.reserve(HEADER_SIZE + len - src.len());
                return Ok(None);
            }
            if sequence != self.sequence {
                return Err(MySqlError::Framing(format!(
                    "packet sequence mismatch: expected {}, got {}",
                    self.sequence, sequence
                )));
            }
            self.sequence = self.sequence.wrapping_add(1);
            src.advance(HEADER_SIZE);
            let chunk = src.split_to(len);

            if len == MAX_PAYLOAD_LEN {
                match &mut self.partial {
                    Some((_, data)) => data.extend_from_slice(&chunk),
                    None => self.partial = Some((sequence, chunk)),
                }
                continue;
            }

            let packet = match self.partial.take() {
                Some((first, mut data)) => {
                    data.extend_from_slice(&chunk);
                    Packet::new(first, data.freeze())
                }
                None => Packet::new(sequence, chunk.freeze()),
            };
            return Ok(Some(packet));
        }
    }

    /// Frame `payload` into `dst`, splitting it as needed.
    pub fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) {
        dst.reserve(payload.len() + HEADER_SIZE * (payload.len() / MAX_PAYLOAD_LEN + 1));
        let mut rest = payload;
        loop {
            let len = rest.len().min(MAX_PAYLOAD_LEN);
            dst.put_uint_le(len as u64, 3);
            dst.put_u8(self.sequence);
            dst.put_slice(&rest[..len]);
            self.sequence = self.sequence.wrapping_add(1);
            rest = &rest[len..];
            // A full frame always needs a successor, even an empty one.
            if len < MAX_PAYLOAD_LEN {
                break;
            }
        }
    }
}
