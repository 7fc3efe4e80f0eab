//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (sequence number, frame type, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input or an unknown frame type.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Frame Type   |              Payload ...                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 5 bytes.
//! The payload runs to the end of the datagram; there is no length field.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 5;

/// Largest datagram the channel is assumed to carry without fragmentation.
pub const DEFAULT_MTU: usize = 1472;

/// Largest payload that fits into one frame at [`DEFAULT_MTU`].
pub const MAX_PAYLOAD_SIZE: usize = DEFAULT_MTU - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_TYPE: usize = 4;

/// Largest payload that fits into one frame for a channel with the given MTU.
///
/// Returns `0` when the MTU cannot even hold a header.
pub fn max_payload(mtu: usize) -> usize {
    mtu.saturating_sub(HEADER_LEN)
}

/// Frame type carried in the one-byte type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Application fragment.
    Data = 0,
    /// Acknowledgement echoing the sequence number of a DATA or FIN frame.
    Ack = 1,
    /// Sender has no more data and wants to tear the session down.
    Fin = 2,
}

impl TryFrom<u8> for FrameType {
    type Error = PacketError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Data),
            1 => Ok(Self::Ack),
            2 => Ok(Self::Fin),
            other => Err(PacketError::UnknownFrameType(other)),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Data => "DATA",
            Self::Ack => "ACK",
            Self::Fin => "FIN",
        };
        f.write_str(name)
    }
}

/// A complete protocol datagram: header fields + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number of the fragment (DATA), the acknowledged frame (ACK),
    /// or the final marker (FIN).
    pub seq: u32,
    pub kind: FrameType,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a DATA frame carrying `payload`.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            seq,
            kind: FrameType::Data,
            payload,
        }
    }

    /// Build a pure ACK echoing `seq`.
    pub fn ack(seq: u32) -> Self {
        Self {
            seq,
            kind: FrameType::Ack,
            payload: Vec::new(),
        }
    }

    /// Build a FIN carrying the sender's final sequence number.
    pub fn fin(seq: u32) -> Self {
        Self {
            seq,
            kind: FrameType::Fin,
            payload: Vec::new(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_TYPE] = self.kind as u8;
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - the frame-type byte is not one of the known [`FrameType`]s.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);
        let kind = FrameType::try_from(buf[OFF_TYPE])?;

        Ok(Packet {
            seq,
            kind,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
    /// Type byte outside the known set.
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::data(42, b"hello".to_vec());
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN - 1]),
            Err(PacketError::BufferTooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_unknown_type_returns_error() {
        let mut bytes = Packet::ack(7).encode();
        bytes[OFF_TYPE] = 9;
        assert_eq!(Packet::decode(&bytes), Err(PacketError::UnknownFrameType(9)));
    }

    #[test]
    fn header_only_frame_decodes_with_empty_payload() {
        let decoded = Packet::decode(&[0, 0, 0, 3, 2]).unwrap();
        assert_eq!(decoded, Packet::fin(3));
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn type_byte_values_match_wire_format() {
        assert_eq!(Packet::data(0, vec![]).encode()[OFF_TYPE], 0);
        assert_eq!(Packet::ack(0).encode()[OFF_TYPE], 1);
        assert_eq!(Packet::fin(0).encode()[OFF_TYPE], 2);
    }

    #[test]
    fn seq_big_endian_on_wire() {
        let bytes = Packet::ack(0x0102_0304).encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn encoded_length_equals_header_plus_payload() {
        let payload = b"exactly twelve!";
        let bytes = Packet::data(0, payload.to_vec()).encode();
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
    }

    #[test]
    fn max_payload_fills_default_mtu() {
        assert_eq!(MAX_PAYLOAD_SIZE, 1467);
        assert_eq!(max_payload(DEFAULT_MTU), MAX_PAYLOAD_SIZE);
        let full = Packet::data(1, vec![0xAB; MAX_PAYLOAD_SIZE]).encode();
        assert_eq!(full.len(), DEFAULT_MTU);
    }

    #[test]
    fn max_payload_saturates_for_tiny_mtu() {
        assert_eq!(max_payload(3), 0);
        assert_eq!(max_payload(HEADER_LEN + 1), 1);
    }
}
