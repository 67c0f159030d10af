//! bTCP Segment Structures and Serialization
//!
//! A segment is a 10-byte header followed by at most [`PAYLOAD_SIZE`] bytes of
//! payload:
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Sequence Number        |          Ack Number           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |    Window     |        Payload Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Sequence number, ack number and payload length are written in host byte
//! order. The checksum alone is written in network byte order.

use crate::checksum::checksum;
use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the bTCP header in bytes
pub const HEADER_SIZE: usize = 10;

/// Maximum payload carried by one segment
pub const PAYLOAD_SIZE: usize = 1008;

/// Largest datagram a peer will ever send
pub const SEGMENT_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Offset of the checksum field within the header
const CHECKSUM_OFFSET: usize = 8;

/// Segment type code
///
/// The codes are discrete values, never combined: a SYNACK is its own code,
/// not SYN|ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flags {
    /// Plain data segment
    None = 0,
    /// Connection request
    Syn = 1,
    /// Cumulative acknowledgement
    Ack = 2,
    /// Connection accepted
    SynAck = 4,
    /// Teardown request
    Fin = 8,
    /// Teardown accepted
    FinAck = 16,
}

impl Flags {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Flags::None),
            1 => Some(Flags::Syn),
            2 => Some(Flags::Ack),
            4 => Some(Flags::SynAck),
            8 => Some(Flags::Fin),
            16 => Some(Flags::FinAck),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flags::None => "DATA",
            Flags::Syn => "SYN",
            Flags::Ack => "ACK",
            Flags::SynAck => "SYNACK",
            Flags::Fin => "FIN",
            Flags::FinAck => "FINACK",
        };
        f.write_str(name)
    }
}

/// Segment parsing and validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unknown flags code: {0}")]
    UnknownFlags(u8),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Fixed 10-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub seq: SeqNumber,
    pub ack: SeqNumber,
    pub flags: Flags,
    /// Advertised window in segments
    pub window: u8,
    /// Informational payload length, never trusted on receipt
    pub data_length: i16,
    /// Checksum as computed by [`checksum`]; ignored when encoding
    pub checksum: u16,
}

impl SegmentHeader {
    /// Create a header with zero payload length and checksum
    pub fn new(seq: SeqNumber, ack: SeqNumber, flags: Flags, window: u8) -> Self {
        SegmentHeader {
            seq,
            ack,
            flags,
            window,
            data_length: 0,
            checksum: 0,
        }
    }

    /// Parse the header from the front of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SegmentError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SegmentError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        let seq = SeqNumber::new(buf.get_u16_ne());
        let ack = SeqNumber::new(buf.get_u16_ne());
        let raw_flags = buf.get_u8();
        let flags = Flags::from_u8(raw_flags).ok_or(SegmentError::UnknownFlags(raw_flags))?;
        let window = buf.get_u8();
        let data_length = buf.get_i16_ne();
        let checksum = buf.get_u16();

        Ok(SegmentHeader {
            seq,
            ack,
            flags,
            window,
            data_length,
            checksum,
        })
    }

    /// Append the header with a zeroed checksum field
    fn put_unchecked(&self, data_length: i16, buf: &mut BytesMut) {
        buf.put_u16_ne(self.seq.as_raw());
        buf.put_u16_ne(self.ack.as_raw());
        buf.put_u8(self.flags.as_u8());
        buf.put_u8(self.window);
        buf.put_i16_ne(data_length);
        buf.put_u16(0);
    }
}

/// Header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Segment {
    /// Create a segment, rejecting oversized payloads
    pub fn new(header: SegmentHeader, payload: Bytes) -> Result<Self, SegmentError> {
        if payload.len() > PAYLOAD_SIZE {
            return Err(SegmentError::PayloadTooLarge {
                size: payload.len(),
                max: PAYLOAD_SIZE,
            });
        }
        Ok(Segment { header, payload })
    }

    /// Create a payload-less control segment (SYN, ACK, FIN, ...)
    pub fn control(seq: SeqNumber, ack: SeqNumber, flags: Flags, window: u8) -> Self {
        Segment {
            header: SegmentHeader::new(seq, ack, flags, window),
            payload: Bytes::new(),
        }
    }

    /// Total size of the segment on the wire
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the segment, filling in payload length and checksum
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.put_unchecked(self.payload.len() as i16, &mut buf);
        buf.put_slice(&self.payload);

        let sum = checksum(&buf);
        buf[CHECKSUM_OFFSET..HEADER_SIZE].copy_from_slice(&sum.to_be_bytes());
        buf.freeze()
    }

    /// Parse a segment
    ///
    /// The checksum is not verified here; callers run
    /// [`crate::checksum::validate`] on the raw bytes first.
    pub fn decode(bytes: &[u8]) -> Result<Self, SegmentError> {
        let header = SegmentHeader::from_bytes(bytes)?;
        let payload = &bytes[HEADER_SIZE..];

        if payload.len() > PAYLOAD_SIZE {
            return Err(SegmentError::PayloadTooLarge {
                size: payload.len(),
                max: PAYLOAD_SIZE,
            });
        }

        Ok(Segment {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

/// Build just the header for `payload`, checksum included
pub fn encode_header(
    seq: SeqNumber,
    ack: SeqNumber,
    flags: Flags,
    window: u8,
    payload: &[u8],
) -> [u8; HEADER_SIZE] {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    SegmentHeader::new(seq, ack, flags, window).put_unchecked(payload.len() as i16, &mut buf);
    buf.put_slice(payload);

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&buf[..HEADER_SIZE]);
    header[CHECKSUM_OFFSET..].copy_from_slice(&checksum(&buf).to_be_bytes());
    header
}

/// Split raw segment bytes at the header boundary
pub fn split(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    if bytes.len() < HEADER_SIZE {
        None
    } else {
        Some(bytes.split_at(HEADER_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::validate;

    #[test]
    fn test_flags_codes() {
        for flags in [
            Flags::None,
            Flags::Syn,
            Flags::Ack,
            Flags::SynAck,
            Flags::Fin,
            Flags::FinAck,
        ] {
            assert_eq!(Flags::from_u8(flags.as_u8()), Some(flags));
        }
        // SYN|ACK is not SYNACK
        assert_eq!(Flags::from_u8(3), None);
    }

    #[test]
    fn test_header_layout() {
        let segment = Segment::control(
            SeqNumber::new(0x0102),
            SeqNumber::new(0x0304),
            Flags::SynAck,
            7,
        );
        let bytes = segment.encode();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..2], &0x0102u16.to_ne_bytes());
        assert_eq!(&bytes[2..4], &0x0304u16.to_ne_bytes());
        assert_eq!(bytes[4], 4);
        assert_eq!(bytes[5], 7);
        assert_eq!(&bytes[6..8], &0i16.to_ne_bytes());

        let mut zeroed = bytes.to_vec();
        zeroed[8] = 0;
        zeroed[9] = 0;
        assert_eq!(&bytes[8..10], &checksum(&zeroed).to_be_bytes());
    }

    #[test]
    fn test_encoded_segment_validates() {
        let header = SegmentHeader::new(SeqNumber::new(42), SeqNumber::new(0), Flags::None, 100);
        let segment = Segment::new(header, Bytes::from_static(b"hello, btcp")).unwrap();
        assert!(validate(&segment.encode()));
    }

    #[test]
    fn test_decode_fields() {
        let header = SegmentHeader::new(SeqNumber::new(9), SeqNumber::new(3), Flags::Ack, 55);
        let segment = Segment::new(header, Bytes::from_static(b"abc")).unwrap();
        let bytes = segment.encode();

        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded.header.seq, SeqNumber::new(9));
        assert_eq!(decoded.header.ack, SeqNumber::new(3));
        assert_eq!(decoded.header.flags, Flags::Ack);
        assert_eq!(decoded.header.window, 55);
        assert_eq!(decoded.header.data_length, 3);
        assert_eq!(decoded.payload, Bytes::from_static(b"abc"));
        assert_eq!(
            decoded.header.checksum.to_be_bytes(),
            [bytes[8], bytes[9]]
        );
    }

    #[test]
    fn test_encode_header_matches_segment() {
        let payload = b"odd-length";
        let header = encode_header(SeqNumber::new(5), SeqNumber::new(6), Flags::None, 10, payload);

        let full = Segment::new(
            SegmentHeader::new(SeqNumber::new(5), SeqNumber::new(6), Flags::None, 10),
            Bytes::from_static(payload),
        )
        .unwrap()
        .encode();

        assert_eq!(&full[..HEADER_SIZE], &header);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(
            Segment::decode(&[0u8; 4]),
            Err(SegmentError::InsufficientData {
                expected: HEADER_SIZE,
                actual: 4
            })
        );
    }

    #[test]
    fn test_decode_unknown_flags() {
        let mut bytes = Segment::control(SeqNumber::new(1), SeqNumber::new(1), Flags::Ack, 1)
            .encode()
            .to_vec();
        bytes[4] = 0x03;
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::UnknownFlags(3)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let header = SegmentHeader::new(SeqNumber::new(0), SeqNumber::new(0), Flags::None, 1);
        let payload = Bytes::from(vec![0u8; PAYLOAD_SIZE + 1]);
        assert!(matches!(
            Segment::new(header, payload),
            Err(SegmentError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_split() {
        let bytes = Segment::control(SeqNumber::new(1), SeqNumber::new(2), Flags::Fin, 3).encode();
        let (header, payload) = split(&bytes).unwrap();
        assert_eq!(header.len(), HEADER_SIZE);
        assert!(payload.is_empty());
        assert!(split(&bytes[..5]).is_none());
    }
}
