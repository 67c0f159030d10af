//! Property-based tests for the bTCP segment codec
//!
//! Random headers and payloads check that every encoded segment validates,
//! that corruption of any single bit is caught, and that decoding recovers the
//! header fields.

use btcp_protocol::{
    checksum, encode_header, split, validate, Flags, Segment, SegmentHeader, SeqNumber,
    HEADER_SIZE, PAYLOAD_SIZE,
};
use bytes::Bytes;
use proptest::prelude::*;

// Property test strategies

fn flags_strategy() -> impl Strategy<Value = Flags> {
    prop_oneof![
        Just(Flags::None),
        Just(Flags::Syn),
        Just(Flags::Ack),
        Just(Flags::SynAck),
        Just(Flags::Fin),
        Just(Flags::FinAck),
    ]
}

fn header_strategy() -> impl Strategy<Value = SegmentHeader> {
    (any::<u16>(), any::<u16>(), flags_strategy(), any::<u8>()).prop_map(
        |(seq, ack, flags, window)| {
            SegmentHeader::new(SeqNumber::new(seq), SeqNumber::new(ack), flags, window)
        },
    )
}

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=PAYLOAD_SIZE)
}

fn segment_strategy() -> impl Strategy<Value = Segment> {
    (header_strategy(), payload_strategy())
        .prop_map(|(header, payload)| Segment::new(header, Bytes::from(payload)).unwrap())
}

proptest! {
    #[test]
    fn prop_encoded_segment_validates(segment in segment_strategy()) {
        let encoded = segment.encode();
        prop_assert_eq!(encoded.len(), HEADER_SIZE + segment.payload.len());
        prop_assert!(validate(&encoded));
        prop_assert_eq!(checksum(&encoded), 0);
    }

    #[test]
    fn prop_single_bit_flip_detected(
        segment in segment_strategy(),
        bit in any::<prop::sample::Index>(),
    ) {
        let mut encoded = segment.encode().to_vec();
        let bit = bit.index(encoded.len() * 8);
        encoded[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(!validate(&encoded));
    }

    #[test]
    fn prop_decode_recovers_fields(segment in segment_strategy()) {
        let decoded = Segment::decode(&segment.encode()).unwrap();
        prop_assert_eq!(decoded.header.seq, segment.header.seq);
        prop_assert_eq!(decoded.header.ack, segment.header.ack);
        prop_assert_eq!(decoded.header.flags, segment.header.flags);
        prop_assert_eq!(decoded.header.window, segment.header.window);
        prop_assert_eq!(decoded.header.data_length as usize, segment.payload.len());
        prop_assert_eq!(decoded.payload, segment.payload);
    }

    #[test]
    fn prop_encode_header_matches_segment(
        header in header_strategy(),
        payload in payload_strategy(),
    ) {
        let raw = encode_header(header.seq, header.ack, header.flags, header.window, &payload);
        let encoded = Segment::new(header, Bytes::from(payload.clone())).unwrap().encode();

        let (head, body) = split(&encoded).unwrap();
        prop_assert_eq!(&raw[..], head);
        prop_assert_eq!(body, &payload[..]);
    }

    #[test]
    fn prop_unknown_flags_rejected(
        segment in segment_strategy(),
        code in any::<u8>().prop_filter("not a flag code", |c| Flags::from_u8(*c).is_none()),
    ) {
        let mut encoded = segment.encode().to_vec();
        encoded[4] = code;
        prop_assert!(Segment::decode(&encoded).is_err());
    }

    #[test]
    fn prop_short_input_rejected(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
        prop_assert!(Segment::decode(&bytes).is_err());
        prop_assert!(split(&bytes).is_none());
    }
}
