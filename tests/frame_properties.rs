//! Property-based tests for the frame codec.
//!
//! These tests use proptest to verify invariants hold for all inputs:
//! - Encode/decode round-trips every field
//! - Header bits land where the wire layout puts them
//! - Metadata presence follows the flag, never the body length
//! - Out-of-range fields are rejected before any buffer is touched
//! - The stream decoder is insensitive to how bytes are split

use proptest::prelude::*;
use rsocket_core::protocol::{
    length_prefixed, BufferPool, Frame, FrameDecoder, FrameFlags, FrameHeader, FrameType,
    RequestFrame, RequestKind, RequestNFrame, MAX_REQUEST_N, MAX_STREAM_ID,
};
use rsocket_core::Error;

fn kind_strategy() -> impl Strategy<Value = RequestKind> {
    prop_oneof![Just(RequestKind::Stream), Just(RequestKind::Channel)]
}

fn bytes_strategy(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..max)
}

#[test]
fn prop_request_frame_round_trip() {
    proptest!(|(
        kind in kind_strategy(),
        stream_id in 0..=MAX_STREAM_ID,
        n in 0..=MAX_REQUEST_N,
        data in bytes_strategy(256),
        metadata in bytes_strategy(64)
    )| {
        let pool = BufferPool::new();
        let frame: Frame = RequestFrame::encode(
            &pool, kind, stream_id, n, &data, &metadata, FrameFlags::empty(),
        ).unwrap().into();

        let decoded = Frame::decode(&pool, &frame.to_vec()).unwrap();
        let request = match decoded {
            Frame::RequestStream(f) | Frame::RequestChannel(f) => f,
            Frame::RequestN(_) => panic!("decoded as REQUEST_N"),
        };

        prop_assert_eq!(request.kind(), kind);
        prop_assert_eq!(request.stream_id(), stream_id);
        prop_assert_eq!(request.initial_request_n(), n);
        prop_assert_eq!(request.data(), &data[..]);
        if metadata.is_empty() {
            prop_assert_eq!(request.metadata(), None);
        } else {
            prop_assert_eq!(request.metadata(), Some(&metadata[..]));
        }
    });
}

#[test]
fn prop_header_bit_layout() {
    proptest!(|(stream_id in any::<u32>(), raw_flags in 0u16..0x400)| {
        let flags = FrameFlags::from_wire(raw_flags);
        let header = FrameHeader::new(stream_id, FrameType::RequestChannel, flags);
        let bytes = header.encode();

        let id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        prop_assert_eq!(id, stream_id & MAX_STREAM_ID);
        prop_assert_eq!(bytes[0] & 0x80, 0);

        let type_and_flags = u16::from_be_bytes([bytes[4], bytes[5]]);
        prop_assert_eq!(type_and_flags >> 10, u16::from(FrameType::RequestChannel.as_u8()));
        prop_assert_eq!(type_and_flags & 0x3FF, raw_flags);

        let decoded = FrameHeader::decode(&bytes).unwrap();
        prop_assert_eq!(decoded.stream_id(), stream_id & MAX_STREAM_ID);
        prop_assert_eq!(decoded.flags(), flags);
    });
}

#[test]
fn prop_metadata_absent_without_flag() {
    proptest!(|(n in 1..=MAX_REQUEST_N, data in bytes_strategy(128))| {
        let header = FrameHeader::new(3, FrameType::RequestStream, FrameFlags::empty());
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&n.to_be_bytes());
        bytes.extend_from_slice(&data);

        let pool = BufferPool::new();
        let Frame::RequestStream(request) = Frame::decode(&pool, &bytes).unwrap() else {
            panic!("expected REQUEST_STREAM");
        };
        prop_assert_eq!(request.metadata(), None);
        prop_assert_eq!(request.data(), &data[..]);
    });
}

#[test]
fn prop_short_body_is_incomplete() {
    proptest!(|(kind in kind_strategy(), body in bytes_strategy(4))| {
        let header = FrameHeader::new(1, kind.frame_type(), FrameFlags::empty());
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&body);

        let pool = BufferPool::new();
        let result = Frame::decode(&pool, &bytes);
        let is_incomplete = matches!(
            result,
            Err(Error::IncompleteFrame { len, .. }) if len == body.len()
        );
        prop_assert!(is_incomplete);
    });
}

#[test]
fn prop_out_of_range_request_n_rejected_before_acquire() {
    proptest!(|(n in (MAX_REQUEST_N + 1)..=u32::MAX, kind in kind_strategy())| {
        let pool = BufferPool::new();

        let request = RequestFrame::encode(&pool, kind, 1, n, b"x", b"", FrameFlags::empty());
        prop_assert!(matches!(request, Err(Error::RequestNOutOfRange(v)) if v == u64::from(n)));

        let request_n = RequestNFrame::encode(&pool, 1, n);
        prop_assert!(matches!(request_n, Err(Error::RequestNOutOfRange(_))));

        prop_assert_eq!(pool.stats().acquired, 0);
    });
}

#[test]
fn prop_decoder_split_anywhere() {
    proptest!(|(
        payloads in prop::collection::vec(bytes_strategy(64), 1..6),
        cut in any::<prop::sample::Index>()
    )| {
        let pool = BufferPool::new();
        let mut wire = Vec::new();
        for (i, data) in payloads.iter().enumerate() {
            let frame: Frame = RequestFrame::encode(
                &pool, RequestKind::Stream, i as u32 + 1, 1, data, b"", FrameFlags::empty(),
            ).unwrap().into();
            wire.extend(length_prefixed(&frame).unwrap());
        }

        let split = cut.index(wire.len() + 1);
        let mut decoder = FrameDecoder::new(pool.clone());
        let mut frames = decoder.push(&wire[..split]).unwrap();
        frames.extend(decoder.push(&wire[split..]).unwrap());

        prop_assert_eq!(frames.len(), payloads.len());
        for (frame, data) in frames.iter().zip(&payloads) {
            match frame {
                Frame::RequestStream(f) => prop_assert_eq!(f.data(), &data[..]),
                other => panic!("unexpected frame {other}"),
            }
        }
    });
}
