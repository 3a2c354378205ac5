use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;

use super::{codec, *};
use crate::payload::Payload;

fn sid(value: u32) -> StreamId { StreamId::new(value).expect("valid stream id") }

fn round_trip(frame: &Frame) -> Frame {
    let wire = codec::encode(frame).expect("encode");
    codec::decode(wire).expect("decode")
}

#[test]
fn setup_round_trips_with_token_and_lease() {
    let frame = Frame::new(
        StreamId::ZERO,
        FrameBody::Setup {
            version: Version::CURRENT,
            keepalive_interval_ms: 20_000,
            max_lifetime_ms: 90_000,
            resume_token: Some(Bytes::from_static(b"tok-1")),
            lease: true,
            metadata_mime: "application/json".into(),
            data_mime: "application/octet-stream".into(),
            payload: Payload::new(
                Bytes::from_static(b"hello"),
                Some(Bytes::from_static(b"meta")),
            ),
        },
    );
    assert_eq!(round_trip(&frame), frame);
}

#[test]
fn setup_without_token_omits_resume_flag() {
    let frame = Frame::new(
        StreamId::ZERO,
        FrameBody::Setup {
            version: Version::CURRENT,
            keepalive_interval_ms: 1,
            max_lifetime_ms: 2,
            resume_token: None,
            lease: false,
            metadata_mime: "a/b".into(),
            data_mime: "c/d".into(),
            payload: Payload::empty(),
        },
    );
    let wire = codec::encode(&frame).expect("encode");
    let mut cursor = wire.clone();
    let header = FrameHeader::decode(&mut cursor).expect("header");
    assert!(!header.flags.contains(Flags::RESUME));
    assert_eq!(codec::decode(wire).expect("decode"), frame);
}

#[rstest]
#[case(Frame::request_response(sid(1), Payload::from("ping")))]
#[case(Frame::request_fnf(sid(3), Payload::from("log line")))]
#[case(Frame::request_stream(sid(5), 2, Payload::from("subscribe")))]
#[case(Frame::request_channel(sid(7), 8, Payload::from("open")))]
#[case(Frame::request_n(sid(1), 128))]
#[case(Frame::cancel(sid(9)))]
#[case(Frame::payload(sid(1), Payload::new(Bytes::from_static(b"d"), Some(Bytes::from_static(b"m"))), true))]
#[case(Frame::payload_complete(sid(2)))]
#[case(Frame::error(sid(1), ErrorCode::ApplicationError, Bytes::from_static(b"boom")))]
#[case(Frame::connection_error(ErrorCode::ConnectionClose, Bytes::new()))]
#[case(Frame::keepalive(true, 1024))]
#[case(Frame::metadata_push(Bytes::from_static(b"routing")))]
#[case(Frame::lease(30_000, 5, Some(Bytes::from_static(b"l"))))]
#[case(Frame::lease(0, 0, None))]
#[case(Frame::resume_ok(4096))]
fn frames_round_trip(#[case] frame: Frame) {
    assert_eq!(round_trip(&frame), frame);
}

#[test]
fn resume_round_trips() {
    let frame = Frame::new(
        StreamId::ZERO,
        FrameBody::Resume {
            version: Version::CURRENT,
            token: Bytes::from_static(b"session-token"),
            last_received_server_position: 1024,
            first_available_client_position: 0,
        },
    );
    assert_eq!(round_trip(&frame), frame);
}

#[test]
fn request_n_of_zero_is_invalid() {
    let wire = codec::encode(&Frame::request_n(sid(1), 1)).expect("encode");
    let mut raw = wire.to_vec();
    let n_offset = raw.len() - 4;
    raw[n_offset..].copy_from_slice(&[0, 0, 0, 0]);
    assert!(matches!(
        codec::decode(Bytes::from(raw)),
        Err(FrameError::InvalidCombination { .. })
    ));
}

#[test]
fn payload_without_any_flag_is_invalid() {
    // PAYLOAD header with none of NEXT, COMPLETE, FOLLOWS.
    let raw: Vec<u8> = vec![0, 0, 0, 1, 0x28, 0x00];
    assert!(matches!(
        codec::decode(Bytes::from(raw)),
        Err(FrameError::InvalidCombination { .. })
    ));
}

#[test]
fn keepalive_on_nonzero_stream_is_invalid() {
    let raw: Vec<u8> = vec![0, 0, 0, 2, 0x0C, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
    assert!(matches!(
        codec::decode(Bytes::from(raw)),
        Err(FrameError::InvalidCombination { .. })
    ));
}

#[test]
fn request_on_connection_stream_is_invalid() {
    let wire = codec::encode(&Frame::request_response(sid(1), Payload::empty())).expect("encode");
    let mut raw = wire.to_vec();
    raw[..4].copy_from_slice(&[0, 0, 0, 0]);
    assert!(matches!(
        codec::decode(Bytes::from(raw)),
        Err(FrameError::InvalidCombination { .. })
    ));
}

#[test]
fn truncated_body_is_malformed() {
    let wire = codec::encode(&Frame::resume_ok(77)).expect("encode");
    let truncated = wire.slice(..wire.len() - 2);
    assert!(matches!(
        codec::decode(truncated),
        Err(FrameError::Malformed { .. })
    ));
}

#[test]
fn metadata_length_prefix_is_honoured() {
    let payload = Payload::new(Bytes::from_static(b"data"), Some(Bytes::from_static(b"md")));
    let frame = Frame::payload(sid(1), payload, false);
    let decoded = round_trip(&frame);
    let FrameBody::Payload { payload, .. } = decoded.body else {
        panic!("expected payload body");
    };
    assert_eq!(payload.metadata().map(Bytes::as_ref), Some(&b"md"[..]));
    assert_eq!(payload.data().as_ref(), b"data");
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    (
        proptest::collection::vec(any::<u8>(), 0..256),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
    )
        .prop_map(|(data, metadata)| {
            Payload::new(Bytes::from(data), metadata.map(Bytes::from))
        })
}

fn stream_frame_strategy() -> impl Strategy<Value = Frame> {
    (1..=super::MAX_STREAM_ID, payload_strategy(), any::<bool>(), 1u32..).prop_flat_map(
        |(id, payload, complete, n)| {
            let id = StreamId::new(id).expect("bounded");
            prop_oneof![
                Just(Frame::request_response(id, payload.clone())),
                Just(Frame::request_fnf(id, payload.clone())),
                Just(Frame::request_stream(id, n, payload.clone())),
                Just(Frame::request_channel(id, n, payload.clone())),
                Just(Frame::payload(id, payload, complete)),
                Just(Frame::request_n(id, n)),
                Just(Frame::cancel(id)),
            ]
        },
    )
}

proptest! {
    #[test]
    fn any_stream_frame_round_trips(frame in stream_frame_strategy()) {
        let wire = codec::encode(&frame).expect("encode");
        prop_assert_eq!(codec::decode(wire).expect("decode"), frame);
    }

    #[test]
    fn keepalive_positions_round_trip(position in 0..u64::MAX / 2, respond: bool) {
        let frame = Frame::keepalive(respond, position);
        let wire = codec::encode(&frame).expect("encode");
        prop_assert_eq!(codec::decode(wire).expect("decode"), frame);
    }
}
