use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;

use super::*;
use crate::{
    frame::{Frame, FrameBody, StreamId, codec},
    payload::Payload,
};

fn sid(value: u32) -> StreamId { StreamId::new(value).expect("valid stream id") }

fn big_payload(data_len: usize, metadata_len: usize) -> Payload {
    let data = Bytes::from(vec![0xAB; data_len]);
    let metadata = (metadata_len > 0).then(|| Bytes::from(vec![0xCD; metadata_len]));
    Payload::new(data, metadata)
}

fn reassemble_all(frames: Vec<Frame>) -> Frame {
    let mut reassembler = Reassembler::new(usize::MAX);
    let mut out = None;
    for frame in frames {
        if let Some(whole) = reassembler.push(frame).expect("reassembly") {
            assert!(out.is_none(), "series yielded more than one frame");
            out = Some(whole);
        }
    }
    out.expect("series never completed")
}

#[test]
fn small_frame_passes_through_unsplit() {
    let fragmenter = Fragmenter::new(256).expect("valid mtu");
    let frame = Frame::request_response(sid(1), Payload::from("ping"));
    let fragments = fragmenter.split(frame.clone());
    assert_eq!(fragments, vec![frame]);
}

#[rstest]
#[case(0)]
#[case(63)]
#[case(MAX_MTU + 1)]
fn out_of_range_mtu_is_rejected(#[case] mtu: usize) {
    assert!(matches!(
        Fragmenter::new(mtu),
        Err(FragmentError::InvalidMtu { .. })
    ));
}

#[test]
fn request_response_splits_and_round_trips() {
    let fragmenter = Fragmenter::new(256).expect("valid mtu");
    let original = Frame::request_response(sid(1), big_payload(1000, 100));
    let fragments = fragmenter.split(original.clone());
    assert!(fragments.len() > 1);

    // Head keeps the original type with FOLLOWS; continuations are PAYLOAD
    // frames; only the last clears FOLLOWS.
    let FrameBody::RequestResponse { follows: true, .. } = &fragments[0].body else {
        panic!("head must stay a REQUEST_RESPONSE with FOLLOWS");
    };
    for middle in &fragments[1..fragments.len() - 1] {
        assert!(matches!(
            middle.body,
            FrameBody::Payload {
                follows: true,
                next: true,
                ..
            }
        ));
    }
    assert!(matches!(
        fragments.last().expect("non-empty").body,
        FrameBody::Payload { follows: false, .. }
    ));

    assert_eq!(reassemble_all(fragments), original);
}

#[test]
fn every_fragment_fits_within_the_mtu() {
    let mtu = 256;
    let fragmenter = Fragmenter::new(mtu).expect("valid mtu");
    for frame in fragmenter.split(Frame::request_stream(sid(3), 16, big_payload(2000, 500))) {
        let encoded = codec::encode(&frame).expect("encode");
        assert!(encoded.len() <= mtu, "fragment of {} bytes", encoded.len());
    }
}

#[test]
fn metadata_flag_appears_only_on_metadata_bearing_fragments() {
    let fragmenter = Fragmenter::new(64).expect("valid mtu");
    let fragments = fragmenter.split(Frame::payload(sid(5), big_payload(200, 80), false));
    let mut metadata_done = false;
    for frame in &fragments {
        let (FrameBody::Payload { payload, .. }
        | FrameBody::RequestResponse { payload, .. }) = &frame.body
        else {
            panic!("unexpected fragment type");
        };
        if payload.has_metadata() {
            assert!(!metadata_done, "metadata must precede all data bytes");
        } else {
            metadata_done = true;
        }
    }
}

#[test]
fn channel_completion_rides_the_last_fragment() {
    let fragmenter = Fragmenter::new(64).expect("valid mtu");
    let original = Frame::new(
        sid(7),
        FrameBody::RequestChannel {
            initial_n: 4,
            follows: false,
            complete: true,
            payload: big_payload(300, 0),
        },
    );
    let fragments = fragmenter.split(original.clone());
    let FrameBody::RequestChannel {
        complete: false, ..
    } = &fragments[0].body
    else {
        panic!("head must defer completion to the last fragment");
    };
    assert!(matches!(
        fragments.last().expect("non-empty").body,
        FrameBody::Payload { complete: true, .. }
    ));
    assert_eq!(reassemble_all(fragments), original);
}

#[test]
fn complete_only_payload_passes_through_exactly() {
    let mut reassembler = Reassembler::new(1024);
    let frame = Frame::payload_complete(sid(9));
    let out = reassembler.push(frame.clone()).expect("push");
    assert_eq!(out, Some(frame));
}

#[test]
fn overflow_fails_and_drops_the_buffer() {
    let fragmenter = Fragmenter::new(64).expect("valid mtu");
    let mut reassembler = Reassembler::new(128);
    let fragments = fragmenter.split(Frame::payload(sid(1), big_payload(400, 0), false));
    let mut failed = false;
    for frame in fragments {
        match reassembler.push(frame) {
            Ok(_) => {}
            Err(ReassemblyError::Overflow { stream_id, .. }) => {
                assert_eq!(stream_id, sid(1));
                failed = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(failed);
    assert_eq!(reassembler.pending_len(), 0);
}

#[test]
fn cancel_mid_series_drops_the_buffer_and_passes_through() {
    let fragmenter = Fragmenter::new(64).expect("valid mtu");
    let mut reassembler = Reassembler::new(4096);
    let mut fragments = fragmenter
        .split(Frame::payload(sid(1), big_payload(400, 0), false))
        .into_iter();
    assert!(reassembler
        .push(fragments.next().expect("head"))
        .expect("push")
        .is_none());
    assert_eq!(reassembler.pending_len(), 1);

    let cancel = Frame::cancel(sid(1));
    assert_eq!(reassembler.push(cancel.clone()).expect("push"), Some(cancel));
    assert_eq!(reassembler.pending_len(), 0);
}

#[test]
fn interleaved_streams_reassemble_independently() {
    let fragmenter = Fragmenter::new(64).expect("valid mtu");
    let mut reassembler = Reassembler::new(4096);
    let first = Frame::payload(sid(1), big_payload(150, 0), false);
    let second = Frame::payload(sid(2), big_payload(150, 20), true);

    let mut a = fragmenter.split(first.clone()).into_iter();
    let mut b = fragmenter.split(second.clone()).into_iter();
    let mut whole = Vec::new();
    loop {
        let mut progressed = false;
        for iter in [&mut a, &mut b] {
            if let Some(frame) = iter.next() {
                progressed = true;
                if let Some(done) = reassembler.push(frame).expect("push") {
                    whole.push(done);
                }
            }
        }
        if !progressed {
            break;
        }
    }
    whole.sort_by_key(|frame| frame.stream_id);
    assert_eq!(whole, vec![first, second]);
}

proptest! {
    // Splitting at any MTU and re-assembling must reproduce the original
    // payload byte-for-byte, preserving the metadata/data boundary.
    #[test]
    fn split_then_reassemble_is_identity(
        data_len in 0usize..2048,
        metadata_len in 0usize..512,
        mtu in 64usize..512,
        complete: bool,
    ) {
        let fragmenter = Fragmenter::new(mtu).expect("valid mtu");
        let original = Frame::payload(sid(11), big_payload(data_len, metadata_len), complete);
        let fragments = fragmenter.split(original.clone());
        for frame in &fragments {
            prop_assert!(codec::encode(frame).expect("encode").len() <= mtu);
        }
        prop_assert_eq!(reassemble_all(fragments), original);
    }
}
