//! Outbound helper that splits oversized frames at the connection MTU.

use bytes::Bytes;

use super::{FragmentError, MAX_MTU, MIN_MTU};
use crate::{
    frame::{Frame, FrameBody, HEADER_LEN},
    payload::Payload,
};

/// Bytes consumed by the metadata length prefix when metadata is present.
const METADATA_PREFIX_LEN: usize = 3;

/// Bytes consumed by the initial-request-N field on stream and channel
/// requests.
const INITIAL_N_LEN: usize = 4;

/// Splits request and payload frames into MTU-sized fragments.
///
/// The first fragment keeps the original frame type with FOLLOWS set;
/// continuations are PAYLOAD frames carrying NEXT, with FOLLOWS on all but
/// the last. Metadata bytes are consumed before data bytes, and the
/// METADATA flag appears only on fragments that carry at least one
/// metadata byte.
#[derive(Clone, Copy, Debug)]
pub struct Fragmenter {
    mtu: usize,
}

impl Fragmenter {
    /// Construct a fragmenter for the given MTU.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError::InvalidMtu`] when `mtu` falls outside
    /// `64 ..= 16 MiB − 1`.
    pub const fn new(mtu: usize) -> Result<Self, FragmentError> {
        if mtu < MIN_MTU || mtu > MAX_MTU {
            return Err(FragmentError::InvalidMtu {
                mtu,
                min: MIN_MTU,
                max: MAX_MTU,
            });
        }
        Ok(Self { mtu })
    }

    /// Return the configured MTU.
    #[must_use]
    pub const fn mtu(&self) -> usize { self.mtu }

    /// Split `frame` into one or more wire-sized frames.
    ///
    /// Frames that fit within the MTU, and frame types that never
    /// fragment, are returned untouched as a single-element vector.
    #[must_use]
    pub fn split(&self, frame: Frame) -> Vec<Frame> {
        if self.fits(&frame) {
            return vec![frame];
        }
        let stream_id = frame.stream_id;
        let (head, payload, last_complete) = match frame.body {
            FrameBody::RequestResponse { payload, .. } => {
                (Head::RequestResponse, payload, false)
            }
            FrameBody::RequestFnf { payload, .. } => (Head::RequestFnf, payload, false),
            FrameBody::RequestStream {
                initial_n, payload, ..
            } => (Head::RequestStream { initial_n }, payload, false),
            FrameBody::RequestChannel {
                initial_n,
                complete,
                payload,
                ..
            } => (Head::RequestChannel { initial_n }, payload, complete),
            FrameBody::Payload {
                complete, payload, ..
            } => (Head::Payload, payload, complete),
            body => unreachable!("only payload-bearing frames exceed the mtu: {body:?}"),
        };

        let (data, metadata) = payload.into_parts();
        let mut metadata = metadata.unwrap_or_default();
        let mut data = data;
        let mut fragments = Vec::new();
        let mut head = Some(head);

        loop {
            let fixed = head.as_ref().map_or(0, Head::fixed_len);
            let mut budget = self.mtu - HEADER_LEN - fixed;
            let fragment_metadata = take_chunk(&mut metadata, &mut budget, METADATA_PREFIX_LEN);
            let fragment_data = take_chunk(&mut data, &mut budget, 0);
            let last = metadata.is_empty() && data.is_empty();
            let payload = Payload::new(
                fragment_data.unwrap_or_default(),
                fragment_metadata,
            );
            let body = match head.take() {
                Some(head) => head.into_body(payload, !last, last && last_complete),
                None => FrameBody::Payload {
                    follows: !last,
                    complete: last && last_complete,
                    next: true,
                    payload,
                },
            };
            fragments.push(Frame::new(stream_id, body));
            if last {
                return fragments;
            }
        }
    }

    /// Whether the frame's encoding fits within the MTU; frame types the
    /// protocol never fragments always fit.
    fn fits(&self, frame: &Frame) -> bool {
        let (fixed, payload) = match &frame.body {
            FrameBody::RequestResponse { payload, .. }
            | FrameBody::RequestFnf { payload, .. }
            | FrameBody::Payload { payload, .. } => (0, payload),
            FrameBody::RequestStream { payload, .. }
            | FrameBody::RequestChannel { payload, .. } => (INITIAL_N_LEN, payload),
            _ => return true,
        };
        let metadata_len = if payload.has_metadata() {
            METADATA_PREFIX_LEN + payload.metadata_len()
        } else {
            0
        };
        HEADER_LEN + fixed + metadata_len + payload.data_len() <= self.mtu
    }
}

/// Take up to the remaining budget from `source`, charging `prefix` bytes
/// of overhead when anything is taken.
fn take_chunk(source: &mut Bytes, budget: &mut usize, prefix: usize) -> Option<Bytes> {
    if source.is_empty() || *budget <= prefix {
        return None;
    }
    *budget -= prefix;
    let take = source.len().min(*budget);
    *budget -= take;
    Some(source.split_to(take))
}

/// The original frame type of a fragmented series.
enum Head {
    RequestResponse,
    RequestFnf,
    RequestStream { initial_n: u32 },
    RequestChannel { initial_n: u32 },
    Payload,
}

impl Head {
    const fn fixed_len(&self) -> usize {
        match self {
            Self::RequestStream { .. } | Self::RequestChannel { .. } => INITIAL_N_LEN,
            _ => 0,
        }
    }

    fn into_body(self, payload: Payload, follows: bool, complete: bool) -> FrameBody {
        match self {
            Self::RequestResponse => FrameBody::RequestResponse { follows, payload },
            Self::RequestFnf => FrameBody::RequestFnf { follows, payload },
            Self::RequestStream { initial_n } => FrameBody::RequestStream {
                initial_n,
                follows,
                payload,
            },
            Self::RequestChannel { initial_n } => FrameBody::RequestChannel {
                initial_n,
                follows,
                complete,
                payload,
            },
            Self::Payload => FrameBody::Payload {
                follows,
                complete,
                next: true,
                payload,
            },
        }
    }
}

