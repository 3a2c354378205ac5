//! Inbound helper that stitches fragment series back into whole frames.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use super::ReassemblyError;
use crate::{
    frame::{Frame, FrameBody, StreamId},
    payload::Payload,
};

/// Accumulated state for one stream's pending fragment series.
#[derive(Debug)]
struct Partial {
    head: PendingHead,
    metadata: Option<BytesMut>,
    data: BytesMut,
}

impl Partial {
    fn len(&self) -> usize {
        self.metadata.as_ref().map_or(0, BytesMut::len) + self.data.len()
    }

    fn push(&mut self, payload: &Payload) {
        if let Some(metadata) = payload.metadata() {
            self.metadata
                .get_or_insert_with(BytesMut::new)
                .put_slice(metadata);
        }
        self.data.put_slice(payload.data());
    }

    fn into_frame(self, stream_id: StreamId, complete: bool) -> Frame {
        let payload = Payload::new(self.data.freeze(), self.metadata.map(BytesMut::freeze));
        let body = match self.head {
            PendingHead::RequestResponse => FrameBody::RequestResponse {
                follows: false,
                payload,
            },
            PendingHead::RequestFnf => FrameBody::RequestFnf {
                follows: false,
                payload,
            },
            PendingHead::RequestStream { initial_n } => FrameBody::RequestStream {
                initial_n,
                follows: false,
                payload,
            },
            PendingHead::RequestChannel { initial_n } => FrameBody::RequestChannel {
                initial_n,
                follows: false,
                complete,
                payload,
            },
            PendingHead::Payload => FrameBody::Payload {
                follows: false,
                complete,
                next: true,
                payload,
            },
        };
        Frame::new(stream_id, body)
    }
}

#[derive(Debug)]
enum PendingHead {
    RequestResponse,
    RequestFnf,
    RequestStream { initial_n: u32 },
    RequestChannel { initial_n: u32 },
    Payload,
}

/// Stateful per-stream fragment re-assembler with a size cap.
#[derive(Debug)]
pub struct Reassembler {
    limit: usize,
    partials: HashMap<StreamId, Partial>,
}

impl Reassembler {
    /// Create a re-assembler enforcing a maximum reconstructed size.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            partials: HashMap::new(),
        }
    }

    /// Process an inbound frame.
    ///
    /// Returns `Ok(Some(_))` with a whole frame (possibly the input,
    /// untouched, when nothing was pending and nothing follows), or
    /// `Ok(None)` while more fragments are required. CANCEL and ERROR
    /// frames drop any pending buffer for their stream and pass through;
    /// REQUEST_N may interleave with a pending series because it travels
    /// the opposite direction of the fragmented payload.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::Overflow`] when the accumulated size
    /// would exceed the cap, and
    /// [`ReassemblyError::UnexpectedContinuation`] when a new request
    /// frame arrives for a stream with fragments pending. Both drop the
    /// pending buffer.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Frame>, ReassemblyError> {
        let stream_id = frame.stream_id;

        if self.partials.contains_key(&stream_id) {
            return match frame.body {
                FrameBody::Payload {
                    follows,
                    complete,
                    payload,
                    ..
                } => self.continue_series(stream_id, follows, complete, &payload),
                FrameBody::Cancel | FrameBody::Error { .. } => {
                    self.partials.remove(&stream_id);
                    Ok(Some(frame))
                }
                FrameBody::RequestN { .. } => Ok(Some(frame)),
                _ => {
                    self.partials.remove(&stream_id);
                    Err(ReassemblyError::UnexpectedContinuation { stream_id })
                }
            };
        }

        if !frame_follows(&frame.body) {
            return Ok(Some(frame));
        }

        let (head, payload) = match frame.body {
            FrameBody::RequestResponse { payload, .. } => (PendingHead::RequestResponse, payload),
            FrameBody::RequestFnf { payload, .. } => (PendingHead::RequestFnf, payload),
            FrameBody::RequestStream {
                initial_n, payload, ..
            } => (PendingHead::RequestStream { initial_n }, payload),
            FrameBody::RequestChannel {
                initial_n, payload, ..
            } => (PendingHead::RequestChannel { initial_n }, payload),
            FrameBody::Payload { payload, .. } => (PendingHead::Payload, payload),
            _ => unreachable!("only payload-bearing frames carry FOLLOWS"),
        };

        let mut partial = Partial {
            head,
            metadata: None,
            data: BytesMut::new(),
        };
        partial.push(&payload);
        self.check_limit(stream_id, partial.len())?;
        self.partials.insert(stream_id, partial);
        Ok(None)
    }

    /// Discard any pending series for `stream_id`.
    ///
    /// Called when the stream terminates out of band.
    pub fn abort(&mut self, stream_id: StreamId) { self.partials.remove(&stream_id); }

    /// Number of streams with fragments pending.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.partials.len() }

    fn continue_series(
        &mut self,
        stream_id: StreamId,
        follows: bool,
        complete: bool,
        payload: &Payload,
    ) -> Result<Option<Frame>, ReassemblyError> {
        let Some(mut partial) = self.partials.remove(&stream_id) else {
            unreachable!("continue_series is only called with a pending buffer");
        };
        let attempted = partial.len() + payload.metadata_len() + payload.data_len();
        self.check_limit(stream_id, attempted)?;
        partial.push(payload);
        if follows {
            self.partials.insert(stream_id, partial);
            return Ok(None);
        }
        Ok(Some(partial.into_frame(stream_id, complete)))
    }

    fn check_limit(&self, stream_id: StreamId, attempted: usize) -> Result<(), ReassemblyError> {
        if attempted > self.limit {
            return Err(ReassemblyError::Overflow {
                stream_id,
                attempted,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

const fn frame_follows(body: &FrameBody) -> bool {
    match body {
        FrameBody::RequestResponse { follows, .. }
        | FrameBody::RequestFnf { follows, .. }
        | FrameBody::RequestStream { follows, .. }
        | FrameBody::RequestChannel { follows, .. }
        | FrameBody::Payload { follows, .. } => *follows,
        _ => false,
    }
}
