//! Inputs to the multiplexer actor.
//!
//! Every peripheral task (requester handles, producer tasks, the reader,
//! the lease feed) communicates with the multiplexer by enqueuing one of
//! these on its bounded intent channel; the actor is the sole mutator of
//! connection state.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

use super::{
    lease::LeaseGrant,
    requester::PayloadStream,
    responder::{Responder, ResponderError},
};
use crate::{
    error::ConnectionError,
    frame::{Frame, StreamId},
    payload::Payload,
};

pub(crate) enum Intent {
    /// Open a request/response interaction.
    RequestResponse {
        payload: Payload,
        reply: oneshot::Sender<Result<Payload, ConnectionError>>,
    },
    /// Open a stream interaction.
    RequestStream {
        payload: Payload,
        initial_n: u32,
        reply: oneshot::Sender<Result<PayloadStream, ConnectionError>>,
    },
    /// Open a channel interaction.
    RequestChannel {
        initial_n: u32,
        first: Payload,
        outbound: BoxStream<'static, Payload>,
        reply: oneshot::Sender<Result<PayloadStream, ConnectionError>>,
    },
    /// Send a fire-and-forget request.
    FireAndForget {
        payload: Payload,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    /// Send connection-level metadata.
    MetadataPush {
        metadata: Bytes,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    },
    /// Orderly connection shutdown.
    Close,
    /// A local subscriber grants the peer more demand.
    SubscriberRequestN { stream_id: StreamId, n: u32 },
    /// A local subscriber abandons its stream.
    SubscriberCancel { stream_id: StreamId },
    /// A producer task emits one payload; credit was awaited first.
    ProducerNext { stream_id: StreamId, payload: Payload },
    /// A producer task finished its sequence.
    ProducerComplete { stream_id: StreamId },
    /// A producer task failed; maps to a stream-level APPLICATION_ERROR.
    ProducerError { stream_id: StreamId, message: String },
    /// A request/response handler finished.
    ProducerRespond {
        stream_id: StreamId,
        result: Result<Payload, ResponderError>,
    },
    /// A producer task has fully stopped; its record may be reclaimed.
    ProducerStopped { stream_id: StreamId },
    /// The accepted responder replaces the placeholder.
    AttachResponder { responder: Arc<dyn Responder> },
    /// The lease feed produced a grant to send to the peer.
    GrantLease { grant: LeaseGrant },
    /// The reader decoded an inbound frame.
    Inbound { frame: Frame },
    /// The reader saw a structurally invalid frame; connection-fatal.
    ProtocolViolation { error: ConnectionError },
    /// The transport dropped; suspend or close.
    TransportLost,
    /// A transport is attached and flowing again.
    TransportRestored,
}
