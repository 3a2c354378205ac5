//! Stream table owned exclusively by the multiplexer.
//!
//! Each live stream is a [`StreamRecord`] tracking which side opened it,
//! how each direction terminates, and the handles (subscriber sink,
//! credit gate, producer cancellation) the multiplexer uses to drive it.
//! Identifier allocation is monotonic with no wrap: the client assigns
//! odd identifiers from 1, the server even identifiers from 2, and
//! exhaustion fails the connection.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::Role;
use crate::{
    backpressure::CreditGate,
    error::ConnectionError,
    frame::{MAX_STREAM_ID, StreamId},
    payload::Payload,
};

/// Interaction type of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Response,
    Stream,
    Channel,
}

/// Which side of the connection opened the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamOrigin {
    Local,
    Remote,
}

/// Local consumer of inbound payloads for one stream.
#[derive(Debug)]
pub(crate) enum Subscriber {
    /// Single-response subscriber; consumed by the terminal signal.
    Response(oneshot::Sender<Result<Payload, ConnectionError>>),
    /// Sequence subscriber backing a payload stream.
    ///
    /// Delivery volume is bounded by the request-N credit this side
    /// granted, so the channel itself is unbounded.
    Sequence(mpsc::UnboundedSender<Result<Payload, ConnectionError>>),
}

/// Bookkeeping for one live stream.
#[derive(Debug)]
pub(crate) struct StreamRecord {
    pub kind: StreamKind,
    pub origin: StreamOrigin,
    /// Sink for inbound payloads, when this side consumes any.
    pub subscriber: Option<Subscriber>,
    /// Credit for the local producer, when this side produces.
    pub gate: Option<CreditGate>,
    /// Stops the local producer task.
    pub producer_cancel: Option<CancellationToken>,
    /// True from producer spawn until its stop acknowledgement; the
    /// record is not reclaimed earlier, preventing identifier reuse
    /// races.
    pub producer_running: bool,
    /// This side has sent its terminal frame.
    pub local_done: bool,
    /// The peer has sent its terminal frame.
    pub remote_done: bool,
    /// A cancellation was observed; late producer output is dropped.
    pub cancelled: bool,
}

impl StreamRecord {
    fn new(kind: StreamKind, origin: StreamOrigin) -> Self {
        Self {
            kind,
            origin,
            subscriber: None,
            gate: None,
            producer_cancel: None,
            producer_running: false,
            local_done: false,
            remote_done: false,
            cancelled: false,
        }
    }

    /// Locally initiated request/response awaiting a single payload.
    pub fn local_response(reply: oneshot::Sender<Result<Payload, ConnectionError>>) -> Self {
        let mut record = Self::new(StreamKind::Response, StreamOrigin::Local);
        record.subscriber = Some(Subscriber::Response(reply));
        record.local_done = true;
        record
    }

    /// Locally initiated stream subscription.
    pub fn local_stream(sink: mpsc::UnboundedSender<Result<Payload, ConnectionError>>) -> Self {
        let mut record = Self::new(StreamKind::Stream, StreamOrigin::Local);
        record.subscriber = Some(Subscriber::Sequence(sink));
        record.local_done = true;
        record
    }

    /// Locally initiated channel: subscribes inbound and produces
    /// outbound.
    pub fn local_channel(
        sink: mpsc::UnboundedSender<Result<Payload, ConnectionError>>,
        gate: CreditGate,
        cancel: CancellationToken,
    ) -> Self {
        let mut record = Self::new(StreamKind::Channel, StreamOrigin::Local);
        record.subscriber = Some(Subscriber::Sequence(sink));
        record.gate = Some(gate);
        record.producer_cancel = Some(cancel);
        record.producer_running = true;
        record
    }

    /// Remotely initiated request/response served by a handler task.
    pub fn remote_response(cancel: CancellationToken) -> Self {
        let mut record = Self::new(StreamKind::Response, StreamOrigin::Remote);
        record.producer_cancel = Some(cancel);
        record.producer_running = true;
        record.remote_done = true;
        record
    }

    /// Remotely initiated stream served by a producer task.
    pub fn remote_stream(gate: CreditGate, cancel: CancellationToken) -> Self {
        let mut record = Self::new(StreamKind::Stream, StreamOrigin::Remote);
        record.gate = Some(gate);
        record.producer_cancel = Some(cancel);
        record.producer_running = true;
        record.remote_done = true;
        record
    }

    /// Remotely initiated channel: produces outbound and subscribes
    /// inbound.
    pub fn remote_channel(
        sink: mpsc::UnboundedSender<Result<Payload, ConnectionError>>,
        gate: CreditGate,
        cancel: CancellationToken,
    ) -> Self {
        let mut record = Self::new(StreamKind::Channel, StreamOrigin::Remote);
        record.subscriber = Some(Subscriber::Sequence(sink));
        record.gate = Some(gate);
        record.producer_cancel = Some(cancel);
        record.producer_running = true;
        record
    }

    /// Whether both directions have terminated and the producer, if any,
    /// has acknowledged its stop.
    pub fn is_closed(&self) -> bool { self.local_done && self.remote_done && !self.producer_running }

    /// Deliver a payload to the local subscriber.
    pub fn deliver(&mut self, payload: Payload) {
        match self.subscriber.take() {
            Some(Subscriber::Response(reply)) => {
                let _ = reply.send(Ok(payload));
            }
            Some(Subscriber::Sequence(sink)) => {
                let _ = sink.send(Ok(payload));
                self.subscriber = Some(Subscriber::Sequence(sink));
            }
            None => {}
        }
    }

    /// Terminate the local subscriber with an error.
    pub fn fail_subscriber(&mut self, error: ConnectionError) {
        match self.subscriber.take() {
            Some(Subscriber::Response(reply)) => {
                let _ = reply.send(Err(error));
            }
            Some(Subscriber::Sequence(sink)) => {
                let _ = sink.send(Err(error));
            }
            None => {}
        }
    }

    /// Complete the local subscriber without an error.
    pub fn complete_subscriber(&mut self) { self.subscriber = None; }

    /// Stop the local producer: revoke its credit and fire its
    /// cancellation token.
    pub fn stop_producer(&mut self) {
        if let Some(gate) = &self.gate {
            gate.revoke();
        }
        if let Some(cancel) = &self.producer_cancel {
            cancel.cancel();
        }
    }
}

/// Mapping of live streams plus the local identifier allocator.
#[derive(Debug)]
pub(crate) struct StreamTable {
    next_id: u32,
    records: HashMap<StreamId, StreamRecord>,
}

impl StreamTable {
    pub fn new(role: Role) -> Self {
        Self {
            next_id: role.first_stream_id(),
            records: HashMap::new(),
        }
    }

    /// Allocate the next local stream identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StreamIdExhausted`] once the 31-bit
    /// space is spent; the caller must fail the connection.
    pub fn allocate(&mut self) -> Result<StreamId, ConnectionError> {
        if self.next_id > MAX_STREAM_ID {
            return Err(ConnectionError::StreamIdExhausted);
        }
        let id = StreamId::new(self.next_id).ok_or(ConnectionError::StreamIdExhausted)?;
        self.next_id += 2;
        Ok(id)
    }

    pub fn insert(&mut self, id: StreamId, record: StreamRecord) {
        self.records.insert(id, record);
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamRecord> {
        self.records.get_mut(&id)
    }

    pub fn contains(&self, id: StreamId) -> bool { self.records.contains_key(&id) }

    pub fn remove(&mut self, id: StreamId) -> Option<StreamRecord> { self.records.remove(&id) }

    /// Remove the record if both directions have terminated.
    pub fn reclaim_if_closed(&mut self, id: StreamId) {
        if self.records.get(&id).is_some_and(StreamRecord::is_closed) {
            self.records.remove(&id);
        }
    }

    /// Take every record, leaving the table empty.
    pub fn drain(&mut self) -> Vec<(StreamId, StreamRecord)> {
        self.records.drain().collect()
    }

    /// Iterate over all live records.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut StreamRecord> {
        self.records.values_mut()
    }

    pub fn len(&self) -> usize { self.records.len() }

    #[cfg(test)]
    pub fn skip_to(&mut self, next_id: u32) { self.next_id = next_id; }
}
