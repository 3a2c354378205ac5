//! The duplex socket: one multiplexer actor per connection plus its
//! peripheral tasks.
//!
//! A [`Connection`] bundles the requester handle, the shutdown signal,
//! and the transport attachment point. The actor owns the stream table
//! and serialises every decision; a reader task and a writer task own the
//! transport halves and die or park when it drops, so a replacement
//! transport can be attached during resumption without touching stream
//! state.

mod actor;
mod event;
mod fairness;
mod keepalive;
mod lease;
mod producer;
mod reader;
mod requester;
mod responder;
mod stream;
mod writer;

use std::sync::Arc;

use futures::{
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use bytes::Bytes;
use log::debug;
use tokio::sync::{mpsc, watch};
use tokio_util::{codec::Framed, sync::CancellationToken};

use self::{
    actor::{Multiplexer, MultiplexerParts},
    event::Intent,
    keepalive::KeepaliveSchedule,
    writer::Writer,
};
pub use self::{
    lease::{LeaseGrant, LeaseProvider, PeriodicLease},
    requester::{DuplexSocket, PayloadStream},
    responder::{Responder, ResponderError, ResponderResult},
};
pub(crate) use self::responder::PendingResponder;
use crate::{
    fragment::{Fragmenter, Reassembler},
    framing::WireCodec,
    resume::{ResumeCounters, ResumeToken},
    transport::BoxTransport,
};

/// Framed transport carrying whole-frame buffers.
pub(crate) type WireFramed = Framed<BoxTransport, WireCodec>;
/// Write half handed to the writer task.
pub(crate) type WriterSink = SplitSink<WireFramed, Bytes>;
/// Read half handed to the reader task.
pub(crate) type ReaderFrames = SplitStream<WireFramed>;

/// Capacity of the actor intent channel and the outbound frame queues.
const CHANNEL_CAPACITY: usize = 64;

/// Which end of the connection this side is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The side that sent SETUP; assigns odd stream identifiers.
    Client,
    /// The side that accepted SETUP; assigns even stream identifiers.
    Server,
}

impl Role {
    pub(crate) const fn first_stream_id(self) -> u32 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }

    /// Whether `id` belongs to the peer's allocation space.
    pub(crate) const fn peer_assigns(self, id: crate::frame::StreamId) -> bool {
        match self {
            Self::Client => id.get() % 2 == 0,
            Self::Server => id.get() % 2 == 1,
        }
    }
}

/// Everything the connection machinery needs to start a duplex socket.
pub(crate) struct ConnectionOptions {
    pub role: Role,
    pub responder: Arc<dyn Responder>,
    pub fragment_mtu: usize,
    pub reassembly_limit: usize,
    pub keepalive_interval: std::time::Duration,
    pub keepalive_max_lifetime: std::time::Duration,
    pub resume_token: Option<ResumeToken>,
    pub lease_admission: bool,
    pub lease_allowance: bool,
    pub lease_provider: Option<Arc<dyn LeaseProvider>>,
}

/// A live duplex connection: requester handle plus lifecycle control.
pub struct Connection {
    socket: DuplexSocket,
    handle: SuspendedSocket,
    detached: watch::Receiver<bool>,
    resume_token: Option<ResumeToken>,
}

impl Connection {
    /// Start the actor, writer, and (if leased) lease feed. No transport
    /// is attached yet; requests queue until one is.
    pub(crate) fn spawn(options: ConnectionOptions) -> Self {
        let (intents_tx, intents_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (data_tx, data_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (sink_tx, sink_rx) = mpsc::channel(2);
        let (detached_tx, detached) = watch::channel(false);
        let counters = Arc::new(ResumeCounters::new());
        let shutdown = CancellationToken::new();

        let fragmenter =
            Fragmenter::new(options.fragment_mtu).expect("configuration validated the mtu");

        let writer = Writer::new(
            control_rx,
            data_rx,
            sink_rx,
            intents_tx.clone(),
            Arc::clone(&counters),
            shutdown.clone(),
        );
        tokio::spawn(writer.run());

        if let Some(provider) = options.lease_provider {
            tokio::spawn(run_lease_feed(
                provider,
                intents_tx.clone(),
                shutdown.clone(),
            ));
        }

        let multiplexer = Multiplexer::new(MultiplexerParts {
            role: options.role,
            responder: options.responder,
            intents_rx,
            intents: intents_tx.clone(),
            control_tx,
            data_tx,
            fragmenter,
            reassembler: Reassembler::new(options.reassembly_limit),
            counters: Arc::clone(&counters),
            keepalive: KeepaliveSchedule::new(
                options.keepalive_interval,
                options.keepalive_max_lifetime,
            ),
            lease_admission: options.lease_admission,
            lease_allowance: options.lease_allowance,
            resume_capable: options.resume_token.is_some(),
            detached_tx,
            shutdown: shutdown.clone(),
        });
        tokio::spawn(multiplexer.run());

        let handle = SuspendedSocket {
            intents: intents_tx.clone(),
            sink_tx,
            counters,
            shutdown,
            token: options.resume_token.clone(),
        };
        Self {
            socket: DuplexSocket::new(intents_tx),
            handle,
            detached,
            resume_token: options.resume_token,
        }
    }

    /// Clone the requester handle.
    #[must_use]
    pub fn socket(&self) -> DuplexSocket { self.socket.clone() }

    /// The resume token negotiated at setup, if any.
    #[must_use]
    pub fn resume_token(&self) -> Option<&ResumeToken> { self.resume_token.as_ref() }

    /// Watch transitions between attached and detached transports.
    #[must_use]
    pub fn detached_watch(&self) -> watch::Receiver<bool> { self.detached.clone() }

    /// Whether the connection has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.handle.shutdown.is_cancelled() }

    /// Resolve once the connection has terminated.
    pub async fn closed(&self) { self.handle.shutdown.cancelled().await; }

    /// Close the connection, terminating every stream.
    pub async fn close(&self) { self.socket.close().await; }

    /// Handle used to suspend and later re-attach this connection.
    #[must_use]
    pub fn suspended_handle(&self) -> SuspendedSocket { self.handle.clone() }

    /// Current resumable byte positions (written, read).
    #[must_use]
    pub fn positions(&self) -> (u64, u64) {
        (self.handle.counters.written(), self.handle.counters.read())
    }

    pub(crate) fn counters(&self) -> &Arc<ResumeCounters> { &self.handle.counters }

    /// Wire a framed transport into the running connection.
    pub(crate) async fn attach(&self, framed: WireFramed) { self.handle.reattach(framed).await; }

    /// Install the responder produced by the server acceptor.
    pub(crate) async fn set_responder(&self, responder: Arc<dyn Responder>) {
        let _ = self
            .handle
            .intents
            .send(Intent::AttachResponder { responder })
            .await;
    }
}

/// Re-attachment handle for a connection whose transport may be swapped.
///
/// The handle never owns the socket: it carries only the enqueue channels
/// and shared counters, so storing it in a session table keeps no
/// reference cycle alive.
#[derive(Clone)]
pub struct SuspendedSocket {
    intents: mpsc::Sender<Intent>,
    sink_tx: mpsc::Sender<WriterSink>,
    counters: Arc<ResumeCounters>,
    shutdown: CancellationToken,
    token: Option<ResumeToken>,
}

impl SuspendedSocket {
    /// Attach a replacement transport: install the write half, spawn a
    /// fresh reader on the read half, and wake the multiplexer.
    pub(crate) async fn reattach(&self, framed: WireFramed) {
        let (sink, frames) = framed.split();
        let _ = self.sink_tx.send(sink).await;
        let _ = self.intents.send(Intent::TransportRestored).await;
        tokio::spawn(reader::run_reader(
            frames,
            self.intents.clone(),
            Arc::clone(&self.counters),
            self.shutdown.clone(),
        ));
        debug!("transport attached");
    }

    /// Terminate the suspended connection.
    pub fn close(&self) { self.shutdown.cancel(); }

    /// Whether the connection has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shutdown.is_cancelled() }

    /// The session's resumable-bytes-read position.
    #[must_use]
    pub fn read_position(&self) -> u64 { self.counters.read() }

    /// The session's resumable-bytes-written position.
    #[must_use]
    pub fn written_position(&self) -> u64 { self.counters.written() }

    /// The session's resume token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&ResumeToken> { self.token.as_ref() }
}

#[cfg(test)]
impl SuspendedSocket {
    /// Detached handle for session-table tests; nothing listens on its
    /// channels.
    pub(crate) fn disconnected_stub() -> Self {
        let (intents, _intents_rx) = mpsc::channel(1);
        let (sink_tx, _sink_rx) = mpsc::channel(1);
        Self {
            intents,
            sink_tx,
            counters: Arc::new(ResumeCounters::new()),
            shutdown: CancellationToken::new(),
            token: None,
        }
    }
}

/// Forward grants from a lease provider into the actor.
async fn run_lease_feed(
    provider: Arc<dyn LeaseProvider>,
    intents: mpsc::Sender<Intent>,
    shutdown: CancellationToken,
) {
    loop {
        let grant = tokio::select! { biased;
            () = shutdown.cancelled() => return,
            grant = provider.next_grant() => grant,
        };
        let Some(grant) = grant else { return };
        if intents.send(Intent::GrantLease { grant }).await.is_err() {
            return;
        }
    }
}

/// Build a framed transport around a raw byte duplex.
pub(crate) fn frame_transport(transport: BoxTransport, max_frame_len: usize) -> WireFramed {
    Framed::new(transport, WireCodec::new(max_frame_len))
}

#[cfg(test)]
mod tests {
    use super::Role;
    use crate::frame::StreamId;

    #[test]
    fn parity_spaces_are_disjoint() {
        let odd = StreamId::new(7).unwrap();
        let even = StreamId::new(8).unwrap();
        assert!(Role::Client.peer_assigns(even));
        assert!(!Role::Client.peer_assigns(odd));
        assert!(Role::Server.peer_assigns(odd));
        assert!(!Role::Server.peer_assigns(even));
    }
}
