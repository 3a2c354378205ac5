//! The multiplexer: a single actor owning all per-connection state.
//!
//! The actor is the sole mutator of the stream table, credit books, and
//! lease state. It serialises decisions over one bounded intent channel
//! fed by the reader, requester handles, producer tasks, and the lease
//! feed, and drives a biased select loop: shutdown first, then intents,
//! then the keepalive timer.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use log::{debug, info, warn};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

use super::{
    Role,
    event::Intent,
    keepalive::KeepaliveSchedule,
    lease::{LeaseBook, LeaseGrant},
    producer::{run_producer, run_response_handler},
    requester::PayloadStream,
    responder::{Responder, ResponderError, ResponderResult},
    stream::{StreamRecord, StreamTable},
};
use crate::{
    backpressure::CreditGate,
    error::ConnectionError,
    fragment::{Fragmenter, ReassemblyError, Reassembler},
    frame::{ErrorCode, Frame, FrameBody, FrameError, StreamId},
    payload::Payload,
    resume::ResumeCounters,
};

/// Everything the actor needs at construction.
pub(crate) struct MultiplexerParts {
    pub role: Role,
    pub responder: Arc<dyn Responder>,
    pub intents_rx: mpsc::Receiver<Intent>,
    pub intents: mpsc::Sender<Intent>,
    pub control_tx: mpsc::Sender<Frame>,
    pub data_tx: mpsc::Sender<Frame>,
    pub fragmenter: Fragmenter,
    pub reassembler: Reassembler,
    pub counters: Arc<ResumeCounters>,
    pub keepalive: KeepaliveSchedule,
    pub lease_admission: bool,
    pub lease_allowance: bool,
    pub resume_capable: bool,
    pub detached_tx: watch::Sender<bool>,
    pub shutdown: CancellationToken,
}

pub(crate) struct Multiplexer {
    role: Role,
    responder: Arc<dyn Responder>,
    intents_rx: mpsc::Receiver<Intent>,
    intents: mpsc::Sender<Intent>,
    control_tx: mpsc::Sender<Frame>,
    data_tx: mpsc::Sender<Frame>,
    streams: StreamTable,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    counters: Arc<ResumeCounters>,
    keepalive: KeepaliveSchedule,
    /// Server side: permits the peer may spend; enforced on inbound
    /// requests.
    admission: Option<LeaseBook>,
    /// Client side: permits this side may spend; checked before sending.
    allowance: Option<LeaseBook>,
    attached: bool,
    resume_capable: bool,
    detached_tx: watch::Sender<bool>,
    shutdown: CancellationToken,
    closing: bool,
}

impl Multiplexer {
    pub fn new(parts: MultiplexerParts) -> Self {
        Self {
            role: parts.role,
            responder: parts.responder,
            intents_rx: parts.intents_rx,
            intents: parts.intents,
            control_tx: parts.control_tx,
            data_tx: parts.data_tx,
            streams: StreamTable::new(parts.role),
            fragmenter: parts.fragmenter,
            reassembler: parts.reassembler,
            counters: parts.counters,
            keepalive: parts.keepalive,
            admission: parts.lease_admission.then(LeaseBook::new),
            allowance: parts.lease_allowance.then(LeaseBook::new),
            attached: false,
            resume_capable: parts.resume_capable,
            detached_tx: parts.detached_tx,
            shutdown: parts.shutdown,
            closing: false,
        }
    }

    pub async fn run(mut self) {
        let mut keepalive_timer = interval(self.keepalive.interval());
        keepalive_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            let flow = tokio::select! { biased;
                () = self.shutdown.cancelled() => {
                    self.shutdown_streams(&ConnectionError::Closed);
                    ControlFlow::Break(())
                }
                intent = self.intents_rx.recv() => match intent {
                    Some(intent) => self.handle_intent(intent).await,
                    None => {
                        self.shutdown_streams(&ConnectionError::Closed);
                        ControlFlow::Break(())
                    }
                },
                _ = keepalive_timer.tick(), if self.attached => {
                    self.on_keepalive_tick().await
                }
            };
            if flow.is_break() {
                info!("connection closed: role={:?}", self.role);
                return;
            }
        }
    }

    async fn handle_intent(&mut self, intent: Intent) -> ControlFlow<()> {
        match intent {
            Intent::RequestResponse { payload, reply } => {
                self.open_request_response(payload, reply).await
            }
            Intent::RequestStream {
                payload,
                initial_n,
                reply,
            } => self.open_request_stream(payload, initial_n, reply).await,
            Intent::RequestChannel {
                initial_n,
                first,
                outbound,
                reply,
            } => {
                self.open_request_channel(initial_n, first, outbound, reply)
                    .await
            }
            Intent::FireAndForget { payload, reply } => {
                self.open_fire_and_forget(payload, reply).await
            }
            Intent::MetadataPush { metadata, reply } => {
                if self.closing {
                    let _ = reply.send(Err(ConnectionError::Closed));
                    return ControlFlow::Continue(());
                }
                self.send_control(Frame::metadata_push(metadata)).await?;
                let _ = reply.send(Ok(()));
                ControlFlow::Continue(())
            }
            Intent::Close => {
                self.closing = true;
                let _ = self
                    .control_tx
                    .send(Frame::connection_error(ErrorCode::ConnectionClose, ""))
                    .await;
                self.shutdown_streams(&ConnectionError::Closed);
                self.shutdown.cancel();
                ControlFlow::Break(())
            }
            Intent::SubscriberRequestN { stream_id, n } => {
                if self.streams.contains(stream_id) && n > 0 {
                    self.send_control(Frame::request_n(stream_id, n)).await?;
                }
                ControlFlow::Continue(())
            }
            Intent::SubscriberCancel { stream_id } => self.cancel_locally(stream_id).await,
            Intent::ProducerNext { stream_id, payload } => {
                self.on_producer_next(stream_id, payload).await
            }
            Intent::ProducerComplete { stream_id } => {
                let Some(record) = self.streams.get_mut(stream_id) else {
                    return ControlFlow::Continue(());
                };
                record.local_done = true;
                let cancelled = record.cancelled;
                if !cancelled {
                    self.send_data(Frame::payload_complete(stream_id)).await?;
                }
                ControlFlow::Continue(())
            }
            Intent::ProducerError { stream_id, message } => {
                let Some(record) = self.streams.get_mut(stream_id) else {
                    return ControlFlow::Continue(());
                };
                record.local_done = true;
                record.remote_done = true;
                record.fail_subscriber(ConnectionError::Cancelled);
                let cancelled = record.cancelled;
                if !cancelled {
                    self.send_data(Frame::error(
                        stream_id,
                        ErrorCode::ApplicationError,
                        Bytes::from(message),
                    ))
                    .await?;
                }
                ControlFlow::Continue(())
            }
            Intent::ProducerRespond { stream_id, result } => {
                self.on_producer_respond(stream_id, result).await
            }
            Intent::ProducerStopped { stream_id } => {
                if let Some(record) = self.streams.get_mut(stream_id) {
                    record.producer_running = false;
                }
                self.streams.reclaim_if_closed(stream_id);
                ControlFlow::Continue(())
            }
            Intent::AttachResponder { responder } => {
                self.responder = responder;
                ControlFlow::Continue(())
            }
            Intent::GrantLease { grant } => self.on_grant_lease(grant).await,
            Intent::Inbound { frame } => self.on_inbound(frame).await,
            Intent::ProtocolViolation { error } => {
                let notice =
                    Frame::connection_error(ErrorCode::ConnectionError, error.to_string());
                self.fail_connection(&error, Some(notice)).await
            }
            Intent::TransportLost => self.on_transport_lost().await,
            Intent::TransportRestored => {
                self.attached = true;
                self.keepalive.mark_heard();
                let _ = self.detached_tx.send(false);
                self.set_gates_frozen(false);
                ControlFlow::Continue(())
            }
        }
    }

    // ---- requester-side openings -------------------------------------

    fn admit_local(&mut self) -> Result<(), ConnectionError> {
        if self.closing {
            return Err(ConnectionError::Closed);
        }
        if let Some(allowance) = &mut self.allowance {
            if !allowance.try_acquire() {
                return Err(ConnectionError::NoLease);
            }
        }
        Ok(())
    }

    async fn allocate_or_fail(&mut self) -> Result<StreamId, ControlFlow<()>> {
        match self.streams.allocate() {
            Ok(id) => Ok(id),
            Err(error) => {
                let notice = Frame::connection_error(
                    ErrorCode::ConnectionError,
                    "stream identifiers exhausted",
                );
                Err(self.fail_connection(&error, Some(notice)).await)
            }
        }
    }

    async fn open_request_response(
        &mut self,
        payload: Payload,
        reply: oneshot::Sender<Result<Payload, ConnectionError>>,
    ) -> ControlFlow<()> {
        if let Err(error) = self.admit_local() {
            let _ = reply.send(Err(error));
            return ControlFlow::Continue(());
        }
        let stream_id = match self.allocate_or_fail().await {
            Ok(id) => id,
            Err(flow) => return flow,
        };
        self.streams
            .insert(stream_id, StreamRecord::local_response(reply));
        self.send_data(Frame::request_response(stream_id, payload))
            .await
    }

    async fn open_request_stream(
        &mut self,
        payload: Payload,
        initial_n: u32,
        reply: oneshot::Sender<Result<PayloadStream, ConnectionError>>,
    ) -> ControlFlow<()> {
        if let Err(error) = self.admit_local() {
            let _ = reply.send(Err(error));
            return ControlFlow::Continue(());
        }
        if initial_n == 0 {
            let _ = reply.send(Err(zero_demand_error()));
            return ControlFlow::Continue(());
        }
        let stream_id = match self.allocate_or_fail().await {
            Ok(id) => id,
            Err(flow) => return flow,
        };
        let (sink, items) = mpsc::unbounded_channel();
        let subscription = PayloadStream::new(stream_id, items, self.intents.clone());
        self.streams
            .insert(stream_id, StreamRecord::local_stream(sink));
        let _ = reply.send(Ok(subscription));
        self.send_data(Frame::request_stream(stream_id, initial_n, payload))
            .await
    }

    async fn open_request_channel(
        &mut self,
        initial_n: u32,
        first: Payload,
        outbound: BoxStream<'static, Payload>,
        reply: oneshot::Sender<Result<PayloadStream, ConnectionError>>,
    ) -> ControlFlow<()> {
        if let Err(error) = self.admit_local() {
            let _ = reply.send(Err(error));
            return ControlFlow::Continue(());
        }
        if initial_n == 0 {
            let _ = reply.send(Err(zero_demand_error()));
            return ControlFlow::Continue(());
        }
        let stream_id = match self.allocate_or_fail().await {
            Ok(id) => id,
            Err(flow) => return flow,
        };
        let (sink, items) = mpsc::unbounded_channel();
        let subscription = PayloadStream::new(stream_id, items, self.intents.clone());
        let gate = CreditGate::new(0);
        let cancel = CancellationToken::new();
        self.streams.insert(
            stream_id,
            StreamRecord::local_channel(sink, gate.clone(), cancel.clone()),
        );
        tokio::spawn(run_producer(
            stream_id,
            outbound.map(Ok).boxed(),
            gate,
            cancel,
            self.intents.clone(),
        ));
        let _ = reply.send(Ok(subscription));
        self.send_data(Frame::request_channel(stream_id, initial_n, first))
            .await
    }

    async fn open_fire_and_forget(
        &mut self,
        payload: Payload,
        reply: oneshot::Sender<Result<(), ConnectionError>>,
    ) -> ControlFlow<()> {
        if let Err(error) = self.admit_local() {
            let _ = reply.send(Err(error));
            return ControlFlow::Continue(());
        }
        let stream_id = match self.allocate_or_fail().await {
            Ok(id) => id,
            Err(flow) => return flow,
        };
        // Fire-and-forget opens and immediately closes; no record is kept.
        let flow = self.send_data(Frame::request_fnf(stream_id, payload)).await;
        let _ = reply.send(Ok(()));
        flow
    }

    async fn cancel_locally(&mut self, stream_id: StreamId) -> ControlFlow<()> {
        let Some(record) = self.streams.get_mut(stream_id) else {
            return ControlFlow::Continue(());
        };
        if record.cancelled {
            return ControlFlow::Continue(());
        }
        record.cancelled = true;
        record.local_done = true;
        record.remote_done = true;
        record.complete_subscriber();
        record.stop_producer();
        self.reassembler.abort(stream_id);
        self.send_control(Frame::cancel(stream_id)).await?;
        self.streams.reclaim_if_closed(stream_id);
        ControlFlow::Continue(())
    }

    // ---- producer feedback -------------------------------------------

    async fn on_producer_next(
        &mut self,
        stream_id: StreamId,
        payload: Payload,
    ) -> ControlFlow<()> {
        let Some(record) = self.streams.get_mut(stream_id) else {
            // Cancelled and reclaimed; late output is dropped.
            return ControlFlow::Continue(());
        };
        if record.cancelled {
            return ControlFlow::Continue(());
        }
        let consumed = record.gate.as_ref().is_some_and(CreditGate::try_consume);
        if !consumed {
            let error = ConnectionError::CreditOverrun { stream_id };
            let notice =
                Frame::connection_error(ErrorCode::ConnectionError, error.to_string());
            return self.fail_connection(&error, Some(notice)).await;
        }
        self.send_data(Frame::payload(stream_id, payload, false))
            .await
    }

    async fn on_producer_respond(
        &mut self,
        stream_id: StreamId,
        result: ResponderResult,
    ) -> ControlFlow<()> {
        let Some(record) = self.streams.get_mut(stream_id) else {
            return ControlFlow::Continue(());
        };
        record.local_done = true;
        let cancelled = record.cancelled;
        if cancelled {
            return ControlFlow::Continue(());
        }
        match result {
            Ok(payload) => {
                self.send_data(Frame::payload(stream_id, payload, true))
                    .await
            }
            Err(ResponderError { message }) => {
                self.send_data(Frame::error(
                    stream_id,
                    ErrorCode::ApplicationError,
                    Bytes::from(message),
                ))
                .await
            }
        }
    }

    async fn on_grant_lease(&mut self, grant: LeaseGrant) -> ControlFlow<()> {
        let ttl_ms = u32::try_from(grant.ttl.as_millis()).unwrap_or(u32::MAX);
        if let Some(admission) = &mut self.admission {
            admission.grant(grant.requests, grant.ttl);
        }
        self.send_control(Frame::lease(ttl_ms, grant.requests, grant.metadata))
            .await
    }

    // ---- inbound dispatch --------------------------------------------

    async fn on_inbound(&mut self, frame: Frame) -> ControlFlow<()> {
        self.keepalive.mark_heard();
        match self.reassembler.push(frame) {
            Ok(Some(whole)) => self.dispatch(whole).await,
            Ok(None) => ControlFlow::Continue(()),
            Err(error @ ReassemblyError::Overflow { stream_id, .. }) => {
                self.send_data(Frame::error(
                    stream_id,
                    ErrorCode::Invalid,
                    "reassembly overflow",
                ))
                .await?;
                self.fail_stream(stream_id, &error.into());
                ControlFlow::Continue(())
            }
            Err(error) => {
                let error = ConnectionError::from(error);
                let notice =
                    Frame::connection_error(ErrorCode::ConnectionError, error.to_string());
                self.fail_connection(&error, Some(notice)).await
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> ControlFlow<()> {
        let stream_id = frame.stream_id;
        match frame.body {
            FrameBody::Keepalive {
                respond,
                last_received,
                ..
            } => {
                debug!("keepalive: respond={respond} peer_position={last_received}");
                if respond {
                    self.send_control(Frame::keepalive(false, self.counters.read()))
                        .await?;
                }
                ControlFlow::Continue(())
            }
            FrameBody::Lease {
                ttl_ms, requests, ..
            } => {
                if let Some(allowance) = &mut self.allowance {
                    allowance.grant(requests, Duration::from_millis(u64::from(ttl_ms)));
                }
                ControlFlow::Continue(())
            }
            FrameBody::Error { code, data } if stream_id.is_connection() => {
                let error = ConnectionError::remote(code, &data);
                warn!("peer closed the connection: {error}");
                self.shutdown_streams(&error);
                self.shutdown.cancel();
                ControlFlow::Break(())
            }
            FrameBody::Error { code, data } => {
                let error = ConnectionError::remote(code, &data);
                self.fail_stream(stream_id, &error);
                ControlFlow::Continue(())
            }
            FrameBody::MetadataPush { metadata } => {
                let responder = Arc::clone(&self.responder);
                tokio::spawn(async move { responder.metadata_push(metadata).await });
                ControlFlow::Continue(())
            }
            FrameBody::Setup { .. } | FrameBody::Resume { .. } | FrameBody::ResumeOk { .. } => {
                let error = ConnectionError::Protocol(FrameError::InvalidCombination {
                    reason: "handshake frame after connection establishment",
                });
                let notice =
                    Frame::connection_error(ErrorCode::ConnectionError, error.to_string());
                self.fail_connection(&error, Some(notice)).await
            }
            FrameBody::RequestResponse { payload, .. } => {
                self.accept_request_response(stream_id, payload).await
            }
            FrameBody::RequestFnf { payload, .. } => {
                self.accept_fire_and_forget(stream_id, payload).await
            }
            FrameBody::RequestStream {
                initial_n, payload, ..
            } => {
                self.accept_request_stream(stream_id, initial_n, payload)
                    .await
            }
            FrameBody::RequestChannel {
                initial_n,
                complete,
                payload,
                ..
            } => {
                self.accept_request_channel(stream_id, initial_n, complete, payload)
                    .await
            }
            FrameBody::RequestN { n } => {
                if let Some(record) = self.streams.get_mut(stream_id) {
                    // Request/response has implicit credit of one and no
                    // gate; extra demand is ignored, as are grants for
                    // unknown streams.
                    if let Some(gate) = &record.gate {
                        gate.grant(n);
                    }
                }
                ControlFlow::Continue(())
            }
            FrameBody::Cancel => {
                self.on_remote_cancel(stream_id);
                ControlFlow::Continue(())
            }
            FrameBody::Payload {
                complete,
                next,
                payload,
                ..
            } => {
                if let Some(record) = self.streams.get_mut(stream_id) {
                    if next {
                        record.deliver(payload);
                    }
                    if complete {
                        record.remote_done = true;
                        record.complete_subscriber();
                    }
                }
                self.streams.reclaim_if_closed(stream_id);
                ControlFlow::Continue(())
            }
        }
    }

    /// Validate the identifier of an inbound stream-opening request.
    async fn screen_new_request(&mut self, stream_id: StreamId) -> Result<(), ControlFlow<()>> {
        if !self.role.peer_assigns(stream_id) {
            let error = ConnectionError::Protocol(FrameError::InvalidCombination {
                reason: "request on a locally assigned stream identifier",
            });
            let notice = Frame::connection_error(ErrorCode::ConnectionError, error.to_string());
            return Err(self.fail_connection(&error, Some(notice)).await);
        }
        if self.streams.contains(stream_id) {
            debug!("ignoring request reusing live stream {stream_id}");
            return Err(ControlFlow::Continue(()));
        }
        Ok(())
    }

    /// Apply lease admission; on refusal, reject the stream.
    async fn admit_remote(&mut self, stream_id: StreamId) -> Result<(), ControlFlow<()>> {
        let admitted = match &mut self.admission {
            Some(admission) => admission.try_acquire(),
            None => true,
        };
        if admitted {
            return Ok(());
        }
        let flow = self
            .send_data(Frame::error(
                stream_id,
                ErrorCode::Rejected,
                "lease exhausted",
            ))
            .await;
        Err(flow)
    }

    async fn accept_request_response(
        &mut self,
        stream_id: StreamId,
        payload: Payload,
    ) -> ControlFlow<()> {
        if let Err(flow) = self.screen_new_request(stream_id).await {
            return flow;
        }
        if let Err(flow) = self.admit_remote(stream_id).await {
            return flow;
        }
        let cancel = CancellationToken::new();
        self.streams
            .insert(stream_id, StreamRecord::remote_response(cancel.clone()));
        tokio::spawn(run_response_handler(
            stream_id,
            Arc::clone(&self.responder),
            payload,
            cancel,
            self.intents.clone(),
        ));
        ControlFlow::Continue(())
    }

    async fn accept_fire_and_forget(
        &mut self,
        stream_id: StreamId,
        payload: Payload,
    ) -> ControlFlow<()> {
        if let Err(flow) = self.screen_new_request(stream_id).await {
            return flow;
        }
        if let Err(flow) = self.admit_remote(stream_id).await {
            return flow;
        }
        let responder = Arc::clone(&self.responder);
        tokio::spawn(async move { responder.fire_and_forget(payload).await });
        ControlFlow::Continue(())
    }

    async fn accept_request_stream(
        &mut self,
        stream_id: StreamId,
        initial_n: u32,
        payload: Payload,
    ) -> ControlFlow<()> {
        if let Err(flow) = self.screen_new_request(stream_id).await {
            return flow;
        }
        if let Err(flow) = self.admit_remote(stream_id).await {
            return flow;
        }
        let gate = CreditGate::new(initial_n);
        let cancel = CancellationToken::new();
        if !self.attached {
            gate.freeze();
        }
        self.streams.insert(
            stream_id,
            StreamRecord::remote_stream(gate.clone(), cancel.clone()),
        );
        let source = self.responder.request_stream(payload);
        tokio::spawn(run_producer(
            stream_id,
            source,
            gate,
            cancel,
            self.intents.clone(),
        ));
        ControlFlow::Continue(())
    }

    async fn accept_request_channel(
        &mut self,
        stream_id: StreamId,
        initial_n: u32,
        complete: bool,
        payload: Payload,
    ) -> ControlFlow<()> {
        if let Err(flow) = self.screen_new_request(stream_id).await {
            return flow;
        }
        if let Err(flow) = self.admit_remote(stream_id).await {
            return flow;
        }
        let (sink, items) = mpsc::unbounded_channel();
        let _ = sink.send(Ok(payload));
        let inbound = PayloadStream::new(stream_id, items, self.intents.clone());
        let gate = CreditGate::new(initial_n);
        let cancel = CancellationToken::new();
        if !self.attached {
            gate.freeze();
        }
        let mut record = StreamRecord::remote_channel(sink, gate.clone(), cancel.clone());
        if complete {
            record.remote_done = true;
            record.subscriber = None;
        }
        self.streams.insert(stream_id, record);
        let source = self.responder.request_channel(inbound);
        tokio::spawn(run_producer(
            stream_id,
            source,
            gate,
            cancel,
            self.intents.clone(),
        ));
        ControlFlow::Continue(())
    }

    fn on_remote_cancel(&mut self, stream_id: StreamId) {
        let Some(record) = self.streams.get_mut(stream_id) else {
            // Idempotent: the stream may already be gone.
            return;
        };
        debug!(
            "cancel for stream {stream_id}: kind={:?} origin={:?}",
            record.kind, record.origin
        );
        record.cancelled = true;
        record.local_done = true;
        record.remote_done = true;
        record.stop_producer();
        record.fail_subscriber(ConnectionError::Cancelled);
        self.reassembler.abort(stream_id);
        self.streams.reclaim_if_closed(stream_id);
    }

    // ---- liveness and teardown ---------------------------------------

    async fn on_keepalive_tick(&mut self) -> ControlFlow<()> {
        if let Some(elapsed) = self.keepalive.expired() {
            let error = ConnectionError::KeepaliveTimeout { elapsed };
            let notice =
                Frame::connection_error(ErrorCode::ConnectionError, "keepalive timeout");
            return self.fail_connection(&error, Some(notice)).await;
        }
        self.send_control(Frame::keepalive(true, self.counters.read()))
            .await
    }

    async fn on_transport_lost(&mut self) -> ControlFlow<()> {
        if !self.attached {
            return ControlFlow::Continue(());
        }
        self.attached = false;
        let _ = self.detached_tx.send(true);
        self.set_gates_frozen(true);
        if self.resume_capable {
            info!("transport lost; connection suspended awaiting resume");
            return ControlFlow::Continue(());
        }
        self.fail_connection(&ConnectionError::Closed, None).await
    }

    fn fail_stream(&mut self, stream_id: StreamId, error: &ConnectionError) {
        if let Some(mut record) = self.streams.remove(stream_id) {
            record.stop_producer();
            record.fail_subscriber(error.clone());
            if record.producer_running {
                // Keep the record until the producer acknowledges its
                // stop, so the identifier cannot be reused underneath it.
                record.local_done = true;
                record.remote_done = true;
                record.cancelled = true;
                self.streams.insert(stream_id, record);
            }
        }
        self.reassembler.abort(stream_id);
    }

    async fn fail_connection(
        &mut self,
        error: &ConnectionError,
        notice: Option<Frame>,
    ) -> ControlFlow<()> {
        warn!(
            "failing connection with {} live streams: {error}",
            self.streams.len()
        );
        if let Some(frame) = notice {
            let _ = self.control_tx.send(frame).await;
        }
        self.shutdown_streams(error);
        self.shutdown.cancel();
        ControlFlow::Break(())
    }

    fn shutdown_streams(&mut self, error: &ConnectionError) {
        for (_, mut record) in self.streams.drain() {
            record.stop_producer();
            record.fail_subscriber(error.clone());
        }
    }

    fn set_gates_frozen(&mut self, frozen: bool) {
        for record in self.streams.records_mut() {
            if let Some(gate) = &record.gate {
                if frozen {
                    gate.freeze();
                } else {
                    gate.thaw();
                }
            }
        }
    }

    // ---- outbound helpers --------------------------------------------

    /// Enqueue a control-plane frame; connection dead when the writer is
    /// gone.
    async fn send_control(&mut self, frame: Frame) -> ControlFlow<()> {
        if self.control_tx.send(frame).await.is_err() {
            self.shutdown_streams(&ConnectionError::Closed);
            self.shutdown.cancel();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Fragment and enqueue a data-plane frame.
    async fn send_data(&mut self, frame: Frame) -> ControlFlow<()> {
        for fragment in self.fragmenter.split(frame) {
            if self.data_tx.send(fragment).await.is_err() {
                self.shutdown_streams(&ConnectionError::Closed);
                self.shutdown.cancel();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

fn zero_demand_error() -> ConnectionError {
    ConnectionError::Protocol(FrameError::InvalidCombination {
        reason: "request-N must be at least one",
    })
}
