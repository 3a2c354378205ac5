//! Per-connection writer task.
//!
//! Drains the control and data queues, encodes frames, counts resumable
//! bytes before framing, and pushes buffers into the current transport
//! sink. Control frames go first, bounded by the fairness burst limit so
//! payload traffic cannot starve. While no sink is attached the task
//! keeps draining into a pending buffer, preserving emission order for
//! replay after resumption; the queues never back up into the
//! multiplexer.

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use futures::SinkExt;
use log::{error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    WriterSink,
    event::Intent,
    fairness::{FairnessConfig, FairnessTracker},
};
use crate::{frame::{Frame, codec}, resume::ResumeCounters};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
    Control,
    Data,
}

pub(crate) struct Writer {
    control_rx: mpsc::Receiver<Frame>,
    data_rx: mpsc::Receiver<Frame>,
    sink_rx: mpsc::Receiver<WriterSink>,
    intents: mpsc::Sender<Intent>,
    counters: Arc<ResumeCounters>,
    fairness: FairnessTracker,
    shutdown: CancellationToken,
    sink: Option<WriterSink>,
    pending: VecDeque<Bytes>,
}

impl Writer {
    pub fn new(
        control_rx: mpsc::Receiver<Frame>,
        data_rx: mpsc::Receiver<Frame>,
        sink_rx: mpsc::Receiver<WriterSink>,
        intents: mpsc::Sender<Intent>,
        counters: Arc<ResumeCounters>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            control_rx,
            data_rx,
            sink_rx,
            intents,
            counters,
            fairness: FairnessTracker::new(FairnessConfig::default()),
            shutdown,
            sink: None,
            pending: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! { biased;
                () = self.shutdown.cancelled() => break,
                sink = self.sink_rx.recv() => match sink {
                    Some(sink) => self.install_sink(sink).await,
                    None => break,
                },
                frame = Self::next_frame(
                    &mut self.control_rx,
                    &mut self.data_rx,
                    &mut self.fairness,
                ) => match frame {
                    Some((class, frame)) => self.dispatch(class, frame).await,
                    None => break,
                },
            }
        }
        self.drain_on_shutdown().await;
    }

    /// Receive the next frame, control before data, with a bounded burst.
    async fn next_frame(
        control_rx: &mut mpsc::Receiver<Frame>,
        data_rx: &mut mpsc::Receiver<Frame>,
        fairness: &mut FairnessTracker,
    ) -> Option<(Class, Frame)> {
        if fairness.should_yield() {
            if let Ok(frame) = data_rx.try_recv() {
                return Some((Class::Data, frame));
            }
            fairness.reset();
        }
        tokio::select! { biased;
            frame = control_rx.recv() => frame.map(|frame| (Class::Control, frame)),
            frame = data_rx.recv() => frame.map(|frame| (Class::Data, frame)),
        }
    }

    async fn dispatch(&mut self, class: Class, frame: Frame) {
        match class {
            Class::Control => self.fairness.after_control(),
            Class::Data => self.fairness.after_data(),
        }
        let Some(buffer) = self.encode(&frame) else {
            return;
        };
        if frame.is_resumable() {
            self.counters.add_written(buffer.len() as u64);
        }
        self.forward(buffer).await;
    }

    fn encode(&self, frame: &Frame) -> Option<Bytes> {
        match codec::encode(frame) {
            Ok(buffer) => Some(buffer),
            Err(fault) => {
                // Locally built frames should always encode; treat a
                // failure as a bug worth surfacing, not a silent drop.
                error!("dropping unencodable outbound frame: {fault}");
                None
            }
        }
    }

    async fn forward(&mut self, buffer: Bytes) {
        let Some(sink) = &mut self.sink else {
            self.pending.push_back(buffer);
            return;
        };
        if let Err(fault) = sink.send(buffer.clone()).await {
            warn!("transport write failed: {fault}");
            self.pending.push_back(buffer);
            self.sink = None;
            let _ = self.intents.send(Intent::TransportLost).await;
        }
    }

    /// Wire up a freshly attached transport, replaying anything buffered
    /// while detached.
    async fn install_sink(&mut self, mut sink: WriterSink) {
        while let Some(buffer) = self.pending.front() {
            if let Err(fault) = sink.feed(buffer.clone()).await {
                warn!("replay write failed: {fault}");
                let _ = self.intents.send(Intent::TransportLost).await;
                return;
            }
            self.pending.pop_front();
        }
        if let Err(fault) = sink.flush().await {
            warn!("replay flush failed: {fault}");
            let _ = self.intents.send(Intent::TransportLost).await;
            return;
        }
        self.sink = Some(sink);
    }

    /// Push out whatever is already queued, then close the sink.
    ///
    /// Gives the connection-close ERROR frame a chance to reach the peer
    /// before the transport is released.
    async fn drain_on_shutdown(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        let mut remaining = Vec::new();
        while let Ok(frame) = self.control_rx.try_recv() {
            remaining.push(frame);
        }
        while let Ok(frame) = self.data_rx.try_recv() {
            remaining.push(frame);
        }
        for frame in remaining {
            let Some(buffer) = self.encode(&frame) else {
                continue;
            };
            if frame.is_resumable() {
                self.counters.add_written(buffer.len() as u64);
            }
            if sink.feed(buffer).await.is_err() {
                return;
            }
        }
        let _ = sink.flush().await;
        let _ = sink.close().await;
    }
}
