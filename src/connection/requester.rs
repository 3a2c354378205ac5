//! Requester surface of the duplex socket.
//!
//! [`DuplexSocket`] is a cloneable handle whose operations enqueue
//! intents on the multiplexer's channel; nothing here touches connection
//! state directly. [`PayloadStream`] is the subscription half of stream
//! and channel interactions, granting demand explicitly and cancelling
//! on drop.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};

use super::event::Intent;
use crate::{error::ConnectionError, frame::StreamId, payload::Payload};

/// Cloneable requester handle for one connection.
#[derive(Clone)]
pub struct DuplexSocket {
    intents: mpsc::Sender<Intent>,
}

impl DuplexSocket {
    pub(crate) fn new(intents: mpsc::Sender<Intent>) -> Self { Self { intents } }

    async fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ConnectionError>>) -> Intent,
    ) -> Result<T, ConnectionError> {
        let (reply, answer) = oneshot::channel();
        self.intents
            .send(build(reply))
            .await
            .map_err(|_| ConnectionError::Closed)?;
        answer.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Send a request and await its single response payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Remote`] when the responder answers
    /// with an ERROR frame, [`ConnectionError::NoLease`] under exhausted
    /// lease admission, and [`ConnectionError::Closed`] once the
    /// connection is gone.
    pub async fn request_response(&self, payload: Payload) -> Result<Payload, ConnectionError> {
        self.submit(|reply| Intent::RequestResponse { payload, reply })
            .await
    }

    /// Open a stream with an initial demand of `initial_n` payloads.
    ///
    /// Further demand is granted through [`PayloadStream::request`];
    /// dropping the stream cancels it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoLease`] under exhausted lease
    /// admission and [`ConnectionError::Closed`] once the connection is
    /// gone.
    pub async fn request_stream(
        &self,
        payload: Payload,
        initial_n: u32,
    ) -> Result<PayloadStream, ConnectionError> {
        self.submit(|reply| Intent::RequestStream {
            payload,
            initial_n,
            reply,
        })
        .await
    }

    /// Open a bidirectional channel.
    ///
    /// `first` travels in the opening frame; `outbound` supplies the rest
    /// of this side's payloads, pulled as the peer grants demand. The
    /// returned stream yields the peer's payloads under `initial_n`
    /// initial demand.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoLease`] under exhausted lease
    /// admission and [`ConnectionError::Closed`] once the connection is
    /// gone.
    pub async fn request_channel(
        &self,
        first: Payload,
        outbound: impl Stream<Item = Payload> + Send + 'static,
        initial_n: u32,
    ) -> Result<PayloadStream, ConnectionError> {
        self.submit(|reply| Intent::RequestChannel {
            initial_n,
            first,
            outbound: outbound.boxed(),
            reply,
        })
        .await
    }

    /// Send a request with no response; resolution means accepted for
    /// transmission only.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoLease`] under exhausted lease
    /// admission and [`ConnectionError::Closed`] once the connection is
    /// gone.
    pub async fn fire_and_forget(&self, payload: Payload) -> Result<(), ConnectionError> {
        self.submit(|reply| Intent::FireAndForget { payload, reply })
            .await
    }

    /// Push connection-level metadata; best-effort delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] once the connection is gone.
    pub async fn metadata_push(&self, metadata: Bytes) -> Result<(), ConnectionError> {
        self.submit(|reply| Intent::MetadataPush { metadata, reply })
            .await
    }

    /// Close the connection: every stream terminates with
    /// [`ConnectionError::Closed`] and the peer receives a
    /// CONNECTION_CLOSE error frame.
    pub async fn close(&self) { let _ = self.intents.send(Intent::Close).await; }
}

/// Subscription to a stream or channel's inbound payloads.
///
/// Yields `Ok` payloads in arrival order, terminating with `None` after
/// COMPLETE or exactly one `Err` after an ERROR frame, cancellation, or
/// connection loss. Dropping the subscription before the terminal signal
/// sends CANCEL for the stream.
pub struct PayloadStream {
    stream_id: StreamId,
    items: mpsc::UnboundedReceiver<Result<Payload, ConnectionError>>,
    intents: mpsc::Sender<Intent>,
    terminated: bool,
}

impl PayloadStream {
    pub(crate) fn new(
        stream_id: StreamId,
        items: mpsc::UnboundedReceiver<Result<Payload, ConnectionError>>,
        intents: mpsc::Sender<Intent>,
    ) -> Self {
        Self {
            stream_id,
            items,
            intents,
            terminated: false,
        }
    }

    /// Identifier of the underlying stream.
    #[must_use]
    pub const fn stream_id(&self) -> StreamId { self.stream_id }

    /// Grant the producer `n` more payloads of demand.
    pub async fn request(&self, n: u32) {
        let _ = self
            .intents
            .send(Intent::SubscriberRequestN {
                stream_id: self.stream_id,
                n,
            })
            .await;
    }
}

impl Stream for PayloadStream {
    type Item = Result<Payload, ConnectionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.items.poll_recv(cx) {
            Poll::Ready(Some(Err(error))) => {
                self.terminated = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.terminated = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        if !self.terminated {
            let _ = self.intents.try_send(Intent::SubscriberCancel {
                stream_id: self.stream_id,
            });
        }
    }
}
