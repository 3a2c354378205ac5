//! The handler surface a peer's requests are dispatched to.
//!
//! Users implement [`Responder`] for the interactions they serve; the
//! defaults decline. Handler failures map to stream-level
//! APPLICATION_ERROR frames and never affect the connection.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream, stream::BoxStream};
use thiserror::Error;

use super::requester::PayloadStream;
use crate::payload::Payload;

/// Failure reported by a responder handler.
///
/// The message bytes travel to the peer in the ERROR frame data.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ResponderError {
    /// Diagnostic carried to the peer.
    pub message: String,
}

impl ResponderError {
    /// Build an error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of a responder handler.
pub type ResponderResult = Result<Payload, ResponderError>;

/// User-supplied handlers for inbound interactions.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Serve a request/response interaction.
    async fn request_response(&self, payload: Payload) -> ResponderResult {
        let _ = payload;
        Err(ResponderError::new("request-response unsupported"))
    }

    /// Observe a fire-and-forget request.
    async fn fire_and_forget(&self, payload: Payload) { let _ = payload; }

    /// Serve a stream interaction.
    ///
    /// The returned sequence is pulled one item per credit granted by the
    /// peer; producing stops when the subscription is cancelled.
    fn request_stream(&self, payload: Payload) -> BoxStream<'static, ResponderResult> {
        let _ = payload;
        stream::iter([Err(ResponderError::new("request-stream unsupported"))]).boxed()
    }

    /// Serve a channel interaction.
    ///
    /// `payloads` yields the requester's payloads; demand for them is
    /// granted through [`PayloadStream::request`].
    fn request_channel(&self, payloads: PayloadStream) -> BoxStream<'static, ResponderResult> {
        // Hold the inbound stream until the rejection is emitted, so the
        // peer sees the error rather than a cancellation.
        stream::once(async move {
            let _inbound = payloads;
            Err(ResponderError::new("request-channel unsupported"))
        })
        .boxed()
    }

    /// Observe connection-level metadata.
    async fn metadata_push(&self, metadata: Bytes) { let _ = metadata; }
}

/// Placeholder installed before the acceptor has produced a responder.
///
/// Inbound requests cannot arrive while it is installed because the
/// transport is attached only after acceptance.
pub(crate) struct PendingResponder;

#[async_trait]
impl Responder for PendingResponder {}
