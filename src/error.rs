//! Canonical runtime error surface.
//!
//! [`ConnectionError`] is the error subscribers and requesters observe. It
//! is cheaply cloneable so one terminal condition can fan out to every
//! live stream on the connection; transport and framing failures are
//! wrapped in [`Arc`] for that reason.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    fragment::ReassemblyError,
    frame::{ErrorCode, FrameError},
    framing::FramingError,
};

/// Errors surfaced by the duplex socket and its streams.
#[derive(Clone, Debug, Error)]
pub enum ConnectionError {
    /// The connection has closed; all streams terminate with this.
    #[error("connection closed")]
    Closed,
    /// The stream was cancelled.
    #[error("stream cancelled")]
    Cancelled,
    /// The local stream identifier space is exhausted; fatal for the
    /// connection.
    #[error("stream identifiers exhausted")]
    StreamIdExhausted,
    /// Lease admission is active and no lease permits remain.
    #[error("no active lease")]
    NoLease,
    /// A producer emitted past a pause; a bug in the producer, fatal for
    /// the connection.
    #[error("stream {stream_id} produced beyond its granted credit")]
    CreditOverrun {
        /// Stream whose producer overran.
        stream_id: crate::frame::StreamId,
    },
    /// The peer stopped answering keepalives.
    #[error("keepalive timeout after {elapsed:?}")]
    KeepaliveTimeout {
        /// Time since the peer was last heard.
        elapsed: Duration,
    },
    /// The peer sent an ERROR frame.
    #[error("peer error {code}: {message}")]
    Remote {
        /// Protocol error code from the frame.
        code: ErrorCode,
        /// UTF-8 rendering of the error data.
        message: String,
    },
    /// An inbound frame violated the protocol; fatal for the connection.
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),
    /// Fragment re-assembly failed for a stream.
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    /// The length-prefixed layer failed.
    #[error("framing error: {0}")]
    Framing(Arc<FramingError>),
    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),
}

impl ConnectionError {
    /// Build the error representing a peer ERROR frame.
    #[must_use]
    pub fn remote(code: ErrorCode, data: &[u8]) -> Self {
        Self::Remote {
            code,
            message: String::from_utf8_lossy(data).into_owned(),
        }
    }

    /// Whether the peer reported an application-level failure for a
    /// single stream.
    #[must_use]
    pub const fn is_application(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                code: ErrorCode::ApplicationError,
                ..
            }
        )
    }
}

impl From<FramingError> for ConnectionError {
    fn from(error: FramingError) -> Self { Self::Framing(Arc::new(error)) }
}

impl From<std::io::Error> for ConnectionError {
    fn from(error: std::io::Error) -> Self { Self::Transport(Arc::new(error)) }
}

#[cfg(test)]
mod tests {
    use crate::frame::ErrorCode;

    use super::ConnectionError;

    #[test]
    fn remote_errors_render_utf8_lossily() {
        let error = ConnectionError::remote(ErrorCode::ApplicationError, b"boom");
        assert!(error.is_application());
        assert_eq!(error.to_string(), "peer error ApplicationError: boom");
    }

    #[test]
    fn errors_clone_for_fan_out() {
        let error: ConnectionError = std::io::Error::other("gone").into();
        let copy = error.clone();
        assert_eq!(copy.to_string(), error.to_string());
    }
}
