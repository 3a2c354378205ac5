//! Typed wire frames and the per-frame codec.
//!
//! A [`Frame`] is the unit the runtime exchanges: a 31-bit stream
//! identifier plus a type-specific [`FrameBody`]. The codec in
//! [`codec`] converts frames to and from full-frame byte buffers; it is
//! stateless and strictly per-frame, leaving stream bookkeeping to the
//! connection layer.

pub mod codec;
pub mod error;
mod flags;
mod header;

#[cfg(test)]
mod tests;

use bytes::Bytes;

pub use error::{ErrorCode, FrameError};
pub use flags::Flags;
pub use header::{FrameHeader, FrameType, HEADER_LEN, MAX_STREAM_ID, StreamId};

use crate::payload::Payload;

/// Protocol version advertised in SETUP and RESUME frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    /// Major version number.
    pub major: u16,
    /// Minor version number.
    pub minor: u16,
}

impl Version {
    /// The version this runtime speaks.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Type-specific frame contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameBody {
    /// Connection setup; the first frame a client sends.
    Setup {
        /// Protocol version the client speaks.
        version: Version,
        /// Keepalive interval in milliseconds.
        keepalive_interval_ms: u32,
        /// Maximum lifetime without a keepalive response, in milliseconds.
        max_lifetime_ms: u32,
        /// Resume token; presence implies the RESUME flag.
        resume_token: Option<Bytes>,
        /// Whether the client requires lease-based admission.
        lease: bool,
        /// MIME type describing metadata sections.
        metadata_mime: String,
        /// MIME type describing data sections.
        data_mime: String,
        /// Setup payload handed to the server acceptor.
        payload: Payload,
    },
    /// Server grant of request permits.
    Lease {
        /// Validity window in milliseconds; zero revokes.
        ttl_ms: u32,
        /// Number of requests permitted within the window.
        requests: u32,
        /// Optional opaque metadata.
        metadata: Option<Bytes>,
    },
    /// Liveness probe.
    Keepalive {
        /// Whether the receiver must reply.
        respond: bool,
        /// Sender's resumable-bytes-read position.
        last_received: u64,
        /// Opaque data echoed back by the receiver.
        data: Bytes,
    },
    /// Single-response request; opens a stream.
    RequestResponse {
        /// More fragments of this request follow.
        follows: bool,
        /// Request payload.
        payload: Payload,
    },
    /// Fire-and-forget request; opens and immediately closes a stream.
    RequestFnf {
        /// More fragments of this request follow.
        follows: bool,
        /// Request payload.
        payload: Payload,
    },
    /// Stream request.
    RequestStream {
        /// Initial consumer demand, at least one.
        initial_n: u32,
        /// More fragments of this request follow.
        follows: bool,
        /// Request payload.
        payload: Payload,
    },
    /// Bidirectional channel request.
    RequestChannel {
        /// Initial consumer demand, at least one.
        initial_n: u32,
        /// More fragments of this request follow.
        follows: bool,
        /// The requester completes its side with this first payload.
        complete: bool,
        /// First outbound payload.
        payload: Payload,
    },
    /// Additional consumer demand.
    RequestN {
        /// Demand to add, at least one.
        n: u32,
    },
    /// Stream cancellation.
    Cancel,
    /// Stream data.
    Payload {
        /// More fragments of this logical payload follow.
        follows: bool,
        /// The sender completes its side.
        complete: bool,
        /// The frame carries subscriber-visible data.
        next: bool,
        /// Carried payload.
        payload: Payload,
    },
    /// Stream- or connection-level error.
    Error {
        /// Protocol error code.
        code: ErrorCode,
        /// UTF-8 diagnostic bytes.
        data: Bytes,
    },
    /// Connection-level metadata with no response.
    MetadataPush {
        /// Opaque metadata bytes.
        metadata: Bytes,
    },
    /// Session resumption request; replaces SETUP on reconnect.
    Resume {
        /// Protocol version the client speaks.
        version: Version,
        /// Opaque session token from the original SETUP.
        token: Bytes,
        /// Client's resumable-bytes-read position.
        last_received_server_position: u64,
        /// Earliest client position still available for replay.
        first_available_client_position: u64,
    },
    /// Successful resumption acknowledgement.
    ResumeOk {
        /// Server's resumable-bytes-read position.
        last_received_client_position: u64,
    },
}

/// One wire frame: stream identifier plus typed body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Stream the frame belongs to; zero addresses the connection.
    pub stream_id: StreamId,
    /// Type-specific contents.
    pub body: FrameBody,
}

impl Frame {
    /// Construct a frame from parts.
    #[must_use]
    pub const fn new(stream_id: StreamId, body: FrameBody) -> Self { Self { stream_id, body } }

    /// The wire type of this frame.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match &self.body {
            FrameBody::Setup { .. } => FrameType::Setup,
            FrameBody::Lease { .. } => FrameType::Lease,
            FrameBody::Keepalive { .. } => FrameType::Keepalive,
            FrameBody::RequestResponse { .. } => FrameType::RequestResponse,
            FrameBody::RequestFnf { .. } => FrameType::RequestFnf,
            FrameBody::RequestStream { .. } => FrameType::RequestStream,
            FrameBody::RequestChannel { .. } => FrameType::RequestChannel,
            FrameBody::RequestN { .. } => FrameType::RequestN,
            FrameBody::Cancel => FrameType::Cancel,
            FrameBody::Payload { .. } => FrameType::Payload,
            FrameBody::Error { .. } => FrameType::Error,
            FrameBody::MetadataPush { .. } => FrameType::MetadataPush,
            FrameBody::Resume { .. } => FrameType::Resume,
            FrameBody::ResumeOk { .. } => FrameType::ResumeOk,
        }
    }

    /// Whether this frame advances the resume byte counters.
    ///
    /// Connection-level ERROR frames are excluded: they terminate the
    /// connection, so there is nothing left to resume.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        if matches!(self.body, FrameBody::Error { .. }) && self.stream_id.is_connection() {
            return false;
        }
        self.frame_type().is_resumable()
    }

    /// Build a stream-level error frame.
    #[must_use]
    pub fn error(stream_id: StreamId, code: ErrorCode, message: impl Into<Bytes>) -> Self {
        Self::new(
            stream_id,
            FrameBody::Error {
                code,
                data: message.into(),
            },
        )
    }

    /// Build a connection-level error frame.
    #[must_use]
    pub fn connection_error(code: ErrorCode, message: impl Into<Bytes>) -> Self {
        Self::error(StreamId::ZERO, code, message)
    }

    /// Build a REQUEST_RESPONSE frame.
    #[must_use]
    pub const fn request_response(stream_id: StreamId, payload: Payload) -> Self {
        Self::new(
            stream_id,
            FrameBody::RequestResponse {
                follows: false,
                payload,
            },
        )
    }

    /// Build a REQUEST_FNF frame.
    #[must_use]
    pub const fn request_fnf(stream_id: StreamId, payload: Payload) -> Self {
        Self::new(
            stream_id,
            FrameBody::RequestFnf {
                follows: false,
                payload,
            },
        )
    }

    /// Build a REQUEST_STREAM frame.
    #[must_use]
    pub const fn request_stream(stream_id: StreamId, initial_n: u32, payload: Payload) -> Self {
        Self::new(
            stream_id,
            FrameBody::RequestStream {
                initial_n,
                follows: false,
                payload,
            },
        )
    }

    /// Build a REQUEST_CHANNEL frame.
    #[must_use]
    pub const fn request_channel(stream_id: StreamId, initial_n: u32, payload: Payload) -> Self {
        Self::new(
            stream_id,
            FrameBody::RequestChannel {
                initial_n,
                follows: false,
                complete: false,
                payload,
            },
        )
    }

    /// Build a REQUEST_N frame.
    #[must_use]
    pub const fn request_n(stream_id: StreamId, n: u32) -> Self {
        Self::new(stream_id, FrameBody::RequestN { n })
    }

    /// Build a CANCEL frame.
    #[must_use]
    pub const fn cancel(stream_id: StreamId) -> Self { Self::new(stream_id, FrameBody::Cancel) }

    /// Build a PAYLOAD frame carrying data.
    #[must_use]
    pub const fn payload(stream_id: StreamId, payload: Payload, complete: bool) -> Self {
        Self::new(
            stream_id,
            FrameBody::Payload {
                follows: false,
                complete,
                next: true,
                payload,
            },
        )
    }

    /// Build a PAYLOAD frame that only completes the stream.
    #[must_use]
    pub const fn payload_complete(stream_id: StreamId) -> Self {
        Self::new(
            stream_id,
            FrameBody::Payload {
                follows: false,
                complete: true,
                next: false,
                payload: Payload::empty(),
            },
        )
    }

    /// Build a KEEPALIVE frame.
    #[must_use]
    pub const fn keepalive(respond: bool, last_received: u64) -> Self {
        Self::new(
            StreamId::ZERO,
            FrameBody::Keepalive {
                respond,
                last_received,
                data: Bytes::new(),
            },
        )
    }

    /// Build a METADATA_PUSH frame.
    #[must_use]
    pub const fn metadata_push(metadata: Bytes) -> Self {
        Self::new(StreamId::ZERO, FrameBody::MetadataPush { metadata })
    }

    /// Build a LEASE frame.
    #[must_use]
    pub const fn lease(ttl_ms: u32, requests: u32, metadata: Option<Bytes>) -> Self {
        Self::new(
            StreamId::ZERO,
            FrameBody::Lease {
                ttl_ms,
                requests,
                metadata,
            },
        )
    }

    /// Build a RESUME_OK frame.
    #[must_use]
    pub const fn resume_ok(last_received_client_position: u64) -> Self {
        Self::new(
            StreamId::ZERO,
            FrameBody::ResumeOk {
                last_received_client_position,
            },
        )
    }
}
