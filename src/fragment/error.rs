//! Errors raised by the fragmentation layer.

use thiserror::Error;

use crate::frame::StreamId;

/// Errors raised while configuring or splitting outbound frames.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    /// The requested MTU falls outside the permitted range.
    #[error("invalid fragmentation mtu {mtu}: must be between {min} and {max}")]
    InvalidMtu {
        /// Requested MTU.
        mtu: usize,
        /// Smallest permitted value.
        min: usize,
        /// Largest permitted value.
        max: usize,
    },
}

/// Errors raised while re-assembling inbound fragments.
///
/// Either failure is terminal for the affected stream; the buffered state
/// is discarded before the error is returned.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// The accumulated payload would exceed the configured cap.
    #[error("stream {stream_id} exceeds reassembly cap: {attempted} bytes > {limit} byte limit")]
    Overflow {
        /// Stream whose buffer overflowed.
        stream_id: StreamId,
        /// Total size that triggered the guard.
        attempted: usize,
        /// Configured cap.
        limit: usize,
    },
    /// A non-PAYLOAD frame arrived while fragments were pending.
    #[error("stream {stream_id} received a non-payload frame mid-reassembly")]
    UnexpectedContinuation {
        /// Stream with a pending buffer.
        stream_id: StreamId,
    },
}
