//! Frame-level error taxonomy and wire error codes.
//!
//! [`FrameError`] covers structural failures while decoding a single frame
//! buffer. [`ErrorCode`] is the protocol-defined code carried by ERROR
//! frames; unknown codes are preserved rather than rejected so peers can
//! extend the space.

use thiserror::Error;

/// Structural failures raised by the frame codec.
///
/// Any of these on an inbound frame is fatal at the connection level.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ended before a required field.
    #[error("malformed frame: have {have} bytes, need {need}")]
    Malformed {
        /// Bytes available.
        have: usize,
        /// Bytes required to finish the current field.
        need: usize,
    },
    /// The six-bit type code is unassigned.
    #[error("unknown frame type {code:#04x}")]
    UnknownType {
        /// The rejected code.
        code: u8,
    },
    /// Fields are individually valid but mutually inconsistent.
    #[error("invalid field combination: {reason}")]
    InvalidCombination {
        /// Human-readable constraint that was violated.
        reason: &'static str,
    },
}

/// Protocol error codes carried by ERROR frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The SETUP frame is invalid.
    InvalidSetup,
    /// The server does not support a capability the SETUP requires.
    UnsupportedSetup,
    /// The server acceptor declined the connection.
    RejectedSetup,
    /// The server declined to resume the session.
    RejectedResume,
    /// Connection-level protocol violation; the connection closes.
    ConnectionError,
    /// Orderly connection shutdown.
    ConnectionClose,
    /// The responder signalled an application failure for one stream.
    ApplicationError,
    /// The responder declined the request (for example, lease exhausted).
    Rejected,
    /// The responder observed a cancellation.
    Canceled,
    /// The request was understood but semantically invalid.
    Invalid,
    /// A code outside the assigned table, preserved verbatim.
    Other(u32),
}

impl ErrorCode {
    /// Decode a wire code.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        match code {
            0x0000_0001 => Self::InvalidSetup,
            0x0000_0002 => Self::UnsupportedSetup,
            0x0000_0003 => Self::RejectedSetup,
            0x0000_0004 => Self::RejectedResume,
            0x0000_0101 => Self::ConnectionError,
            0x0000_0102 => Self::ConnectionClose,
            0x0000_0201 => Self::ApplicationError,
            0x0000_0202 => Self::Rejected,
            0x0000_0203 => Self::Canceled,
            0x0000_0204 => Self::Invalid,
            other => Self::Other(other),
        }
    }

    /// Return the wire value.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::InvalidSetup => 0x0000_0001,
            Self::UnsupportedSetup => 0x0000_0002,
            Self::RejectedSetup => 0x0000_0003,
            Self::RejectedResume => 0x0000_0004,
            Self::ConnectionError => 0x0000_0101,
            Self::ConnectionClose => 0x0000_0102,
            Self::ApplicationError => 0x0000_0201,
            Self::Rejected => 0x0000_0202,
            Self::Canceled => 0x0000_0203,
            Self::Invalid => 0x0000_0204,
            Self::Other(code) => code,
        }
    }

    /// Whether the code terminates the whole connection rather than a
    /// single stream.
    #[must_use]
    pub const fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::InvalidSetup
                | Self::UnsupportedSetup
                | Self::RejectedSetup
                | Self::RejectedResume
                | Self::ConnectionError
                | Self::ConnectionClose
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "{code:#010x}"),
            known => write!(f, "{known:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;

    #[test]
    fn codes_round_trip() {
        for code in [
            ErrorCode::InvalidSetup,
            ErrorCode::UnsupportedSetup,
            ErrorCode::RejectedSetup,
            ErrorCode::RejectedResume,
            ErrorCode::ConnectionError,
            ErrorCode::ConnectionClose,
            ErrorCode::ApplicationError,
            ErrorCode::Rejected,
            ErrorCode::Canceled,
            ErrorCode::Invalid,
            ErrorCode::Other(0xDEAD_BEEF),
        ] {
            assert_eq!(ErrorCode::from_u32(code.to_u32()), code);
        }
    }

    #[test]
    fn connection_level_split() {
        assert!(ErrorCode::ConnectionClose.is_connection_level());
        assert!(!ErrorCode::ApplicationError.is_connection_level());
        assert!(!ErrorCode::Other(0xF000).is_connection_level());
    }
}
