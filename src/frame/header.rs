//! Fixed six-byte frame header: stream identifier, frame type, and flags.

use bytes::{Buf, BufMut, BytesMut};

use super::{
    error::FrameError,
    flags::Flags,
};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 6;

/// Number of bits available for the stream identifier.
const STREAM_ID_BITS: u32 = 31;

/// Largest representable stream identifier.
pub const MAX_STREAM_ID: u32 = (1 << STREAM_ID_BITS) - 1;

/// Number of bits reserved for flags in the type/flags word.
const FLAGS_BITS: u16 = 10;

/// A 31-bit stream identifier; the top bit is always zero on the wire.
///
/// Identifier `0` addresses the connection itself. Odd identifiers belong to
/// the client's allocation space, even identifiers to the server's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

impl StreamId {
    /// The connection-level stream.
    pub const ZERO: Self = Self(0);

    /// Construct a stream identifier, rejecting values with the top bit set.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value > MAX_STREAM_ID {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Return the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }

    /// Whether this is the connection-level stream.
    #[must_use]
    pub const fn is_connection(self) -> bool { self.0 == 0 }

    /// Whether the identifier sits in the client (odd) allocation space.
    #[must_use]
    pub const fn is_client_assigned(self) -> bool { self.0 % 2 == 1 }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Wire frame type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Connection setup, first frame from a client.
    Setup = 0x01,
    /// Server grant of request permits.
    Lease = 0x02,
    /// Liveness probe carrying resume positions.
    Keepalive = 0x03,
    /// Single-response request.
    RequestResponse = 0x04,
    /// Fire-and-forget request.
    RequestFnf = 0x05,
    /// Stream request with initial demand.
    RequestStream = 0x06,
    /// Bidirectional channel request.
    RequestChannel = 0x07,
    /// Additional consumer demand for a stream.
    RequestN = 0x08,
    /// Stream cancellation.
    Cancel = 0x09,
    /// Stream data, possibly fragmented.
    Payload = 0x0A,
    /// Stream- or connection-level error.
    Error = 0x0B,
    /// Connection-level metadata, no response.
    MetadataPush = 0x0C,
    /// Session resumption, replaces SETUP on reconnect.
    Resume = 0x0D,
    /// Successful resumption acknowledgement.
    ResumeOk = 0x0E,
}

impl FrameType {
    /// Decode a frame type code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::Setup,
            0x02 => Self::Lease,
            0x03 => Self::Keepalive,
            0x04 => Self::RequestResponse,
            0x05 => Self::RequestFnf,
            0x06 => Self::RequestStream,
            0x07 => Self::RequestChannel,
            0x08 => Self::RequestN,
            0x09 => Self::Cancel,
            0x0A => Self::Payload,
            0x0B => Self::Error,
            0x0C => Self::MetadataPush,
            0x0D => Self::Resume,
            0x0E => Self::ResumeOk,
            _ => return None,
        })
    }

    /// Return the wire code for this type.
    #[must_use]
    pub const fn code(self) -> u8 { self as u8 }

    /// Whether frames of this type advance the resume byte counters.
    ///
    /// Connection housekeeping (SETUP, LEASE, KEEPALIVE, METADATA_PUSH and
    /// the resume handshake itself) is excluded; everything that carries
    /// stream semantics counts.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::RequestResponse
                | Self::RequestFnf
                | Self::RequestStream
                | Self::RequestChannel
                | Self::RequestN
                | Self::Cancel
                | Self::Payload
                | Self::Error
        )
    }
}

/// The decoded six-byte header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Stream the frame belongs to; zero for connection-level frames.
    pub stream_id: StreamId,
    /// Frame type code.
    pub frame_type: FrameType,
    /// Ten-bit flag word.
    pub flags: Flags,
}

impl FrameHeader {
    /// Construct a header.
    #[must_use]
    pub const fn new(stream_id: StreamId, frame_type: FrameType, flags: Flags) -> Self {
        Self {
            stream_id,
            frame_type,
            flags,
        }
    }

    /// Append the six header bytes to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.stream_id.get());
        dst.put_u16((u16::from(self.frame_type.code()) << FLAGS_BITS) | self.flags.bits());
    }

    /// Decode a header from the front of `src`, advancing past it.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] when fewer than six bytes remain or
    /// the stream identifier has its top bit set, and
    /// [`FrameError::UnknownType`] for an unassigned type code.
    pub fn decode(src: &mut impl Buf) -> Result<Self, FrameError> {
        if src.remaining() < HEADER_LEN {
            return Err(FrameError::Malformed {
                have: src.remaining(),
                need: HEADER_LEN,
            });
        }
        let raw_id = src.get_u32();
        let Some(stream_id) = StreamId::new(raw_id) else {
            return Err(FrameError::InvalidCombination {
                reason: "stream identifier has its top bit set",
            });
        };
        let word = src.get_u16();
        #[expect(clippy::cast_possible_truncation, reason = "shift leaves six bits")]
        let code = (word >> FLAGS_BITS) as u8;
        let frame_type = FrameType::from_code(code).ok_or(FrameError::UnknownType { code })?;
        let flags = Flags::from_bits_truncate(word);
        Ok(Self {
            stream_id,
            frame_type,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader::new(
            StreamId::new(5).unwrap(),
            FrameType::Payload,
            Flags::NEXT | Flags::COMPLETE,
        );
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        let decoded = FrameHeader::decode(&mut buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn stream_id_rejects_high_bit() {
        assert!(StreamId::new(MAX_STREAM_ID).is_some());
        assert!(StreamId::new(MAX_STREAM_ID + 1).is_none());
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 1, 0xFC, 0x00]);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(FrameError::UnknownType { code: 0x3F })
        ));
    }

    #[test]
    fn short_header_is_malformed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(FrameError::Malformed { have: 3, need: 6 })
        ));
    }

    #[test]
    fn resumable_classification_excludes_housekeeping() {
        assert!(FrameType::Payload.is_resumable());
        assert!(FrameType::Cancel.is_resumable());
        assert!(!FrameType::Keepalive.is_resumable());
        assert!(!FrameType::Setup.is_resumable());
        assert!(!FrameType::Lease.is_resumable());
        assert!(!FrameType::Resume.is_resumable());
    }
}
