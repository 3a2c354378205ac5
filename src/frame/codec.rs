//! Stateless per-frame encode and decode.
//!
//! [`encode`] lays a frame out as header plus type-specific body;
//! [`decode`] parses a full-frame buffer back. Neither allocates stream
//! identifiers nor tracks state. All multibyte integers are big-endian;
//! metadata on payload-bearing frames is preceded by a 24-bit length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    Flags,
    Frame,
    FrameBody,
    FrameError,
    FrameHeader,
    FrameType,
    StreamId,
    Version,
    error::ErrorCode,
};
use crate::payload::Payload;

/// Largest value representable in a 24-bit length prefix.
pub const MAX_U24: usize = (1 << 24) - 1;

/// Encode a frame into a full-frame buffer (header plus body, no length
/// prefix).
///
/// # Errors
///
/// Returns [`FrameError::InvalidCombination`] when a variable-length field
/// cannot be represented on the wire: metadata longer than the 24-bit
/// prefix allows, a MIME type longer than 255 bytes, or a resume token
/// longer than 65 535 bytes.
pub fn encode(frame: &Frame) -> Result<Bytes, FrameError> {
    let mut dst = BytesMut::with_capacity(super::HEADER_LEN + body_size_hint(&frame.body));
    let flags = body_flags(&frame.body)?;
    FrameHeader::new(frame.stream_id, frame.frame_type(), flags).encode(&mut dst);

    match &frame.body {
        FrameBody::Setup {
            version,
            keepalive_interval_ms,
            max_lifetime_ms,
            resume_token,
            lease: _,
            metadata_mime,
            data_mime,
            payload,
        } => {
            put_version(&mut dst, *version);
            dst.put_u32(*keepalive_interval_ms);
            dst.put_u32(*max_lifetime_ms);
            if let Some(token) = resume_token {
                put_token(&mut dst, token)?;
            }
            put_mime(&mut dst, metadata_mime)?;
            put_mime(&mut dst, data_mime)?;
            put_payload(&mut dst, payload)?;
        }
        FrameBody::Lease {
            ttl_ms,
            requests,
            metadata,
        } => {
            dst.put_u32(*ttl_ms);
            dst.put_u32(*requests);
            if let Some(metadata) = metadata {
                dst.put_slice(metadata);
            }
        }
        FrameBody::Keepalive {
            respond: _,
            last_received,
            data,
        } => {
            dst.put_u64(*last_received);
            dst.put_slice(data);
        }
        FrameBody::RequestResponse { payload, .. } | FrameBody::RequestFnf { payload, .. } => {
            put_payload(&mut dst, payload)?;
        }
        FrameBody::RequestStream {
            initial_n, payload, ..
        }
        | FrameBody::RequestChannel {
            initial_n, payload, ..
        } => {
            dst.put_u32(*initial_n);
            put_payload(&mut dst, payload)?;
        }
        FrameBody::RequestN { n } => dst.put_u32(*n),
        FrameBody::Cancel => {}
        FrameBody::Payload { payload, .. } => put_payload(&mut dst, payload)?,
        FrameBody::Error { code, data } => {
            dst.put_u32(code.to_u32());
            dst.put_slice(data);
        }
        FrameBody::MetadataPush { metadata } => dst.put_slice(metadata),
        FrameBody::Resume {
            version,
            token,
            last_received_server_position,
            first_available_client_position,
        } => {
            put_version(&mut dst, *version);
            put_token(&mut dst, token)?;
            dst.put_u64(*last_received_server_position);
            dst.put_u64(*first_available_client_position);
        }
        FrameBody::ResumeOk {
            last_received_client_position,
        } => dst.put_u64(*last_received_client_position),
    }
    Ok(dst.freeze())
}

/// Decode a full-frame buffer (header plus body) into a typed frame.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when the buffer is shorter than a
/// field requires, [`FrameError::UnknownType`] for an unassigned type
/// code, and [`FrameError::InvalidCombination`] when decoded fields are
/// mutually inconsistent (zero request-N, a PAYLOAD with no NEXT, COMPLETE,
/// or FOLLOWS flag, a connection-level type on a nonzero stream).
pub fn decode(mut src: Bytes) -> Result<Frame, FrameError> {
    let header = FrameHeader::decode(&mut src)?;
    check_stream_id(header.frame_type, header.stream_id)?;
    let flags = header.flags;

    let body = match header.frame_type {
        FrameType::Setup => decode_setup(&mut src, flags)?,
        FrameType::Lease => {
            let ttl_ms = get_u32(&mut src)?;
            let requests = get_u32(&mut src)?;
            let metadata = flags.contains(Flags::METADATA).then(|| src.split_off(0));
            FrameBody::Lease {
                ttl_ms,
                requests,
                metadata,
            }
        }
        FrameType::Keepalive => FrameBody::Keepalive {
            respond: flags.contains(Flags::RESPOND),
            last_received: get_u64(&mut src)?,
            data: src.split_off(0),
        },
        FrameType::RequestResponse => FrameBody::RequestResponse {
            follows: flags.contains(Flags::FOLLOWS),
            payload: get_payload(&mut src, flags)?,
        },
        FrameType::RequestFnf => FrameBody::RequestFnf {
            follows: flags.contains(Flags::FOLLOWS),
            payload: get_payload(&mut src, flags)?,
        },
        FrameType::RequestStream => FrameBody::RequestStream {
            initial_n: get_request_n(&mut src)?,
            follows: flags.contains(Flags::FOLLOWS),
            payload: get_payload(&mut src, flags)?,
        },
        FrameType::RequestChannel => FrameBody::RequestChannel {
            initial_n: get_request_n(&mut src)?,
            follows: flags.contains(Flags::FOLLOWS),
            complete: flags.contains(Flags::COMPLETE),
            payload: get_payload(&mut src, flags)?,
        },
        FrameType::RequestN => FrameBody::RequestN {
            n: get_request_n(&mut src)?,
        },
        FrameType::Cancel => FrameBody::Cancel,
        FrameType::Payload => {
            if !flags.contains(Flags::NEXT)
                && !flags.contains(Flags::COMPLETE)
                && !flags.contains(Flags::FOLLOWS)
            {
                return Err(FrameError::InvalidCombination {
                    reason: "PAYLOAD requires at least one of NEXT, COMPLETE, FOLLOWS",
                });
            }
            FrameBody::Payload {
                follows: flags.contains(Flags::FOLLOWS),
                complete: flags.contains(Flags::COMPLETE),
                next: flags.contains(Flags::NEXT),
                payload: get_payload(&mut src, flags)?,
            }
        }
        FrameType::Error => FrameBody::Error {
            code: ErrorCode::from_u32(get_u32(&mut src)?),
            data: src.split_off(0),
        },
        FrameType::MetadataPush => FrameBody::MetadataPush {
            metadata: src.split_off(0),
        },
        FrameType::Resume => FrameBody::Resume {
            version: get_version(&mut src)?,
            token: get_token(&mut src)?,
            last_received_server_position: get_u64(&mut src)?,
            first_available_client_position: get_u64(&mut src)?,
        },
        FrameType::ResumeOk => FrameBody::ResumeOk {
            last_received_client_position: get_u64(&mut src)?,
        },
    };

    Ok(Frame::new(header.stream_id, body))
}

fn decode_setup(src: &mut Bytes, flags: Flags) -> Result<FrameBody, FrameError> {
    let version = get_version(src)?;
    let keepalive_interval_ms = get_u32(src)?;
    let max_lifetime_ms = get_u32(src)?;
    let resume_token = if flags.contains(Flags::RESUME) {
        Some(get_token(src)?)
    } else {
        None
    };
    let metadata_mime = get_mime(src)?;
    let data_mime = get_mime(src)?;
    let payload = get_payload(src, flags)?;
    Ok(FrameBody::Setup {
        version,
        keepalive_interval_ms,
        max_lifetime_ms,
        resume_token,
        lease: flags.contains(Flags::LEASE),
        metadata_mime,
        data_mime,
        payload,
    })
}

/// Compute the header flag word implied by a body.
fn body_flags(body: &FrameBody) -> Result<Flags, FrameError> {
    Ok(match body {
        FrameBody::Setup {
            resume_token,
            lease,
            payload,
            ..
        } => Flags::EMPTY
            .with(Flags::RESUME, resume_token.is_some())
            .with(Flags::LEASE, *lease)
            .with(Flags::METADATA, payload.has_metadata()),
        FrameBody::Lease { metadata, .. } => {
            Flags::EMPTY.with(Flags::METADATA, metadata.is_some())
        }
        FrameBody::Keepalive { respond, .. } => Flags::EMPTY.with(Flags::RESPOND, *respond),
        FrameBody::RequestResponse { follows, payload }
        | FrameBody::RequestFnf { follows, payload }
        | FrameBody::RequestStream {
            follows, payload, ..
        } => Flags::EMPTY
            .with(Flags::FOLLOWS, *follows)
            .with(Flags::METADATA, payload.has_metadata()),
        FrameBody::RequestChannel {
            follows,
            complete,
            payload,
            ..
        } => Flags::EMPTY
            .with(Flags::FOLLOWS, *follows)
            .with(Flags::COMPLETE, *complete)
            .with(Flags::METADATA, payload.has_metadata()),
        FrameBody::RequestN { .. } | FrameBody::Cancel | FrameBody::Error { .. } => Flags::EMPTY,
        FrameBody::Payload {
            follows,
            complete,
            next,
            payload,
        } => {
            if !follows && !complete && !next {
                return Err(FrameError::InvalidCombination {
                    reason: "PAYLOAD requires at least one of NEXT, COMPLETE, FOLLOWS",
                });
            }
            Flags::EMPTY
                .with(Flags::FOLLOWS, *follows)
                .with(Flags::COMPLETE, *complete)
                .with(Flags::NEXT, *next)
                .with(Flags::METADATA, payload.has_metadata())
        }
        FrameBody::MetadataPush { .. } => Flags::METADATA,
        FrameBody::Resume { .. } => Flags::EMPTY.with(Flags::RESUME, true),
        FrameBody::ResumeOk { .. } => Flags::EMPTY,
    })
}

fn check_stream_id(frame_type: FrameType, stream_id: StreamId) -> Result<(), FrameError> {
    let connection_only = matches!(
        frame_type,
        FrameType::Setup
            | FrameType::Lease
            | FrameType::Keepalive
            | FrameType::MetadataPush
            | FrameType::Resume
            | FrameType::ResumeOk
    );
    if connection_only && !stream_id.is_connection() {
        return Err(FrameError::InvalidCombination {
            reason: "connection-level frame on a nonzero stream",
        });
    }
    let stream_only = matches!(
        frame_type,
        FrameType::RequestResponse
            | FrameType::RequestFnf
            | FrameType::RequestStream
            | FrameType::RequestChannel
            | FrameType::RequestN
            | FrameType::Cancel
            | FrameType::Payload
    );
    if stream_only && stream_id.is_connection() {
        return Err(FrameError::InvalidCombination {
            reason: "stream frame on the connection stream",
        });
    }
    Ok(())
}

fn body_size_hint(body: &FrameBody) -> usize {
    match body {
        FrameBody::Setup { payload, .. } => 64 + payload.metadata_len() + payload.data_len(),
        FrameBody::Payload { payload, .. }
        | FrameBody::RequestResponse { payload, .. }
        | FrameBody::RequestFnf { payload, .. }
        | FrameBody::RequestStream { payload, .. }
        | FrameBody::RequestChannel { payload, .. } => {
            8 + payload.metadata_len() + payload.data_len()
        }
        FrameBody::Error { data, .. } => 4 + data.len(),
        FrameBody::MetadataPush { metadata } => metadata.len(),
        FrameBody::Keepalive { data, .. } => 8 + data.len(),
        _ => 32,
    }
}

fn put_version(dst: &mut BytesMut, version: Version) {
    dst.put_u16(version.major);
    dst.put_u16(version.minor);
}

fn get_version(src: &mut Bytes) -> Result<Version, FrameError> {
    need(src, 4)?;
    Ok(Version {
        major: src.get_u16(),
        minor: src.get_u16(),
    })
}

fn put_token(dst: &mut BytesMut, token: &Bytes) -> Result<(), FrameError> {
    let len = u16::try_from(token.len()).map_err(|_| FrameError::InvalidCombination {
        reason: "resume token longer than 65535 bytes",
    })?;
    dst.put_u16(len);
    dst.put_slice(token);
    Ok(())
}

fn get_token(src: &mut Bytes) -> Result<Bytes, FrameError> {
    need(src, 2)?;
    let len = usize::from(src.get_u16());
    need(src, len)?;
    Ok(src.split_to(len))
}

fn put_mime(dst: &mut BytesMut, mime: &str) -> Result<(), FrameError> {
    if mime.is_empty() {
        return Err(FrameError::InvalidCombination {
            reason: "SETUP MIME type must not be empty",
        });
    }
    let len = u8::try_from(mime.len()).map_err(|_| FrameError::InvalidCombination {
        reason: "SETUP MIME type longer than 255 bytes",
    })?;
    dst.put_u8(len);
    dst.put_slice(mime.as_bytes());
    Ok(())
}

fn get_mime(src: &mut Bytes) -> Result<String, FrameError> {
    need(src, 1)?;
    let len = usize::from(src.get_u8());
    if len == 0 {
        return Err(FrameError::InvalidCombination {
            reason: "SETUP MIME type must not be empty",
        });
    }
    need(src, len)?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidCombination {
        reason: "SETUP MIME type is not valid UTF-8",
    })
}

/// Write a metadata-length prefix plus metadata, then the data bytes.
fn put_payload(dst: &mut BytesMut, payload: &Payload) -> Result<(), FrameError> {
    if let Some(metadata) = payload.metadata() {
        if metadata.len() > MAX_U24 {
            return Err(FrameError::InvalidCombination {
                reason: "metadata longer than the 24-bit length prefix allows",
            });
        }
        put_u24(dst, metadata.len());
        dst.put_slice(metadata);
    }
    dst.put_slice(payload.data());
    Ok(())
}

fn get_payload(src: &mut Bytes, flags: Flags) -> Result<Payload, FrameError> {
    let metadata = if flags.contains(Flags::METADATA) {
        let len = get_u24(src)?;
        need(src, len)?;
        Some(src.split_to(len))
    } else {
        None
    };
    Ok(Payload::new(src.split_off(0), metadata))
}

fn get_request_n(src: &mut Bytes) -> Result<u32, FrameError> {
    let n = get_u32(src)?;
    if n == 0 {
        return Err(FrameError::InvalidCombination {
            reason: "request-N must be at least one",
        });
    }
    Ok(n)
}

pub(crate) fn put_u24(dst: &mut BytesMut, value: usize) {
    debug_assert!(value <= MAX_U24);
    #[expect(clippy::cast_possible_truncation, reason = "guarded by MAX_U24")]
    let bytes = (value as u32).to_be_bytes();
    dst.put_slice(&bytes[1..]);
}

pub(crate) fn get_u24(src: &mut Bytes) -> Result<usize, FrameError> {
    need(src, 3)?;
    let hi = usize::from(src.get_u8());
    let mid = usize::from(src.get_u8());
    let lo = usize::from(src.get_u8());
    Ok((hi << 16) | (mid << 8) | lo)
}

fn get_u32(src: &mut Bytes) -> Result<u32, FrameError> {
    need(src, 4)?;
    Ok(src.get_u32())
}

fn get_u64(src: &mut Bytes) -> Result<u64, FrameError> {
    need(src, 8)?;
    Ok(src.get_u64())
}

fn need(src: &Bytes, need: usize) -> Result<(), FrameError> {
    if src.len() < need {
        return Err(FrameError::Malformed {
            have: src.len(),
            need,
        });
    }
    Ok(())
}
