//! Length-prefixed wire framing.
//!
//! Every frame travels as a 3-byte big-endian length followed by exactly
//! that many bytes. This is the only layer that touches raw byte
//! boundaries; the frame codec operates on the full-frame buffers produced
//! here. Built on `tokio_util`'s [`LengthDelimitedCodec`] with a structured
//! error taxonomy distinguishing a clean close at a frame boundary from a
//! truncated frame, plus an explicit oversize guard.

use std::io;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 3;

/// Largest frame the 24-bit prefix can describe (16 MiB − 1).
pub const MAX_WIRE_FRAME_LEN: usize = (1 << 24) - 1;

/// Errors raised by the length-prefixed layer.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A frame length exceeded the configured cap.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Length announced by the prefix or requested by the encoder.
        size: usize,
        /// Configured cap.
        max: usize,
    },
    /// The peer closed the connection at a frame boundary.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,
    /// The connection ended while reading a frame body.
    #[error("truncated frame: {bytes_received} bytes of {expected} byte frame received")]
    TruncatedFrame {
        /// Body bytes received before the end of stream.
        bytes_received: usize,
        /// Body length announced by the prefix.
        expected: usize,
    },
    /// The connection ended while reading the length prefix itself.
    #[error("truncated length prefix: {bytes_received} of {prefix_size} bytes")]
    TruncatedPrefix {
        /// Prefix bytes received before the end of stream.
        bytes_received: usize,
        /// Size of the length prefix.
        prefix_size: usize,
    },
    /// An error in the underlying transport.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// Whether this error represents a clean connection close.
    #[must_use]
    pub const fn is_clean_close(&self) -> bool { matches!(self, Self::CleanClose) }

    /// Whether the error is a connection interruption rather than a
    /// protocol violation, and so leaves a resumable session intact.
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(
            self,
            Self::CleanClose
                | Self::TruncatedFrame { .. }
                | Self::TruncatedPrefix { .. }
                | Self::Io(_)
        )
    }
}

/// Codec producing one [`Bytes`] buffer per wire frame.
///
/// Implements both [`Decoder`] and [`Encoder`], so a single instance can
/// drive a [`tokio_util::codec::Framed`] transport that is later split
/// into reader and writer halves.
#[derive(Debug)]
pub struct WireCodec {
    inner: LengthDelimitedCodec,
    max_frame_len: usize,
}

impl WireCodec {
    /// Construct a codec with a frame length cap.
    ///
    /// The cap is clamped to [`MAX_WIRE_FRAME_LEN`]; the prefix cannot
    /// describe anything longer.
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        let max_frame_len = max_frame_len.min(MAX_WIRE_FRAME_LEN);
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_PREFIX_LEN)
                .big_endian()
                .max_frame_length(max_frame_len)
                .new_codec(),
            max_frame_len,
        }
    }

    /// Return the configured frame length cap.
    #[must_use]
    pub const fn max_frame_len(&self) -> usize { self.max_frame_len }
}

impl Default for WireCodec {
    fn default() -> Self { Self::new(MAX_WIRE_FRAME_LEN) }
}

impl Clone for WireCodec {
    fn clone(&self) -> Self { Self::new(self.max_frame_len) }
}

impl Decoder for WireCodec {
    type Item = Bytes;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Surface the structured oversize error before the inner codec
        // reports it as a bare I/O failure.
        if src.len() >= LENGTH_PREFIX_LEN {
            let announced = read_prefix(src);
            if announced > self.max_frame_len {
                return Err(FramingError::OversizedFrame {
                    size: announced,
                    max: self.max_frame_len,
                });
            }
        }
        Ok(self.inner.decode(src)?.map(BytesMut::freeze))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => Err(build_eof_error(src)),
        }
    }
}

impl Encoder<Bytes> for WireCodec {
    type Error = FramingError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_len {
            return Err(FramingError::OversizedFrame {
                size: item.len(),
                max: self.max_frame_len,
            });
        }
        Ok(self.inner.encode(item, dst)?)
    }
}

/// Classify leftover bytes at end of stream as a truncated prefix or a
/// truncated frame body.
fn build_eof_error(src: &BytesMut) -> FramingError {
    if src.len() < LENGTH_PREFIX_LEN {
        return FramingError::TruncatedPrefix {
            bytes_received: src.len(),
            prefix_size: LENGTH_PREFIX_LEN,
        };
    }
    FramingError::TruncatedFrame {
        bytes_received: src.len() - LENGTH_PREFIX_LEN,
        expected: read_prefix(src),
    }
}

fn read_prefix(src: &BytesMut) -> usize {
    (usize::from(src[0]) << 16) | (usize::from(src[1]) << 8) | usize::from(src[2])
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn encode_frames(codec: &mut WireCodec, frames: &[&[u8]]) -> BytesMut {
        let mut wire = BytesMut::new();
        for frame in frames {
            codec
                .encode(Bytes::copy_from_slice(frame), &mut wire)
                .expect("encode");
        }
        wire
    }

    #[test]
    fn frames_round_trip_through_the_prefix() {
        let mut codec = WireCodec::new(1024);
        let mut wire = encode_frames(&mut codec, &[b"one", b"two-longer", b""]);
        assert_eq!(codec.decode(&mut wire).unwrap().unwrap().as_ref(), b"one");
        assert_eq!(
            codec.decode(&mut wire).unwrap().unwrap().as_ref(),
            b"two-longer"
        );
        assert_eq!(codec.decode(&mut wire).unwrap().unwrap().as_ref(), b"");
        assert!(codec.decode_eof(&mut wire).unwrap().is_none());
    }

    #[test]
    fn oversized_announcement_is_rejected() {
        let mut codec = WireCodec::new(16);
        let mut wire = BytesMut::from(&[0x00, 0x00, 0x11][..]);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(FramingError::OversizedFrame { size: 17, max: 16 })
        ));
    }

    #[test]
    fn oversized_encode_is_rejected() {
        let mut codec = WireCodec::new(4);
        let mut wire = BytesMut::new();
        assert!(matches!(
            codec.encode(Bytes::from_static(b"too long"), &mut wire),
            Err(FramingError::OversizedFrame { size: 8, max: 4 })
        ));
    }

    #[test]
    fn eof_mid_prefix_is_truncated_prefix() {
        let mut codec = WireCodec::new(64);
        let mut wire = BytesMut::from(&[0x00, 0x01][..]);
        assert!(matches!(
            codec.decode_eof(&mut wire),
            Err(FramingError::TruncatedPrefix {
                bytes_received: 2,
                prefix_size: 3,
            })
        ));
    }

    #[test]
    fn eof_mid_body_is_truncated_frame() {
        let mut codec = WireCodec::new(64);
        let mut wire = BytesMut::from(&[0x00, 0x00, 0x05, b'a', b'b'][..]);
        assert!(matches!(
            codec.decode_eof(&mut wire),
            Err(FramingError::TruncatedFrame {
                bytes_received: 2,
                expected: 5,
            })
        ));
    }

    proptest! {
        // Feeding the wire image in arbitrary chunk sizes must not change
        // the decoded frames.
        #[test]
        fn chunked_feed_preserves_frames(
            frames in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..128),
                1..8,
            ),
            chunk in 1usize..32,
        ) {
            let mut codec = WireCodec::new(256);
            let refs: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
            let wire = encode_frames(&mut codec, &refs);

            let mut buffer = BytesMut::new();
            let mut decoded = Vec::new();
            for piece in wire.chunks(chunk) {
                buffer.extend_from_slice(piece);
                while let Some(frame) = codec.decode(&mut buffer).expect("decode") {
                    decoded.push(frame.to_vec());
                }
            }
            prop_assert!(codec.decode_eof(&mut buffer).expect("eof").is_none());
            prop_assert_eq!(decoded, frames);
        }
    }
}
