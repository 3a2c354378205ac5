//! Payload value type carried by request and payload frames.
//!
//! A [`Payload`] pairs opaque data bytes with optional metadata bytes. Both
//! halves are cheaply cloneable [`Bytes`] handles, so payloads can be routed
//! between tasks and split by the fragmentation layer without copying.

use bytes::Bytes;

/// Data plus optional metadata exchanged on a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from data and optional metadata.
    #[must_use]
    pub const fn new(data: Bytes, metadata: Option<Bytes>) -> Self { Self { data, metadata } }

    /// Create a payload carrying only data bytes.
    #[must_use]
    pub const fn from_data(data: Bytes) -> Self {
        Self {
            data,
            metadata: None,
        }
    }

    /// Create an empty payload.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            data: Bytes::new(),
            metadata: None,
        }
    }

    /// Borrow the data bytes.
    #[must_use]
    pub fn data(&self) -> &Bytes { &self.data }

    /// Borrow the metadata bytes, if present.
    #[must_use]
    pub fn metadata(&self) -> Option<&Bytes> { self.metadata.as_ref() }

    /// Whether metadata is present.
    #[must_use]
    pub const fn has_metadata(&self) -> bool { self.metadata.is_some() }

    /// Number of metadata bytes, zero when absent.
    #[must_use]
    pub fn metadata_len(&self) -> usize { self.metadata.as_ref().map_or(0, Bytes::len) }

    /// Number of data bytes.
    #[must_use]
    pub fn data_len(&self) -> usize { self.data.len() }

    /// Consume the payload, returning its parts.
    #[must_use]
    pub fn into_parts(self) -> (Bytes, Option<Bytes>) { (self.data, self.metadata) }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self { Self::from_data(data) }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self { Self::from_data(Bytes::from_static(data.as_bytes())) }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::Payload;

    #[test]
    fn payload_reports_lengths() {
        let payload = Payload::new(Bytes::from_static(b"data"), Some(Bytes::from_static(b"md")));
        assert_eq!(payload.data_len(), 4);
        assert_eq!(payload.metadata_len(), 2);
        assert!(payload.has_metadata());
    }

    #[test]
    fn data_only_payload_has_no_metadata() {
        let payload = Payload::from_data(Bytes::from_static(b"x"));
        assert_eq!(payload.metadata(), None);
        assert_eq!(payload.metadata_len(), 0);
    }
}
