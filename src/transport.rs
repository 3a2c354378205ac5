//! The byte-duplex contract the runtime builds on.
//!
//! A transport is any full-duplex, reliable, ordered byte stream; the
//! runtime assumes no message boundaries. Concrete transports (TCP, Unix
//! domain sockets, WebSocket, QUIC) and their TLS configuration live
//! outside this crate; anything satisfying the Tokio I/O traits plugs in,
//! including `tokio::io::duplex` pairs in tests. Read deadlines are not
//! part of the contract: liveness is enforced by the keepalive timers
//! above this layer.

use tokio::io::{AsyncRead, AsyncWrite};

/// Marker trait for byte-duplex transports.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased transport handed to the connection machinery.
pub type BoxTransport = Box<dyn Transport>;
