//! Public API for the `loomwire` library.
//!
//! `loomwire` is a bidirectional, multiplexed, reactive-streams protocol
//! runtime: two peers exchange request/response, fire-and-forget,
//! request-stream, and request-channel interactions over a single
//! byte-oriented connection, with per-stream flow control, cancellation,
//! transparent fragmentation, optional lease-based admission, and
//! optional session resumption.
//!
//! The crate is transport-agnostic: anything implementing the Tokio I/O
//! traits (see [`transport::Transport`]) plugs into [`handshake::connect`]
//! and [`handshake::accept`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use loomwire::{ClientConfig, Payload, Responder, ResponderResult, handshake};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Responder for Echo {
//!     async fn request_response(&self, payload: Payload) -> ResponderResult { Ok(payload) }
//! }
//!
//! # async fn run(transport: tokio::io::DuplexStream) -> Result<(), Box<dyn std::error::Error>> {
//! let connection =
//!     handshake::connect(transport, ClientConfig::default(), Arc::new(Echo)).await?;
//! let reply = connection.socket().request_response(Payload::from("ping")).await?;
//! assert_eq!(reply.data().as_ref(), b"ping");
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod config;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod framing;
pub mod handshake;
pub mod payload;
pub mod resume;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use connection::{
    Connection,
    DuplexSocket,
    LeaseGrant,
    LeaseProvider,
    PayloadStream,
    PeriodicLease,
    Responder,
    ResponderError,
    ResponderResult,
    Role,
    SuspendedSocket,
};
pub use error::ConnectionError;
pub use handshake::{Accepted, Acceptor, HandshakeError, SetupInfo};
pub use payload::Payload;
pub use resume::{ResumeCounters, ResumeToken};
pub use session::{SessionError, SessionManager};
