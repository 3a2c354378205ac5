//! Transparent frame fragmentation and re-assembly.
//!
//! Outbound request and payload frames larger than the connection MTU are
//! split into a head frame plus PAYLOAD continuations, all but the last
//! carrying the FOLLOWS flag. Inbound continuations are stitched back
//! together per stream until a frame arrives without FOLLOWS. The pair is
//! transport-agnostic so the codec and behavioural tests can use it
//! without socket types.

mod error;
mod fragmenter;
mod reassembler;

#[cfg(test)]
mod tests;

pub use error::{FragmentError, ReassemblyError};
pub use fragmenter::Fragmenter;
pub use reassembler::Reassembler;

/// Smallest permitted fragmentation MTU in bytes.
pub const MIN_MTU: usize = 64;

/// Largest permitted fragmentation MTU, the wire frame cap.
pub const MAX_MTU: usize = crate::framing::MAX_WIRE_FRAME_LEN;
