//! Byte positions over resumable frames.
//!
//! Each connection keeps two monotonically increasing counters: bytes
//! written and bytes read, covering only frames the codec classifies as
//! resumable. The writer advances the write counter before framing, the
//! reader advances the read counter after validation, and the counters
//! survive transport re-attachment for the life of the logical session.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Opaque session token carried by SETUP and RESUME frames.
pub type ResumeToken = Bytes;

/// Per-direction resumable-byte counters for one logical session.
#[derive(Debug, Default)]
pub struct ResumeCounters {
    written: AtomicU64,
    read: AtomicU64,
}

impl ResumeCounters {
    /// Create counters at position zero.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record `len` resumable bytes written.
    pub fn add_written(&self, len: u64) { self.written.fetch_add(len, Ordering::Relaxed); }

    /// Record `len` resumable bytes read.
    pub fn add_read(&self, len: u64) { self.read.fetch_add(len, Ordering::Relaxed); }

    /// Total resumable bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 { self.written.load(Ordering::Relaxed) }

    /// Total resumable bytes read so far.
    #[must_use]
    pub fn read(&self) -> u64 { self.read.load(Ordering::Relaxed) }
}
