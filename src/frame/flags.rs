//! Ten-bit frame flag word.
//!
//! The upper two positions (IGNORE, METADATA) are common to every frame
//! type; the remaining bits are interpreted per type, so several constants
//! share a value.

use std::ops::{BitOr, BitOrAssign};

/// Mask covering the ten flag bits of the type/flags word.
const FLAGS_MASK: u16 = 0x03FF;

/// Flag word carried in the low ten bits of the frame header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);
    /// Receiver may ignore the frame if the type is not understood.
    pub const IGNORE: Self = Self(0x200);
    /// Frame body begins with a length-prefixed metadata section.
    pub const METADATA: Self = Self(0x100);
    /// SETUP: client will attempt resumption with the carried token.
    pub const RESUME: Self = Self(0x80);
    /// SETUP: client requires lease-based admission.
    pub const LEASE: Self = Self(0x40);
    /// KEEPALIVE: receiver must reply with a non-respond keepalive.
    pub const RESPOND: Self = Self(0x80);
    /// REQUEST_* / PAYLOAD: more fragments of this logical frame follow.
    pub const FOLLOWS: Self = Self(0x80);
    /// REQUEST_CHANNEL / PAYLOAD: the sender completes its side.
    pub const COMPLETE: Self = Self(0x40);
    /// PAYLOAD: the frame carries data for the subscriber.
    pub const NEXT: Self = Self(0x20);

    /// Build a flag word from raw bits, discarding anything outside the
    /// ten-bit field.
    #[must_use]
    pub const fn from_bits_truncate(bits: u16) -> Self { Self(bits & FLAGS_MASK) }

    /// Return the raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 { self.0 }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    /// Set `flag` when `condition` holds.
    #[must_use]
    pub const fn with(self, flag: Self, condition: bool) -> Self {
        if condition {
            Self(self.0 | flag.0)
        } else {
            self
        }
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}
