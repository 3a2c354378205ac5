//! Lease-based request admission.
//!
//! When SETUP negotiates leases, the server periodically grants the
//! client a permit budget with a validity window and enforces it on
//! inbound requests; the client tracks its current grant and fails
//! outgoing requests locally once it is spent. A zero-TTL grant revokes.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Instant, sleep};

/// One lease: a permit budget valid for a window.
#[derive(Clone, Debug)]
pub struct LeaseGrant {
    /// Validity window; zero revokes any outstanding lease.
    pub ttl: Duration,
    /// Requests permitted within the window.
    pub requests: u32,
    /// Opaque metadata carried in the LEASE frame.
    pub metadata: Option<Bytes>,
}

/// Source of lease grants on a leased server connection.
///
/// The runtime awaits `next_grant` in a loop and forwards each grant to
/// the peer; returning `None` stops granting for the connection's life.
#[async_trait]
pub trait LeaseProvider: Send + Sync + 'static {
    /// Produce the next grant, waiting as long as admission policy
    /// requires.
    async fn next_grant(&self) -> Option<LeaseGrant>;
}

/// Grants a fixed permit budget every TTL, starting immediately.
#[derive(Debug)]
pub struct PeriodicLease {
    ttl: Duration,
    requests: u32,
    last_grant: Mutex<Option<Instant>>,
}

impl PeriodicLease {
    /// Create a provider granting `requests` permits per `ttl` window.
    #[must_use]
    pub fn new(ttl: Duration, requests: u32) -> Self {
        Self {
            ttl,
            requests,
            last_grant: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LeaseProvider for PeriodicLease {
    async fn next_grant(&self) -> Option<LeaseGrant> {
        let previous = *self.last_grant.lock().expect("lease lock poisoned");
        if let Some(previous) = previous {
            let due = previous + self.ttl;
            let now = Instant::now();
            if due > now {
                sleep(due - now).await;
            }
        }
        *self.last_grant.lock().expect("lease lock poisoned") = Some(Instant::now());
        Some(LeaseGrant {
            ttl: self.ttl,
            requests: self.requests,
            metadata: None,
        })
    }
}

/// Current lease state on either side of the connection.
#[derive(Debug, Default)]
pub(crate) struct LeaseBook {
    remaining: u32,
    expires_at: Option<Instant>,
}

impl LeaseBook {
    pub fn new() -> Self { Self::default() }

    /// Apply a grant; a zero TTL revokes.
    pub fn grant(&mut self, requests: u32, ttl: Duration) { self.grant_at(requests, ttl, Instant::now()); }

    pub fn grant_at(&mut self, requests: u32, ttl: Duration, now: Instant) {
        if ttl.is_zero() || requests == 0 {
            self.remaining = 0;
            self.expires_at = None;
            return;
        }
        self.remaining = requests;
        self.expires_at = Some(now + ttl);
    }

    /// Consume one permit if the lease is live.
    pub fn try_acquire(&mut self) -> bool { self.try_acquire_at(Instant::now()) }

    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        let live = self.expires_at.is_some_and(|expiry| now < expiry);
        if !live || self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn permits_are_consumed_then_refused() {
        let now = Instant::now();
        let mut book = LeaseBook::new();
        book.grant_at(2, Duration::from_secs(30), now);
        assert!(book.try_acquire_at(now));
        assert!(book.try_acquire_at(now));
        assert!(!book.try_acquire_at(now));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_refuses() {
        let now = Instant::now();
        let mut book = LeaseBook::new();
        book.grant_at(5, Duration::from_secs(1), now);
        assert!(!book.try_acquire_at(now + Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_revokes() {
        let now = Instant::now();
        let mut book = LeaseBook::new();
        book.grant_at(5, Duration::from_secs(30), now);
        book.grant_at(1, Duration::ZERO, now);
        assert!(!book.try_acquire_at(now));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_provider_spaces_grants() {
        let provider = PeriodicLease::new(Duration::from_millis(50), 3);
        let first = provider.next_grant().await.expect("grant");
        assert_eq!(first.requests, 3);
        let started = Instant::now();
        let _second = provider.next_grant().await.expect("grant");
        assert!(Instant::now() - started >= Duration::from_millis(50));
    }
}
