//! Keepalive bookkeeping: when to probe and when to give up.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the peer's liveness against the negotiated limits.
#[derive(Debug)]
pub(crate) struct KeepaliveSchedule {
    interval: Duration,
    max_lifetime: Duration,
    last_heard: Instant,
}

impl KeepaliveSchedule {
    pub fn new(interval: Duration, max_lifetime: Duration) -> Self {
        Self {
            interval,
            max_lifetime,
            last_heard: Instant::now(),
        }
    }

    pub const fn interval(&self) -> Duration { self.interval }

    /// Note traffic from the peer.
    pub fn mark_heard(&mut self) { self.mark_heard_at(Instant::now()); }

    pub fn mark_heard_at(&mut self, now: Instant) { self.last_heard = now; }

    /// Time the peer has been silent, when past the lifetime limit.
    pub fn expired(&self) -> Option<Duration> { self.expired_at(Instant::now()) }

    pub fn expired_at(&self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_heard);
        (elapsed > self.max_lifetime).then_some(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expiry_trips_only_past_the_lifetime() {
        let mut schedule =
            KeepaliveSchedule::new(Duration::from_millis(20), Duration::from_millis(90));
        let start = Instant::now();
        assert!(schedule.expired_at(start + Duration::from_millis(90)).is_none());
        assert!(schedule.expired_at(start + Duration::from_millis(91)).is_some());

        schedule.mark_heard_at(start + Duration::from_millis(80));
        assert!(schedule.expired_at(start + Duration::from_millis(150)).is_none());
    }
}
