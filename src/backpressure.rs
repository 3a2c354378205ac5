//! Request-N credit accounting shared between the multiplexer and
//! producer tasks.
//!
//! Each producing stream holds a [`CreditGate`]: the multiplexer grants
//! credit as REQUEST_N frames arrive and consumes one credit per NEXT it
//! writes; the producer task waits on the gate before emitting. Grants
//! saturate at `u32::MAX`, which in practice means unbounded demand.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

/// Why a producer waiting on a gate was released without credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// Credit is available; the producer may emit one item.
    Ready,
    /// The stream was cancelled or the connection closed; stop producing.
    Revoked,
}

#[derive(Debug, Default)]
struct Inner {
    credits: Mutex<u32>,
    revoked: AtomicBool,
    frozen: AtomicBool,
    notify: Notify,
}

/// Shared credit counter for one producing stream.
///
/// Cloning shares the counter; the multiplexer keeps one clone and the
/// producer task another.
#[derive(Clone, Debug)]
pub struct CreditGate {
    inner: Arc<Inner>,
}

impl CreditGate {
    /// Create a gate with an initial allowance.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        let inner = Inner {
            credits: Mutex::new(initial),
            ..Inner::default()
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Add `n` credits, saturating, and wake any waiting producer.
    pub fn grant(&self, n: u32) {
        let mut credits = self.inner.credits.lock().expect("credit lock poisoned");
        *credits = credits.saturating_add(n);
        drop(credits);
        self.inner.notify.notify_waiters();
    }

    /// Consume one credit if any remain.
    ///
    /// The multiplexer calls this for each NEXT it writes; a `false`
    /// return means the producer emitted past a pause, which is a
    /// connection-fatal bug in the producer.
    #[must_use]
    pub fn try_consume(&self) -> bool {
        let mut credits = self.inner.credits.lock().expect("credit lock poisoned");
        if *credits == 0 {
            return false;
        }
        *credits -= 1;
        true
    }

    /// Current credit balance.
    #[must_use]
    pub fn credits(&self) -> u32 { *self.inner.credits.lock().expect("credit lock poisoned") }

    /// Stop the producer permanently and wake it.
    pub fn revoke(&self) {
        self.inner.revoked.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the gate has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool { self.inner.revoked.load(Ordering::Acquire) }

    /// Pause the producer regardless of credit, without revoking.
    ///
    /// Used while the transport is detached awaiting resumption.
    pub fn freeze(&self) { self.inner.frozen.store(true, Ordering::Release); }

    /// Release a [`freeze`](Self::freeze) and wake the producer.
    pub fn thaw(&self) {
        self.inner.frozen.store(false, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Wait until credit is available or the gate is revoked.
    ///
    /// Does not consume credit; the multiplexer consumes when it writes
    /// the NEXT frame.
    pub async fn ready(&self) -> GateState {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.revoked.load(Ordering::Acquire) {
                return GateState::Revoked;
            }
            if !self.inner.frozen.load(Ordering::Acquire) && self.credits() > 0 {
                return GateState::Ready;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn grants_saturate() {
        let gate = CreditGate::new(u32::MAX - 1);
        gate.grant(10);
        assert_eq!(gate.credits(), u32::MAX);
    }

    #[test]
    fn consume_stops_at_zero() {
        let gate = CreditGate::new(2);
        assert!(gate.try_consume());
        assert!(gate.try_consume());
        assert!(!gate.try_consume());
    }

    #[tokio::test]
    async fn ready_wakes_on_grant() {
        let gate = CreditGate::new(0);
        let waiter = gate.clone();
        let handle = tokio::spawn(async move { waiter.ready().await });
        tokio::task::yield_now().await;
        gate.grant(1);
        let state = timeout(Duration::from_secs(1), handle)
            .await
            .expect("timed out")
            .expect("join");
        assert_eq!(state, GateState::Ready);
    }

    #[tokio::test]
    async fn ready_wakes_on_revoke() {
        let gate = CreditGate::new(0);
        let waiter = gate.clone();
        let handle = tokio::spawn(async move { waiter.ready().await });
        tokio::task::yield_now().await;
        gate.revoke();
        let state = timeout(Duration::from_secs(1), handle)
            .await
            .expect("timed out")
            .expect("join");
        assert_eq!(state, GateState::Revoked);
    }

    #[tokio::test]
    async fn freeze_holds_back_available_credit() {
        let gate = CreditGate::new(5);
        gate.freeze();
        let waiter = gate.clone();
        let handle = tokio::spawn(async move { waiter.ready().await });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        gate.thaw();
        let state = timeout(Duration::from_secs(1), handle)
            .await
            .expect("timed out")
            .expect("join");
        assert_eq!(state, GateState::Ready);
    }
}
