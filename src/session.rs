//! Server-side store of suspended sessions awaiting resumption.
//!
//! Sessions are keyed by the opaque resume token from SETUP. A deadline
//! min-heap drives the periodic sweep; heap entries left stale by a
//! resume are discarded lazily against the live table. The manager is
//! owned by the server and handed by reference to each accepted
//! connection, so its lifecycle matches the serve call.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::Mutex,
    time::Duration,
};

use dashmap::DashMap;
use log::{debug, info};
use thiserror::Error;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;

use crate::{connection::SuspendedSocket, resume::ResumeToken};

/// Errors raised by the session store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A session with this token is already stored.
    #[error("duplicate session token")]
    DuplicateToken,
    /// No session with this token exists.
    #[error("unknown session token")]
    UnknownToken,
}

/// One suspended connection and its expiry deadline.
struct Session {
    socket: SuspendedSocket,
    deadline: Instant,
}

struct DeadlineEntry {
    deadline: Instant,
    token: ResumeToken,
}

impl PartialEq for DeadlineEntry {
    fn eq(&self, other: &Self) -> bool { self.deadline == other.deadline }
}

impl Eq for DeadlineEntry {}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for DeadlineEntry {
    fn cmp(&self, other: &Self) -> Ordering { self.deadline.cmp(&other.deadline) }
}

/// Token-keyed store of suspended sessions with deadline expiry.
#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<ResumeToken, Session>,
    deadlines: Mutex<BinaryHeap<Reverse<DeadlineEntry>>>,
}

impl SessionManager {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Store a suspended socket under `token` until `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateToken`] when a session with this
    /// token is already stored.
    pub fn store(
        &self,
        token: ResumeToken,
        socket: SuspendedSocket,
        deadline: Instant,
    ) -> Result<(), SessionError> {
        match self.sessions.entry(token.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SessionError::DuplicateToken),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Session { socket, deadline });
                self.deadlines
                    .lock()
                    .expect("deadline heap poisoned")
                    .push(Reverse(DeadlineEntry { deadline, token }));
                Ok(())
            }
        }
    }

    /// Look up a session and remove it atomically for re-attachment.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownToken`] when no session with this
    /// token exists; an expired session is indistinguishable from one
    /// that never was.
    pub fn take(&self, token: &[u8]) -> Result<SuspendedSocket, SessionError> {
        self.sessions
            .remove(token)
            .map(|(_, session)| session.socket)
            .ok_or(SessionError::UnknownToken)
    }

    /// Whether a session with `token` is currently stored.
    #[must_use]
    pub fn contains(&self, token: &[u8]) -> bool { self.sessions.contains_key(token) }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize { self.sessions.len() }

    /// Whether no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.sessions.is_empty() }

    /// Close and remove every session whose deadline is at or before
    /// `now`; returns how many were closed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut swept = 0;
        let mut deadlines = self.deadlines.lock().expect("deadline heap poisoned");
        while let Some(Reverse(head)) = deadlines.peek() {
            if head.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = deadlines.pop() else {
                break;
            };
            // A resumed or re-stored session leaves a stale heap entry;
            // only close what the table still holds past its deadline.
            let expired = self
                .sessions
                .get(&entry.token)
                .is_some_and(|session| session.deadline <= now);
            if expired {
                if let Some((_, session)) = self.sessions.remove(&entry.token) {
                    session.socket.close();
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            debug!("swept {swept} expired sessions");
        }
        swept
    }

    /// Close and remove every stored session.
    pub fn close_all(&self) {
        let tokens: Vec<ResumeToken> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for token in tokens {
            if let Some((_, session)) = self.sessions.remove(&token) {
                session.socket.close();
            }
        }
        self.deadlines
            .lock()
            .expect("deadline heap poisoned")
            .clear();
    }
}

/// Drive the sweep on a fixed cadence until `shutdown`, then close
/// everything. One sweeper runs per server process.
pub async fn run_sweeper(
    manager: std::sync::Arc<SessionManager>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(sweep_interval);
    loop {
        tokio::select! { biased;
            () = shutdown.cancelled() => {
                info!("session sweeper stopping; closing {} sessions", manager.len());
                manager.close_all();
                return;
            }
            _ = ticker.tick() => {
                manager.sweep(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;

    fn token(value: &'static str) -> ResumeToken { Bytes::from_static(value.as_bytes()) }

    #[tokio::test]
    async fn duplicate_tokens_are_rejected() {
        let manager = SessionManager::new();
        let deadline = Instant::now() + Duration::from_secs(30);
        manager
            .store(token("a"), SuspendedSocket::disconnected_stub(), deadline)
            .expect("store");
        assert_eq!(
            manager.store(token("a"), SuspendedSocket::disconnected_stub(), deadline),
            Err(SessionError::DuplicateToken)
        );
    }

    #[tokio::test]
    async fn take_removes_atomically() {
        let manager = SessionManager::new();
        let deadline = Instant::now() + Duration::from_secs(30);
        manager
            .store(token("a"), SuspendedSocket::disconnected_stub(), deadline)
            .expect("store");
        assert!(manager.take(b"a").is_ok());
        assert!(matches!(manager.take(b"a"), Err(SessionError::UnknownToken)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn unknown_tokens_are_reported() {
        let manager = SessionManager::new();
        assert!(matches!(
            manager.take(b"missing"),
            Err(SessionError::UnknownToken)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_closes_only_expired_sessions() {
        let manager = SessionManager::new();
        let now = Instant::now();
        let early = SuspendedSocket::disconnected_stub();
        let late = SuspendedSocket::disconnected_stub();
        manager
            .store(token("early"), early.clone(), now + Duration::from_secs(10))
            .expect("store");
        manager
            .store(token("late"), late.clone(), now + Duration::from_secs(60))
            .expect("store");

        assert_eq!(manager.sweep(now + Duration::from_secs(10)), 1);
        assert!(early.is_closed());
        assert!(!late.is_closed());
        assert!(manager.contains(b"late"));
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_sessions_leave_harmless_stale_heap_entries() {
        let manager = SessionManager::new();
        let now = Instant::now();
        manager
            .store(
                token("a"),
                SuspendedSocket::disconnected_stub(),
                now + Duration::from_secs(5),
            )
            .expect("store");
        let socket = manager.take(b"a").expect("take");
        assert_eq!(manager.sweep(now + Duration::from_secs(10)), 0);
        assert!(!socket.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_closes_everything_on_shutdown() {
        let manager = Arc::new(SessionManager::new());
        let shutdown = CancellationToken::new();
        let socket = SuspendedSocket::disconnected_stub();
        manager
            .store(
                token("a"),
                socket.clone(),
                Instant::now() + Duration::from_secs(600),
            )
            .expect("store");
        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&manager),
            Duration::from_millis(500),
            shutdown.clone(),
        ));
        shutdown.cancel();
        sweeper.await.expect("join");
        assert!(socket.is_closed());
        assert!(manager.is_empty());
    }
}
