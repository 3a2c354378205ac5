//! Immutable configuration records.
//!
//! Both configs are plain values populated through `with`-style
//! constructors; each knob validates its range when set, so a built
//! config is always usable. Defaults follow the protocol conventions:
//! keepalive every 20 s with a 90 s lifetime, 30 s resume sessions swept
//! every 500 ms, and fragmentation effectively off (MTU at the frame
//! cap).

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use thiserror::Error;

use crate::{
    connection::LeaseProvider,
    fragment::{FragmentError, Fragmenter},
    payload::Payload,
    resume::ResumeToken,
};

/// Default keepalive probe interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default silence budget before the connection is declared dead.
pub const DEFAULT_KEEPALIVE_MAX_LIFETIME: Duration = Duration::from_secs(90);

/// Default lifetime of a suspended session awaiting resumption.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(30);

/// Default cadence of the session expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Default cap on a re-assembled logical payload (64 MiB).
pub const DEFAULT_REASSEMBLY_LIMIT: usize = 64 * 1024 * 1024;

/// Default MIME type for data and metadata sections.
pub const DEFAULT_MIME: &str = "application/binary";

/// Errors raised while building a configuration.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The fragmentation MTU falls outside the permitted range.
    #[error(transparent)]
    Mtu(#[from] FragmentError),
    /// A duration knob must be strictly positive.
    #[error("{knob} must be positive")]
    ZeroDuration {
        /// Name of the offending knob.
        knob: &'static str,
    },
    /// The keepalive lifetime must exceed the probe interval.
    #[error("keepalive max lifetime {lifetime:?} must exceed interval {interval:?}")]
    LifetimeNotAboveInterval {
        /// Configured probe interval.
        interval: Duration,
        /// Configured lifetime.
        lifetime: Duration,
    },
    /// The reassembly cap must be positive.
    #[error("reassembly limit must be positive")]
    ZeroReassemblyLimit,
}

fn positive(value: Duration, knob: &'static str) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration { knob });
    }
    Ok(value)
}

/// Client-side connection configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) fragment_mtu: usize,
    pub(crate) reassembly_limit: usize,
    pub(crate) keepalive_interval: Duration,
    pub(crate) keepalive_max_lifetime: Duration,
    pub(crate) metadata_mime: String,
    pub(crate) data_mime: String,
    pub(crate) resume_token: Option<ResumeToken>,
    pub(crate) lease: bool,
    pub(crate) setup_payload: Payload,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fragment_mtu: crate::fragment::MAX_MTU,
            reassembly_limit: DEFAULT_REASSEMBLY_LIMIT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_max_lifetime: DEFAULT_KEEPALIVE_MAX_LIFETIME,
            metadata_mime: DEFAULT_MIME.to_owned(),
            data_mime: DEFAULT_MIME.to_owned(),
            resume_token: None,
            lease: false,
            setup_payload: Payload::empty(),
        }
    }
}

impl ClientConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Set the fragmentation MTU (64 ≤ MTU ≤ 16 MiB − 1).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Mtu`] for an out-of-range value.
    pub fn with_fragment_mtu(mut self, mtu: usize) -> Result<Self, ConfigError> {
        Fragmenter::new(mtu)?;
        self.fragment_mtu = mtu;
        Ok(self)
    }

    /// Set the keepalive interval and maximum lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] for a zero interval and
    /// [`ConfigError::LifetimeNotAboveInterval`] when the lifetime does
    /// not exceed the interval.
    pub fn with_keepalive(
        mut self,
        interval: Duration,
        max_lifetime: Duration,
    ) -> Result<Self, ConfigError> {
        positive(interval, "keepalive interval")?;
        if max_lifetime <= interval {
            return Err(ConfigError::LifetimeNotAboveInterval {
                interval,
                lifetime: max_lifetime,
            });
        }
        self.keepalive_interval = interval;
        self.keepalive_max_lifetime = max_lifetime;
        Ok(self)
    }

    /// Set the cap on a re-assembled logical payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroReassemblyLimit`] for zero.
    pub fn with_reassembly_limit(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ZeroReassemblyLimit);
        }
        self.reassembly_limit = limit;
        Ok(self)
    }

    /// Set the MIME type describing metadata sections.
    #[must_use]
    pub fn with_metadata_mime(mut self, mime: impl Into<String>) -> Self {
        self.metadata_mime = mime.into();
        self
    }

    /// Set the MIME type describing data sections.
    #[must_use]
    pub fn with_data_mime(mut self, mime: impl Into<String>) -> Self {
        self.data_mime = mime.into();
        self
    }

    /// Request resumption with the given opaque token.
    #[must_use]
    pub fn with_resume_token(mut self, token: impl Into<Bytes>) -> Self {
        self.resume_token = Some(token.into());
        self
    }

    /// Require lease-based admission; requests fail with `NoLease` until
    /// the server grants one.
    #[must_use]
    pub fn with_lease(mut self) -> Self {
        self.lease = true;
        self
    }

    /// Set the payload carried by the SETUP frame.
    #[must_use]
    pub fn with_setup_payload(mut self, payload: Payload) -> Self {
        self.setup_payload = payload;
        self
    }
}

/// Server-side configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) fragment_mtu: usize,
    pub(crate) reassembly_limit: usize,
    pub(crate) resume_enable: bool,
    pub(crate) resume_session_duration: Duration,
    pub(crate) session_sweep_interval: Duration,
    pub(crate) lease_provider: Option<Arc<dyn LeaseProvider>>,
}

impl Default for ServerConfig {
    fn default() -> Self { Self::new() }
}

impl ServerConfig {
    /// Start from the defaults: resume disabled, no lease provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fragment_mtu: crate::fragment::MAX_MTU,
            reassembly_limit: DEFAULT_REASSEMBLY_LIMIT,
            resume_enable: false,
            resume_session_duration: DEFAULT_SESSION_DURATION,
            session_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            lease_provider: None,
        }
    }

    /// Set the fragmentation MTU (64 ≤ MTU ≤ 16 MiB − 1).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Mtu`] for an out-of-range value.
    pub fn with_fragment_mtu(mut self, mtu: usize) -> Result<Self, ConfigError> {
        Fragmenter::new(mtu)?;
        self.fragment_mtu = mtu;
        Ok(self)
    }

    /// Set the cap on a re-assembled logical payload.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroReassemblyLimit`] for zero.
    pub fn with_reassembly_limit(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ZeroReassemblyLimit);
        }
        self.reassembly_limit = limit;
        Ok(self)
    }

    /// Accept RESUME and suspend disconnected sessions.
    #[must_use]
    pub fn with_resume(mut self) -> Self {
        self.resume_enable = true;
        self
    }

    /// Set how long a suspended session survives awaiting resumption.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] for zero.
    pub fn with_resume_session_duration(mut self, duration: Duration) -> Result<Self, ConfigError> {
        self.resume_session_duration = positive(duration, "resume session duration")?;
        Ok(self)
    }

    /// Set the cadence of the session expiry sweep.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] for zero.
    pub fn with_session_sweep_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        self.session_sweep_interval = positive(interval, "session sweep interval")?;
        Ok(self)
    }

    /// Grant leases from `provider` on connections that negotiate them.
    #[must_use]
    pub fn with_lease_provider(mut self, provider: Arc<dyn LeaseProvider>) -> Self {
        self.lease_provider = Some(provider);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults_match_the_protocol_conventions() {
        let config = ClientConfig::default();
        assert_eq!(config.fragment_mtu, crate::fragment::MAX_MTU);
        assert_eq!(config.keepalive_interval, Duration::from_secs(20));
        assert_eq!(config.keepalive_max_lifetime, Duration::from_secs(90));
        assert!(config.resume_token.is_none());
        assert!(!config.lease);
    }

    #[test]
    fn server_defaults_match_the_protocol_conventions() {
        let config = ServerConfig::new();
        assert!(!config.resume_enable);
        assert_eq!(config.resume_session_duration, Duration::from_secs(30));
        assert_eq!(config.session_sweep_interval, Duration::from_millis(500));
        assert!(config.lease_provider.is_none());
    }

    #[test]
    fn keepalive_lifetime_must_exceed_interval() {
        let result = ClientConfig::new()
            .with_keepalive(Duration::from_secs(10), Duration::from_secs(10));
        assert!(matches!(
            result,
            Err(ConfigError::LifetimeNotAboveInterval { .. })
        ));
    }

    #[test]
    fn mtu_is_validated() {
        assert!(ClientConfig::new().with_fragment_mtu(63).is_err());
        assert!(ServerConfig::new().with_fragment_mtu(64).is_ok());
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert!(ServerConfig::new()
            .with_resume_session_duration(Duration::ZERO)
            .is_err());
        assert!(ServerConfig::new()
            .with_session_sweep_interval(Duration::ZERO)
            .is_err());
    }
}
