//! Typed configuration for the limiter, the session monitor and session cookies.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_WINDOW_SECONDS: i64 = 15 * 60;
pub const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
/// Upper bound for every duration given in seconds.
pub const MAX_DURATION_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardConfig {
    max_attempts: u32,
    window_seconds: i64,
    lockout_seconds: i64,
    fail_open: bool,
    terminate_on_anomaly: bool,
    store_timeout: Duration,
    session_ttl_seconds: i64,
    cookie_secure: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            fail_open: true,
            terminate_on_anomaly: false,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            cookie_secure: false,
        }
    }
}

impl GuardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_window_seconds(mut self, seconds: i64) -> Self {
        self.window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    /// Choose what the limiter does when the store cannot be read or written.
    ///
    /// `true` keeps logins available (allow), `false` denies until the store recovers.
    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Terminate sessions whose request origin differs from the origin at creation.
    ///
    /// Off by default: shared NAT and mobile networks change origins legitimately.
    /// Review this setting for deployments with stricter requirements.
    #[must_use]
    pub fn with_terminate_on_anomaly(mut self, terminate: bool) -> Self {
        self.terminate_on_anomaly = terminate;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    #[must_use]
    pub fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    #[must_use]
    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    #[must_use]
    pub fn terminate_on_anomaly(&self) -> bool {
        self.terminate_on_anomaly
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    /// Reject values that would disable the limiter or make sessions unusable.
    ///
    /// # Errors
    /// Returns an error if any limit or duration is zero or negative, or if a
    /// duration in seconds exceeds [`MAX_DURATION_SECONDS`].
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        check_seconds("window_seconds", self.window_seconds)?;
        check_seconds("lockout_seconds", self.lockout_seconds)?;
        if self.store_timeout.is_zero() {
            bail!("store_timeout must be greater than 0");
        }
        check_seconds("session_ttl_seconds", self.session_ttl_seconds)?;
        Ok(())
    }
}

fn check_seconds(name: &str, seconds: i64) -> Result<()> {
    if seconds <= 0 {
        bail!("{name} must be greater than 0");
    }
    if seconds > MAX_DURATION_SECONDS {
        bail!("{name} must be at most {MAX_DURATION_SECONDS} (one year)");
    }
    Ok(())
}
