//! Brute-force protection and security audit core.
//!
//! Components, leaves first:
//! - [`events`]: the security event log sink.
//! - [`store`]: persistence of per-identifier attempt records.
//! - [`limiter`]: sliding-window decisions on top of the store.
//! - [`integrity`]: origin binding checks for established sessions.
//! - [`auth`]: the login / session-check / logout orchestrator, the only entry
//!   point used by the HTTP layer.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_file;
pub mod events;
pub mod identifier;
pub mod integrity;
pub mod limiter;
pub mod session;
pub mod store;

pub use auth::{
    Authenticator, CredentialVerifier, LoginOutcome, LoginRequest, PublicUser, SessionStatus,
    UserDirectory, UserRecord,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use error::AuthError;
pub use event_file::FileEventWriter;
pub use events::{EventKind, EventWriter, MemoryEventWriter, SecurityEvent, SecurityLog};
pub use identifier::IdentifierKey;
pub use integrity::{IntegrityReport, SessionMonitor};
pub use limiter::{Decision, RateLimiter};
pub use session::{Session, SessionStore};
pub use store::{AttemptMap, AttemptRecord, FileStore, MemoryStore, RateLimitStore, StoreError};

/// Network facts about the request being served.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub origin: String,
    pub user_agent: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            user_agent: None,
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}
