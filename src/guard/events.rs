//! Security event log.
//!
//! Events are immutable JSON lines. `SecurityLog` is the only writer: it stamps
//! and serializes each event, hands the line to an [`EventWriter`], and mirrors
//! alert-worthy kinds to the `security_alert` tracing target. Writer failures are
//! logged and dropped; logging never fails a request.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};
use ulid::Ulid;

pub const GUEST_ACTOR: &str = "guest";
const UNKNOWN: &str = "unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FailedLogin,
    AccountLocked,
    LoginSuccess,
    SuspiciousActivity,
    Logout,
    InvalidSession,
    RateLimitExceeded,
    ValidationFailed,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailedLogin => "failed_login",
            Self::AccountLocked => "account_locked",
            Self::LoginSuccess => "login_success",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::Logout => "logout",
            Self::InvalidSession => "invalid_session",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::ValidationFailed => "validation_failed",
        }
    }

    /// Kinds that are also raised on the alert channel.
    #[must_use]
    pub const fn is_alert(self) -> bool {
        matches!(
            self,
            Self::FailedLogin | Self::AccountLocked | Self::SuspiciousActivity
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_kind: EventKind,
    pub actor: String,
    pub origin_address: String,
    pub message: String,
    pub context: BTreeMap<String, Value>,
    pub user_agent: String,
}

impl SecurityEvent {
    #[must_use]
    pub fn new(event_kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            timestamp: Utc::now(),
            event_kind,
            actor: GUEST_ACTOR.to_string(),
            origin_address: UNKNOWN.to_string(),
            message: message.into(),
            context: BTreeMap::new(),
            user_agent: UNKNOWN.to_string(),
        }
    }

    /// Set the actor; `None` keeps the guest actor.
    #[must_use]
    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        if let Some(actor) = actor.filter(|actor| !actor.is_empty()) {
            self.actor = actor.to_string();
        }
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: &str) -> Self {
        if !origin.is_empty() {
            self.origin_address = origin.to_string();
        }
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        if let Some(user_agent) = user_agent.filter(|ua| !ua.is_empty()) {
            self.user_agent = user_agent.to_string();
        }
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Single-line JSON encoding.
    ///
    /// # Errors
    /// Returns an error if the context cannot be serialized.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Durable destination for encoded event lines.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Append one event; `line` is its JSON encoding without a trailing newline.
    ///
    /// # Errors
    /// Returns an error if the line cannot be written.
    async fn append(&self, event: &SecurityEvent, line: &str) -> Result<()>;
}

/// Writer that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventWriter {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryEventWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .await
            .iter()
            .map(|event| event.event_kind)
            .collect()
    }
}

#[async_trait]
impl EventWriter for MemoryEventWriter {
    async fn append(&self, event: &SecurityEvent, _line: &str) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// The event log sink shared by every component.
pub struct SecurityLog {
    writer: Arc<dyn EventWriter>,
}

impl SecurityLog {
    #[must_use]
    pub fn new(writer: Arc<dyn EventWriter>) -> Self {
        Self { writer }
    }

    /// Record an event. Best effort: failures are reported through tracing only.
    pub async fn log(&self, event: SecurityEvent) {
        if event.event_kind.is_alert() {
            error!(
                target: "security_alert",
                kind = %event.event_kind,
                actor = %event.actor,
                origin = %event.origin_address,
                "{}",
                event.message
            );
        }

        let line = match event.to_line() {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to encode security event {}: {err}", event.event_kind);
                return;
            }
        };

        if let Err(err) = self.writer.append(&event, &line).await {
            warn!("Failed to append security event {}: {err}", event.event_kind);
        }
    }
}
