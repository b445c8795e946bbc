//! Session integrity: flag requests whose origin differs from the session's origin.
//!
//! An anomaly is always logged as `suspicious_activity`. Whether the session is
//! terminated is the `terminate_on_anomaly` policy; the default keeps it alive so
//! users behind rotating NAT or mobile networks are not logged out.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use super::events::{EventKind, SecurityEvent, SecurityLog};
use super::session::Session;
use super::RequestContext;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub anomaly: bool,
    /// The caller should end the session.
    pub terminate: bool,
}

pub struct SessionMonitor {
    log: Arc<SecurityLog>,
    terminate_on_anomaly: bool,
}

impl SessionMonitor {
    #[must_use]
    pub fn new(log: Arc<SecurityLog>, terminate_on_anomaly: bool) -> Self {
        Self {
            log,
            terminate_on_anomaly,
        }
    }

    /// Compare the session's origin with the current request's origin.
    pub async fn verify(&self, session: &Session, request: &RequestContext) -> IntegrityReport {
        let bound = normalize_origin(&session.origin_address_at_creation);
        let current = normalize_origin(&request.origin);
        if bound == current {
            return IntegrityReport::default();
        }

        debug!(user_id = %session.user_id, %bound, %current, "session origin changed");
        self.log
            .log(
                SecurityEvent::new(
                    EventKind::SuspiciousActivity,
                    "Session used from a different origin than it was created from",
                )
                .with_actor(Some(&session.user_id))
                .with_origin(&request.origin)
                .with_user_agent(request.user_agent.as_deref())
                .with_context("user_id", session.user_id.as_str())
                .with_context("session_origin", bound.as_str())
                .with_context("request_origin", current.as_str())
                .with_context("terminated", self.terminate_on_anomaly),
            )
            .await;

        IntegrityReport {
            anomaly: true,
            terminate: self.terminate_on_anomaly,
        }
    }
}

/// Canonical text form of an origin: parsed IPs are re-rendered and IPv4-mapped
/// IPv6 addresses collapse to IPv4; anything else is compared trimmed.
fn normalize_origin(origin: &str) -> String {
    let trimmed = origin.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => v6
            .to_ipv4_mapped()
            .map_or_else(|| v6.to_string(), |v4| v4.to_string()),
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::events::MemoryEventWriter;
    use serde_json::Value;

    fn session() -> Session {
        Session {
            user_id: "u-1".to_string(),
            origin_address_at_creation: "1.2.3.4".to_string(),
            created_at: 0,
            expires_at: 60,
        }
    }

    fn monitor(terminate: bool) -> (SessionMonitor, Arc<MemoryEventWriter>) {
        let events = Arc::new(MemoryEventWriter::new());
        let log = Arc::new(SecurityLog::new(events.clone()));
        (SessionMonitor::new(log, terminate), events)
    }

    #[test]
    fn normalize_origin_collapses_mapped_ipv4() {
        assert_eq!(normalize_origin("::ffff:1.2.3.4"), "1.2.3.4");
        assert_eq!(normalize_origin(" 1.2.3.4 "), "1.2.3.4");
        assert_eq!(normalize_origin("2001:DB8::1"), "2001:db8::1");
        assert_eq!(normalize_origin("unknown"), "unknown");
    }

    #[tokio::test]
    async fn same_origin_is_clean() {
        let (monitor, events) = monitor(false);
        let report = monitor
            .verify(&session(), &RequestContext::new("::ffff:1.2.3.4"))
            .await;
        assert_eq!(report, IntegrityReport::default());
        assert!(events.events().await.is_empty());
    }

    #[tokio::test]
    async fn changed_origin_is_logged_but_kept_by_default() {
        let (monitor, events) = monitor(false);
        let report = monitor
            .verify(&session(), &RequestContext::new("5.6.7.8"))
            .await;
        assert!(report.anomaly);
        assert!(!report.terminate);

        let events = events.events().await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_kind, EventKind::SuspiciousActivity);
        assert_eq!(event.actor, "u-1");
        assert_eq!(
            event.context.get("session_origin").and_then(Value::as_str),
            Some("1.2.3.4")
        );
        assert_eq!(
            event.context.get("request_origin").and_then(Value::as_str),
            Some("5.6.7.8")
        );
    }

    #[tokio::test]
    async fn changed_origin_terminates_when_configured() {
        let (monitor, _events) = monitor(true);
        let report = monitor
            .verify(&session(), &RequestContext::new("5.6.7.8"))
            .await;
        assert!(report.anomaly);
        assert!(report.terminate);
    }
}
