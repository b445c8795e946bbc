//! Authentication orchestrator.
//!
//! Flow Overview (login):
//! 1) Reject empty or malformed input before touching any shared state.
//! 2) Ask the limiter; a locked identifier is answered without verifying the
//!    password, so a locked account costs nothing and records nothing new.
//! 3) Verify credentials on the blocking pool. Unknown accounts are verified
//!    against a dummy hash so both paths take the same time.
//! 4) Success resets the limiter and binds a new session to the request origin;
//!    failure records an attempt. Both are logged.
//!
//! Steps 2 and 4 are separate limiter cycles and nothing is reserved in between.
//! Requests for one identifier that all pass step 2 before any of them reaches
//! step 4 each get a password guess, so a burst of N concurrent requests can make
//! up to N guesses even when N exceeds `max_attempts`. Every one of those failures
//! is still recorded, and the lock lands as soon as the count reaches the limit.
//!
//! No store or session lock is held while the user directory or the verifier runs.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::clock::Clock;
use super::config::GuardConfig;
use super::error::AuthError;
use super::events::{EventKind, SecurityEvent, SecurityLog};
use super::identifier::{compose_identifier, normalize_email, valid_email, IdentifierKey};
use super::integrity::SessionMonitor;
use super::limiter::RateLimiter;
use super::session::{clear_session_cookie, session_cookie, Session, SessionStore};
use super::RequestContext;

/// Account as stored by the external user store.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
}

/// Fields safe to return to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// Read access to user accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by normalized email.
    ///
    /// # Errors
    /// Returns an error when the backing store is unavailable.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Find a user by id.
    ///
    /// # Errors
    /// Returns an error when the backing store is unavailable.
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;
}

/// Password hash verification primitive.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, stored_hash: &str, supplied_secret: &str) -> bool;

    /// Spend the cost of a verification when no account matched.
    fn verify_absent(&self, supplied_secret: &str) {
        let _ = supplied_secret;
    }
}

#[derive(Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub user: PublicUser,
    /// Raw session token; only ever handed to the client.
    pub token: String,
    /// `Set-Cookie` value carrying the token.
    pub cookie: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated {
        user: PublicUser,
        /// The request came from another origin than the session's.
        anomaly: bool,
    },
    Unauthenticated {
        /// `Set-Cookie` value expiring a session that was just terminated.
        clear_cookie: Option<String>,
    },
}

pub struct Authenticator {
    limiter: RateLimiter,
    monitor: SessionMonitor,
    sessions: SessionStore,
    users: Arc<dyn UserDirectory>,
    verifier: Arc<dyn CredentialVerifier>,
    log: Arc<SecurityLog>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        limiter: RateLimiter,
        users: Arc<dyn UserDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        log: Arc<SecurityLog>,
    ) -> Self {
        let monitor = SessionMonitor::new(
            Arc::clone(&log),
            limiter.config().terminate_on_anomaly(),
        );
        let clock = limiter.clock();
        Self {
            limiter,
            monitor,
            sessions: SessionStore::new(),
            users,
            verifier,
            log,
            clock,
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        self.limiter.config()
    }

    /// Authenticate a user and establish a session bound to the request origin.
    ///
    /// # Errors
    /// - `Validation` for empty or malformed input.
    /// - `RateLimited` while the identifier is locked; credentials are not checked.
    /// - `InvalidCredentials` for unknown accounts and wrong passwords alike.
    /// - `Unavailable` when the user directory (or a fail-closed store) is down.
    #[instrument(skip_all, fields(origin = %context.origin))]
    pub async fn login(
        &self,
        request: LoginRequest,
        context: &RequestContext,
    ) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.expose_secret().is_empty() || !valid_email(&email)
        {
            self.log
                .log(
                    event(EventKind::ValidationFailed, "Login rejected: missing or malformed input", context),
                )
                .await;
            return Err(AuthError::Validation);
        }

        let identifier = compose_identifier(&email, &context.origin);
        let decision = self.limiter.check(&identifier).await;
        if !decision.allowed {
            if !decision.locked {
                return Err(AuthError::Unavailable);
            }
            let retry_after_seconds = decision.retry_after(self.clock.now());
            self.log
                .log(
                    event(EventKind::RateLimitExceeded, "Login blocked: too many failed attempts", context)
                        .with_context("identifier_key", IdentifierKey::derive(&identifier).as_str())
                        .with_context("retry_after_seconds", retry_after_seconds),
                )
                .await;
            return Err(AuthError::RateLimited {
                retry_after_seconds,
                message: decision.message,
            });
        }

        let user = match self.users.find_by_email(&email).await {
            Ok(user) => user,
            Err(err) => {
                error!("User lookup failed: {err}");
                return Err(AuthError::Unavailable);
            }
        };

        let verified = self
            .verify_credentials(user.as_ref().map(|u| u.password_hash.clone()), request.password)
            .await;

        match user {
            Some(user) if verified => self.approve(&user, &identifier, context).await,
            _ => Err(self.reject(&identifier, context).await),
        }
    }

    /// Resolve a session token for the current request.
    #[instrument(skip_all, fields(origin = %context.origin))]
    pub async fn check_session(&self, token: Option<&str>, context: &RequestContext) -> SessionStatus {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            return SessionStatus::Unauthenticated { clear_cookie: None };
        };
        let Some(session) = self.sessions.lookup(token, self.clock.now()).await else {
            return SessionStatus::Unauthenticated { clear_cookie: None };
        };

        let report = self.monitor.verify(&session, context).await;
        if report.terminate {
            self.sessions.remove(token).await;
            self.log
                .log(
                    event(EventKind::InvalidSession, "Session terminated after origin change", context)
                        .with_actor(Some(&session.user_id))
                        .with_context("reason", "origin_mismatch"),
                )
                .await;
            return SessionStatus::Unauthenticated {
                clear_cookie: Some(self.clear_cookie()),
            };
        }

        match self.users.find_by_id(&session.user_id).await {
            Ok(Some(user)) => SessionStatus::Authenticated {
                user: PublicUser::from(&user),
                anomaly: report.anomaly,
            },
            Ok(None) => {
                self.sessions.remove(token).await;
                self.log
                    .log(
                        event(EventKind::InvalidSession, "Session references a user that no longer exists", context)
                            .with_actor(Some(&session.user_id))
                            .with_context("reason", "user_not_found"),
                    )
                    .await;
                SessionStatus::Unauthenticated {
                    clear_cookie: Some(self.clear_cookie()),
                }
            }
            Err(err) => {
                error!("User lookup failed during session check: {err}");
                SessionStatus::Unauthenticated { clear_cookie: None }
            }
        }
    }

    /// End the session (if any) and return the cookie that clears it.
    #[instrument(skip_all, fields(origin = %context.origin))]
    pub async fn logout(&self, token: Option<&str>, context: &RequestContext) -> String {
        let session = match token.filter(|token| !token.is_empty()) {
            Some(token) => self.sessions.remove(token).await,
            None => None,
        };

        let actor = session.as_ref().map(|session| session.user_id.as_str());
        self.log
            .log(event(EventKind::Logout, "User logged out", context).with_actor(actor))
            .await;

        self.clear_cookie()
    }

    async fn approve(
        &self,
        user: &UserRecord,
        identifier: &str,
        context: &RequestContext,
    ) -> Result<LoginOutcome, AuthError> {
        self.limiter.reset(identifier).await;

        let now = self.clock.now();
        let ttl = self.config().session_ttl_seconds();
        let session = Session {
            user_id: user.id.clone(),
            origin_address_at_creation: context.origin.clone(),
            created_at: now,
            expires_at: now.saturating_add(ttl),
        };
        let token = match self.sessions.create(session).await {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to create session: {err}");
                return Err(AuthError::Unavailable);
            }
        };

        info!(user_id = %user.id, "login succeeded");
        self.log
            .log(event(EventKind::LoginSuccess, "User logged in", context).with_actor(Some(&user.id)))
            .await;

        Ok(LoginOutcome {
            user: PublicUser::from(user),
            cookie: session_cookie(&token, ttl, self.config().cookie_secure()),
            token,
        })
    }

    async fn reject(&self, identifier: &str, context: &RequestContext) -> AuthError {
        let decision = self.limiter.record_attempt(identifier).await;
        self.log
            .log(
                event(EventKind::FailedLogin, "Failed login attempt", context)
                    .with_context("identifier_key", IdentifierKey::derive(identifier).as_str())
                    .with_context("remaining_attempts", decision.remaining)
                    .with_context("locked", decision.locked),
            )
            .await;
        AuthError::InvalidCredentials
    }

    async fn verify_credentials(&self, stored_hash: Option<String>, password: SecretString) -> bool {
        let verifier = Arc::clone(&self.verifier);
        let result = tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => verifier.verify(&hash, password.expose_secret()),
            None => {
                verifier.verify_absent(password.expose_secret());
                false
            }
        })
        .await;

        result.unwrap_or_else(|err| {
            error!("Credential verification task failed: {err}");
            false
        })
    }

    fn clear_cookie(&self) -> String {
        clear_session_cookie(self.config().cookie_secure())
    }
}

fn event(kind: EventKind, message: &str, context: &RequestContext) -> SecurityEvent {
    SecurityEvent::new(kind, message)
        .with_origin(&context.origin)
        .with_user_agent(context.user_agent.as_deref())
}
