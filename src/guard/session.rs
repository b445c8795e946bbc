//! Server-side sessions bound to the origin that created them.
//!
//! The raw token only ever lives in the client cookie; the store is keyed by its
//! SHA-256 digest.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub const SESSION_COOKIE_NAME: &str = "gatekeeper_session";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub origin_address_at_creation: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session and return the raw token for the cookie.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub async fn create(&self, session: Session) -> Result<String> {
        let token = generate_session_token()?;
        let mut sessions = self.sessions.lock().await;
        let now = session.created_at;
        sessions.retain(|_, existing| !existing.is_expired(now));
        sessions.insert(hash_session_token(&token), session);
        Ok(token)
    }

    /// Resolve a raw token; expired sessions are removed and reported as missing.
    pub async fn lookup(&self, token: &str, now: i64) -> Option<Session> {
        let token_hash = hash_session_token(token);
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&token_hash) {
            Some(session) if session.is_expired(now) => {
                sessions.remove(&token_hash);
                None
            }
            Some(session) => Some(session.clone()),
            None => None,
        }
    }

    pub async fn remove(&self, token: &str) -> Option<Session> {
        self.sessions
            .lock()
            .await
            .remove(&hash_session_token(token))
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

/// Create a new session token for the auth cookie.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session token so raw values never reach the session store.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// `HttpOnly` cookie carrying the session token.
#[must_use]
pub fn session_cookie(token: &str, ttl_seconds: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Expire the session cookie for every path under the site root.
#[must_use]
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
