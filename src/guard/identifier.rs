//! Identifier keys: one-way digests of `email|address` composites.
//!
//! The limiter indexes its store by these keys only, so the persisted state never
//! holds an email address or a client address in clear text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierKey(String);

impl IdentifierKey {
    /// Derive the key for a raw identifier (lowercase hex SHA-256).
    #[must_use]
    pub fn derive(identifier: &str) -> Self {
        let digest = Sha256::digest(identifier.as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            // Writing to a String cannot fail.
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize an email for lookups and identifier composition.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    email_regex().is_some_and(|regex| regex.is_match(email_normalized))
}

/// Compiled once per process.
fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

/// Build the rate limit identifier for a login attempt.
#[must_use]
pub fn compose_identifier(email: &str, client_address: &str) -> String {
    format!("{}|{}", normalize_email(email), client_address.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_stable_hex_sha256() {
        let key = IdentifierKey::derive("a@x.com|1.2.3.4");
        assert_eq!(key, IdentifierKey::derive("a@x.com|1.2.3.4"));
        assert_ne!(key, IdentifierKey::derive("a@x.com|1.2.3.5"));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!key.as_str().contains("a@x.com"));
    }

    #[test]
    fn derive_matches_known_digest() {
        assert_eq!(
            IdentifierKey::derive("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn compose_identifier_normalizes_email() {
        assert_eq!(
            compose_identifier(" A@X.com ", " 1.2.3.4 "),
            "a@x.com|1.2.3.4"
        );
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email(""));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn email_regex_is_compiled_once() {
        let first = email_regex().map(|regex| regex as *const Regex);
        let second = email_regex().map(|regex| regex as *const Regex);
        assert!(first.is_some());
        assert_eq!(first, second);
    }
}
