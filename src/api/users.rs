//! File-backed user directory and Argon2 credential verification.
//!
//! The users file is a JSON array loaded once at startup:
//! `[{"id": "...", "email": "...", "display_name": "...", "password_hash": "$argon2id$..."}]`

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, path::Path};
use tracing::{debug, warn};

use crate::guard::{
    identifier::normalize_email, CredentialVerifier, UserDirectory, UserRecord,
};

const DUMMY_SECRET: &[u8] = b"gatekeeper-absent-account";

#[derive(Deserialize)]
struct UserEntry {
    id: String,
    email: String,
    #[serde(default)]
    display_name: String,
    password_hash: String,
}

/// In-memory directory indexed by normalized email.
#[derive(Debug, Default)]
pub struct JsonUserDirectory {
    by_email: HashMap<String, UserRecord>,
    email_by_id: HashMap<String, String>,
}

impl JsonUserDirectory {
    /// Load the users file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or holds duplicate ids or emails.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read users file {}", path.display()))?;
        let entries: Vec<UserEntry> = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid users file {}", path.display()))?;

        let records = entries
            .into_iter()
            .map(|entry| UserRecord {
                id: entry.id,
                email: entry.email,
                display_name: entry.display_name,
                password_hash: entry.password_hash,
            })
            .collect();
        let directory = Self::from_records(records)?;
        debug!(users = directory.len(), "loaded user directory");
        Ok(directory)
    }

    /// # Errors
    /// Returns an error on duplicate ids or emails.
    pub fn from_records(records: Vec<UserRecord>) -> Result<Self> {
        let mut directory = Self::default();
        for mut record in records {
            record.email = normalize_email(&record.email);
            if directory.email_by_id.contains_key(&record.id) {
                return Err(anyhow!("Duplicate user id: {}", record.id));
            }
            if directory.by_email.contains_key(&record.email) {
                return Err(anyhow!("Duplicate user email: {}", record.email));
            }
            directory
                .email_by_id
                .insert(record.id.clone(), record.email.clone());
            directory.by_email.insert(record.email.clone(), record);
        }
        Ok(directory)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

#[async_trait]
impl UserDirectory for JsonUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self.by_email.get(email).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .email_by_id
            .get(id)
            .and_then(|email| self.by_email.get(email))
            .cloned())
    }
}

/// Verifies Argon2 PHC strings. Unknown accounts are checked against a dummy
/// hash produced with the same parameters as new hashes.
pub struct Argon2Verifier {
    hasher: Argon2<'static>,
    dummy_hash: String,
}

impl Argon2Verifier {
    /// Verifier using the default Argon2id parameters.
    ///
    /// # Errors
    /// Returns an error if the dummy hash cannot be computed.
    pub fn new() -> Result<Self> {
        Self::from_hasher(Argon2::default())
    }

    /// # Errors
    /// Returns an error if the parameters are invalid.
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|err| anyhow!("Invalid Argon2 parameters: {err}"))?;
        Self::from_hasher(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn from_hasher(hasher: Argon2<'static>) -> Result<Self> {
        let dummy_hash = hash_with(&hasher, DUMMY_SECRET)?;
        Ok(Self { hasher, dummy_hash })
    }

    /// Hash a password into a PHC string suitable for the users file.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        hash_with(&self.hasher, password.as_bytes())
    }
}

impl CredentialVerifier for Argon2Verifier {
    fn verify(&self, stored_hash: &str, supplied_secret: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Stored password hash is not a valid PHC string: {err}");
                return false;
            }
        };
        self.hasher
            .verify_password(supplied_secret.as_bytes(), &parsed)
            .is_ok()
    }

    fn verify_absent(&self, supplied_secret: &str) {
        let _ = self.verify(&self.dummy_hash, supplied_secret);
    }
}

fn hash_with(hasher: &Argon2<'_>, secret: &[u8]) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    hasher
        .hash_password(secret, &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("Failed to hash password: {err}"))
}
