//! Operator commands against the rate limit store.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use crate::{
    api::Argon2Verifier,
    cli::actions::GuardSettings,
    guard::{
        identifier::{compose_identifier, normalize_email},
        IdentifierKey,
    },
};

#[derive(Debug)]
pub struct IdentifierArgs {
    pub guard: GuardSettings,
    pub email: String,
    pub origin: String,
}

impl IdentifierArgs {
    fn identifier(&self) -> String {
        compose_identifier(&normalize_email(&self.email), self.origin.trim())
    }
}

#[derive(Debug)]
pub struct HashArgs {
    pub password: SecretString,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub identifier_key: String,
    pub attempts: Vec<i64>,
    pub locked_until: i64,
    pub locked: bool,
}

/// Print the stored record for an identifier as JSON.
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn status(args: IdentifierArgs) -> Result<()> {
    let report = status_report(&args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Remove the record for an identifier.
/// # Errors
/// Returns an error if the store cannot be read.
pub async fn unlock(args: IdentifierArgs) -> Result<()> {
    if unlock_identifier(&args).await? {
        println!("unlocked {}", args.email.trim());
    } else {
        println!("no record for {}", args.email.trim());
    }
    Ok(())
}

/// Drop expired records.
/// # Errors
/// Returns an error if the store cannot be read or written.
pub async fn prune(settings: GuardSettings) -> Result<()> {
    let purged = prune_store(&settings).await?;
    println!("purged {purged} stale record(s)");
    Ok(())
}

/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(args: &HashArgs) -> Result<()> {
    let verifier = Argon2Verifier::new()?;
    println!("{}", verifier.hash_password(args.password.expose_secret())?);
    Ok(())
}

async fn status_report(args: &IdentifierArgs) -> Result<StatusReport> {
    let (limiter, _log) = args.guard.build()?;
    let identifier = args.identifier();
    let record = limiter
        .inspect(&identifier)
        .await
        .context("Rate limit store unavailable")?
        .unwrap_or_default();

    let now = limiter.clock().now();
    Ok(StatusReport {
        identifier_key: IdentifierKey::derive(&identifier).to_string(),
        locked: record.is_locked(now),
        attempts: record.attempts,
        locked_until: record.locked_until,
    })
}

async fn unlock_identifier(args: &IdentifierArgs) -> Result<bool> {
    let (limiter, _log) = args.guard.build()?;
    let identifier = args.identifier();

    // Surface store errors; `reset` alone cannot tell them apart from a missing record.
    if limiter
        .inspect(&identifier)
        .await
        .context("Rate limit store unavailable")?
        .is_none()
    {
        return Ok(false);
    }

    let removed = limiter.reset(&identifier).await;
    if removed {
        info!(identifier_key = %IdentifierKey::derive(&identifier), "identifier unlocked by operator");
    }
    Ok(removed)
}

async fn prune_store(settings: &GuardSettings) -> Result<usize> {
    let (limiter, _log) = settings.build()?;
    limiter
        .purge_stale()
        .await
        .context("Failed to prune rate limit store")
}
