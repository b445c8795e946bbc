//! # Gatekeeper (Brute-Force Protection & Security Audit Core)
//!
//! `gatekeeper` gates every authentication attempt of the marketplace. It owns
//! three concerns that must stay correct under many simultaneous logins:
//!
//! ## Rate Limiting
//!
//! Failed attempts are tracked per identifier (normalized email + client
//! address) inside a sliding window. Reaching the limit locks the identifier
//! for a fixed period. Identifiers are stored as SHA-256 digests only, so the
//! persisted store never contains an email address or IP.
//!
//! ## Security Audit Log
//!
//! Every security-relevant action becomes an immutable JSON line. Failed
//! logins, lockouts, and suspicious activity are mirrored to the alert channel.
//!
//! ## Session Integrity
//!
//! Sessions remember the origin they were created from. Requests from a
//! different origin are reported as suspicious; terminating them is a policy
//! switch (`terminate_on_anomaly`), off by default.

pub mod api;
pub mod cli;
pub mod guard;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
