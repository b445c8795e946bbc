//! User-facing failures of the login flow.
//!
//! Messages are deliberately terse: nothing reveals which check failed or whether
//! an account exists. Only the rate-limit case carries a retry hint.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Email and password are required")]
    Validation,
    #[error("{message}")]
    RateLimited {
        retry_after_seconds: i64,
        message: String,
    },
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Login is temporarily unavailable, please try again later")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::AuthError;

    #[test]
    fn messages_do_not_leak_details() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid email or password"
        );
        assert_eq!(
            AuthError::Validation.to_string(),
            "Email and password are required"
        );
        let limited = AuthError::RateLimited {
            retry_after_seconds: 60,
            message: "Try again in 1 minute(s).".to_string(),
        };
        assert_eq!(limited.to_string(), "Try again in 1 minute(s).");
    }
}
