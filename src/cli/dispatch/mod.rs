use crate::cli::actions::{
    maintenance::{HashArgs, IdentifierArgs},
    server, Action, GuardSettings,
};
use crate::guard::GuardConfig;
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("server", sub)) => {
            let mut guard = guard_settings(sub)?;
            guard.config = guard
                .config
                .with_session_ttl_seconds(
                    sub.get_one::<i64>("session-ttl-seconds")
                        .copied()
                        .unwrap_or(crate::guard::config::DEFAULT_SESSION_TTL_SECONDS),
                )
                .with_cookie_secure(sub.get_flag("cookie-secure"));

            Ok(Action::Server(server::Args {
                guard,
                port: sub.get_one::<u16>("port").copied().unwrap_or(8080),
                users_path: sub
                    .get_one::<String>("users")
                    .map(PathBuf::from)
                    .context("missing required argument: --users")?,
                trust_proxy_headers: sub.get_flag("trust-proxy"),
            }))
        }
        Some(("status", sub)) => Ok(Action::Status(identifier_args(sub)?)),
        Some(("unlock", sub)) => Ok(Action::Unlock(identifier_args(sub)?)),
        Some(("prune", sub)) => Ok(Action::Prune(guard_settings(sub)?)),
        Some(("hash-password", sub)) => {
            let password = sub
                .get_one::<String>("password")
                .cloned()
                .context("missing required argument: --password")?;
            Ok(Action::HashPassword(HashArgs {
                password: SecretString::from(password),
            }))
        }
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}

// Global args are propagated down, so they are read from the subcommand matches.
fn guard_settings(matches: &ArgMatches) -> Result<GuardSettings> {
    let store_path = matches
        .get_one::<String>("store")
        .map(PathBuf::from)
        .context("missing required argument: --store")?;
    let event_log_path = matches
        .get_one::<String>("event-log")
        .map(PathBuf::from)
        .context("missing required argument: --event-log")?;

    let mut config = GuardConfig::new()
        .with_fail_open(!matches.get_flag("fail-closed"))
        .with_terminate_on_anomaly(matches.get_flag("terminate-on-anomaly"));
    if let Some(max_attempts) = matches.get_one::<u32>("max-attempts") {
        config = config.with_max_attempts(*max_attempts);
    }
    if let Some(seconds) = matches.get_one::<i64>("window-seconds") {
        config = config.with_window_seconds(*seconds);
    }
    if let Some(seconds) = matches.get_one::<i64>("lockout-seconds") {
        config = config.with_lockout_seconds(*seconds);
    }
    if let Some(ms) = matches.get_one::<u64>("store-timeout-ms") {
        config = config.with_store_timeout(Duration::from_millis(*ms));
    }

    Ok(GuardSettings {
        store_path,
        event_log_path,
        config,
    })
}

fn identifier_args(matches: &ArgMatches) -> Result<IdentifierArgs> {
    Ok(IdentifierArgs {
        guard: guard_settings(matches)?,
        email: matches
            .get_one::<String>("email")
            .cloned()
            .context("missing required argument: --email")?,
        origin: matches
            .get_one::<String>("origin")
            .cloned()
            .context("missing required argument: --origin")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    fn dispatch(args: &[&str]) -> Result<Action> {
        let matches = commands::new().try_get_matches_from(args)?;
        handler(&matches)
    }

    fn with_clean_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("GATEKEEPER_STORE", None::<&str>),
                ("GATEKEEPER_EVENT_LOG", None),
                ("GATEKEEPER_MAX_ATTEMPTS", None),
                ("GATEKEEPER_FAIL_CLOSED", None),
                ("GATEKEEPER_TERMINATE_ON_ANOMALY", None),
                ("GATEKEEPER_COOKIE_SECURE", None),
                ("GATEKEEPER_TRUST_PROXY", None),
                ("GATEKEEPER_SESSION_TTL_SECONDS", None),
                ("GATEKEEPER_PORT", None),
                ("GATEKEEPER_USERS", None),
            ],
            f,
        );
    }

    #[test]
    fn server_action_carries_config() {
        with_clean_env(|| {
            let action = dispatch(&[
                "gatekeeper",
                "--fail-closed",
                "server",
                "--users",
                "users.json",
                "--port",
                "9000",
                "--session-ttl-seconds",
                "600",
                "--cookie-secure",
                "--trust-proxy",
            ]);
            let Ok(Action::Server(args)) = action else {
                panic!("expected server action");
            };
            assert_eq!(args.port, 9000);
            assert_eq!(args.users_path, PathBuf::from("users.json"));
            assert!(args.trust_proxy_headers);
            assert!(!args.guard.config.fail_open());
            assert!(args.guard.config.cookie_secure());
            assert_eq!(args.guard.config.session_ttl_seconds(), 600);
            assert_eq!(args.guard.store_path, PathBuf::from("gatekeeper-limits.json"));
        });
    }

    #[test]
    fn unlock_action_reads_identifier() {
        with_clean_env(|| {
            let action = dispatch(&[
                "gatekeeper",
                "unlock",
                "--email",
                "a@x.com",
                "--origin",
                "1.2.3.4",
                "--max-attempts",
                "3",
            ]);
            let Ok(Action::Unlock(args)) = action else {
                panic!("expected unlock action");
            };
            assert_eq!(args.email, "a@x.com");
            assert_eq!(args.origin, "1.2.3.4");
            assert_eq!(args.guard.config.max_attempts(), 3);
            assert!(args.guard.config.fail_open());
        });
    }

    #[test]
    fn prune_and_hash_password_actions() {
        with_clean_env(|| {
            let action = dispatch(&["gatekeeper", "prune", "--window-seconds", "60"]);
            let Ok(Action::Prune(settings)) = action else {
                panic!("expected prune action");
            };
            assert_eq!(settings.config.window_seconds(), 60);

            let action = dispatch(&["gatekeeper", "hash-password", "--password", "s3cret"]);
            let Ok(Action::HashPassword(args)) = action else {
                panic!("expected hash-password action");
            };
            assert_eq!(args.password.expose_secret(), "s3cret");
        });
    }
}
