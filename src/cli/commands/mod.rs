pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("gatekeeper")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(server_command())
        .subcommand(identifier_command(
            "status",
            "Show the attempt record for an email and client address",
        ))
        .subcommand(identifier_command(
            "unlock",
            "Clear failed attempts and any lockout for an email and client address",
        ))
        .subcommand(Command::new("prune").about("Drop records whose attempts and lockout expired"))
        .subcommand(
            Command::new("hash-password")
                .about("Print an Argon2id PHC hash for the users file")
                .arg(
                    Arg::new("password")
                        .long("password")
                        .help("Password to hash")
                        .env("GATEKEEPER_PASSWORD")
                        .hide_env_values(true)
                        .required(true),
                ),
        );

    let command = with_guard_args(command);
    logging::with_args(command)
}

fn server_command() -> Command {
    Command::new("server")
        .about("Serve the login, session and logout endpoints")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("GATEKEEPER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("users")
                .short('u')
                .long("users")
                .help("JSON users file with Argon2 password hashes")
                .env("GATEKEEPER_USERS")
                .required(true),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session lifetime in seconds")
                .default_value("43200")
                .env("GATEKEEPER_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark the session cookie Secure (serve over HTTPS)")
                .env("GATEKEEPER_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("trust-proxy")
                .long("trust-proxy")
                .help("Take the client address from X-Forwarded-For / X-Real-IP")
                .env("GATEKEEPER_TRUST_PROXY")
                .action(ArgAction::SetTrue),
        )
}

fn identifier_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("email")
                .short('e')
                .long("email")
                .help("Account email")
                .required(true),
        )
        .arg(
            Arg::new("origin")
                .short('o')
                .long("origin")
                .help("Client address the attempts came from")
                .required(true),
        )
}

fn with_guard_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("store")
                .long("store")
                .help("Rate limit store (JSON document)")
                .default_value("gatekeeper-limits.json")
                .env("GATEKEEPER_STORE")
                .global(true),
        )
        .arg(
            Arg::new("event-log")
                .long("event-log")
                .help("Security event log (JSON lines, append only)")
                .default_value("security-events.log")
                .env("GATEKEEPER_EVENT_LOG")
                .global(true),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .help("Failed attempts allowed per window")
                .default_value("5")
                .env("GATEKEEPER_MAX_ATTEMPTS")
                .global(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("window-seconds")
                .long("window-seconds")
                .help("Sliding window length in seconds")
                .default_value("900")
                .env("GATEKEEPER_WINDOW_SECONDS")
                .global(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("lockout-seconds")
                .long("lockout-seconds")
                .help("Lockout duration in seconds")
                .default_value("900")
                .env("GATEKEEPER_LOCKOUT_SECONDS")
                .global(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("store-timeout-ms")
                .long("store-timeout-ms")
                .help("Timeout for a single store load or save, in milliseconds")
                .default_value("2000")
                .env("GATEKEEPER_STORE_TIMEOUT_MS")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("fail-closed")
                .long("fail-closed")
                .help("Deny logins while the rate limit store is unavailable")
                .env("GATEKEEPER_FAIL_CLOSED")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("terminate-on-anomaly")
                .long("terminate-on-anomaly")
                .help("End sessions used from a different client address")
                .env("GATEKEEPER_TERMINATE_ON_ANOMALY")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::config::{
        DEFAULT_LOCKOUT_SECONDS, DEFAULT_MAX_ATTEMPTS, DEFAULT_SESSION_TTL_SECONDS,
        DEFAULT_STORE_TIMEOUT, DEFAULT_WINDOW_SECONDS,
    };

    const GUARD_ENV: [&str; 8] = [
        "GATEKEEPER_STORE",
        "GATEKEEPER_EVENT_LOG",
        "GATEKEEPER_MAX_ATTEMPTS",
        "GATEKEEPER_WINDOW_SECONDS",
        "GATEKEEPER_LOCKOUT_SECONDS",
        "GATEKEEPER_FAIL_CLOSED",
        "GATEKEEPER_TERMINATE_ON_ANOMALY",
        "GATEKEEPER_LOG_LEVEL",
    ];

    fn without_guard_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(GUARD_ENV.map(|key| (key, None::<&str>)), f);
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "gatekeeper");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some(env!("CARGO_PKG_DESCRIPTION").to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_server_args() {
        temp_env::with_vars(
            [
                ("GATEKEEPER_PORT", None::<&str>),
                ("GATEKEEPER_USERS", None),
                ("GATEKEEPER_SESSION_TTL_SECONDS", None),
                ("GATEKEEPER_TRUST_PROXY", None),
            ],
            || {
                let matches = new().get_matches_from(vec![
                    "gatekeeper",
                    "server",
                    "--port",
                    "9090",
                    "--users",
                    "/etc/gatekeeper/users.json",
                ]);
                let Some(("server", sub)) = matches.subcommand() else {
                    panic!("expected server subcommand");
                };
                assert_eq!(sub.get_one::<u16>("port").copied(), Some(9090));
                assert_eq!(
                    sub.get_one::<String>("users").cloned(),
                    Some("/etc/gatekeeper/users.json".to_string())
                );
                assert!(!sub.get_flag("trust-proxy"));
                assert_eq!(
                    sub.get_one::<i64>("session-ttl-seconds").copied(),
                    Some(DEFAULT_SESSION_TTL_SECONDS)
                );
            },
        );
    }

    #[test]
    fn test_guard_defaults() {
        without_guard_env(|| {
            let matches = new().get_matches_from(vec!["gatekeeper", "prune"]);
            let Some(("prune", sub)) = matches.subcommand() else {
                panic!("expected prune subcommand");
            };
            assert_eq!(
                sub.get_one::<u32>("max-attempts").copied(),
                Some(DEFAULT_MAX_ATTEMPTS)
            );
            assert_eq!(
                sub.get_one::<i64>("window-seconds").copied(),
                Some(DEFAULT_WINDOW_SECONDS)
            );
            assert_eq!(
                sub.get_one::<i64>("lockout-seconds").copied(),
                Some(DEFAULT_LOCKOUT_SECONDS)
            );
            assert_eq!(
                sub.get_one::<u64>("store-timeout-ms").map(|ms| u128::from(*ms)),
                Some(DEFAULT_STORE_TIMEOUT.as_millis())
            );
            assert!(!sub.get_flag("fail-closed"));
            assert!(!sub.get_flag("terminate-on-anomaly"));
        });
    }

    #[test]
    fn test_guard_args_after_subcommand() {
        without_guard_env(|| {
            let matches = new().get_matches_from(vec![
                "gatekeeper",
                "status",
                "--email",
                "a@x.com",
                "--origin",
                "1.2.3.4",
                "--store",
                "/tmp/limits.json",
                "--max-attempts",
                "3",
                "--fail-closed",
            ]);
            let Some(("status", sub)) = matches.subcommand() else {
                panic!("expected status subcommand");
            };
            assert_eq!(
                sub.get_one::<String>("store").cloned(),
                Some("/tmp/limits.json".to_string())
            );
            assert_eq!(sub.get_one::<u32>("max-attempts").copied(), Some(3));
            assert!(sub.get_flag("fail-closed"));
            assert_eq!(
                sub.get_one::<String>("email").cloned(),
                Some("a@x.com".to_string())
            );
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("GATEKEEPER_STORE", Some("/var/lib/gatekeeper/limits.json")),
                ("GATEKEEPER_MAX_ATTEMPTS", Some("10")),
                ("GATEKEEPER_TERMINATE_ON_ANOMALY", Some("true")),
                ("GATEKEEPER_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["gatekeeper", "prune"]);
                let Some(("prune", sub)) = matches.subcommand() else {
                    panic!("expected prune subcommand");
                };
                assert_eq!(
                    sub.get_one::<String>("store").cloned(),
                    Some("/var/lib/gatekeeper/limits.json".to_string())
                );
                assert_eq!(sub.get_one::<u32>("max-attempts").copied(), Some(10));
                assert!(sub.get_flag("terminate-on-anomaly"));
                assert_eq!(matches.get_one::<u8>("verbosity").copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("GATEKEEPER_LOG_LEVEL", Some(level))], || {
                let matches = new().get_matches_from(vec!["gatekeeper", "prune"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            temp_env::with_vars([("GATEKEEPER_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["gatekeeper".to_string()];

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }
                args.push("prune".to_string());

                let matches = new().get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_subcommand_required() {
        let result = new().try_get_matches_from(vec!["gatekeeper"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_identifier_args_required() {
        let result = new().try_get_matches_from(vec!["gatekeeper", "unlock", "--email", "a@x.com"]);
        assert_eq!(
            result.map_err(|e| e.kind()).err(),
            Some(clap::error::ErrorKind::MissingRequiredArgument)
        );
    }
}
