use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};

use crate::{
    api::{self, AppState, Argon2Verifier, JsonUserDirectory},
    cli::actions::GuardSettings,
    guard::Authenticator,
};

#[derive(Debug)]
pub struct Args {
    pub guard: GuardSettings,
    pub port: u16,
    pub users_path: PathBuf,
    pub trust_proxy_headers: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, a state file cannot be opened,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (limiter, log) = args.guard.build()?;

    let users = JsonUserDirectory::load(&args.users_path)?;
    if users.is_empty() {
        info!("users file {} is empty; every login will fail", args.users_path.display());
    }
    let verifier = Argon2Verifier::new().context("Failed to initialize password verifier")?;

    let auth = Authenticator::new(limiter, Arc::new(users), Arc::new(verifier), log);
    let state = Arc::new(AppState {
        auth: Arc::new(auth),
        trust_proxy_headers: args.trust_proxy_headers,
    });

    api::new(args.port, state).await
}

fn log_startup_args(args: &Args) {
    let config = &args.guard.config;
    debug!(
        port = args.port,
        users = %args.users_path.display(),
        store = %args.guard.store_path.display(),
        event_log = %args.guard.event_log_path.display(),
        max_attempts = config.max_attempts(),
        window_seconds = config.window_seconds(),
        lockout_seconds = config.lockout_seconds(),
        fail_open = config.fail_open(),
        terminate_on_anomaly = config.terminate_on_anomaly(),
        trust_proxy_headers = args.trust_proxy_headers,
        "server startup arguments"
    );
}
