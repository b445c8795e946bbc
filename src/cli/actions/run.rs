use crate::cli::actions::{maintenance, server, Action};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::Status(args) => maintenance::status(args).await,
        Action::Unlock(args) => maintenance::unlock(args).await,
        Action::Prune(settings) => maintenance::prune(settings).await,
        Action::HashPassword(args) => maintenance::hash_password(&args),
    }
}
