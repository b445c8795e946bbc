pub mod maintenance;
pub mod server;

// Internal "interpreter" for `Action`; the match lives in `run` so this file stays small.
mod run;

use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc};

use crate::guard::{
    FileEventWriter, FileStore, GuardConfig, RateLimiter, SecurityLog, SystemClock,
};

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Status(maintenance::IdentifierArgs),
    Unlock(maintenance::IdentifierArgs),
    Prune(GuardSettings),
    HashPassword(maintenance::HashArgs),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> Result<()> {
        run::execute(self).await
    }
}

/// Where the guard keeps its state and how it decides.
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub store_path: PathBuf,
    pub event_log_path: PathBuf,
    pub config: GuardConfig,
}

impl GuardSettings {
    /// Open the event log and build a limiter over the file store.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the event log cannot be opened.
    pub fn build(&self) -> Result<(RateLimiter, Arc<SecurityLog>)> {
        self.config.validate().context("Invalid guard configuration")?;

        let writer = FileEventWriter::open(&self.event_log_path).with_context(|| {
            format!(
                "Failed to open security event log {}",
                self.event_log_path.display()
            )
        })?;
        let log = Arc::new(SecurityLog::new(Arc::new(writer)));

        let limiter = RateLimiter::new(
            self.config.clone(),
            Arc::new(FileStore::new(self.store_path.clone())),
            Arc::clone(&log),
            Arc::new(SystemClock),
        );
        Ok((limiter, log))
    }
}
