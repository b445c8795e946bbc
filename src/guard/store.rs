//! Rate limiter persistence: a single keyed document loaded and saved wholesale.
//!
//! Flow Overview:
//! 1) The limiter runs every mutation through `update`: load the whole map, mutate
//!    one record, save the whole map, all under the store's exclusive lock.
//! 2) A missing or unreadable document is an empty map, never an error.
//! 3) The file store holds an advisory lock on a sibling `.lock` file for the whole
//!    cycle, so other processes sharing the file (the maintenance CLI, a second
//!    server) never interleave their cycles with ours.
//! 4) Documents are written to a uniquely named temp file in the same directory and
//!    renamed into place, so a crash mid-write leaves the previous document intact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use fd_lock::RwLock;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

use super::identifier::IdentifierKey;

/// Attempt history and lockout state for one identifier key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Unix seconds of each failed attempt, oldest first.
    #[serde(default)]
    pub attempts: Vec<i64>,
    /// Unix seconds until which the identifier is locked; 0 means unlocked.
    #[serde(default)]
    pub locked_until: i64,
}

impl AttemptRecord {
    /// Drop attempts outside the window `(now - window_seconds, now]`.
    ///
    /// Returns `true` when something was removed.
    pub fn prune(&mut self, now: i64, window_seconds: i64) -> bool {
        let cutoff = now - window_seconds;
        let before = self.attempts.len();
        self.attempts.retain(|&attempt| attempt > cutoff);
        self.attempts.len() != before
    }

    #[must_use]
    pub fn is_locked(&self, now: i64) -> bool {
        self.locked_until > now
    }

    /// A lock was set and its expiry has passed.
    #[must_use]
    pub fn lock_served(&self, now: i64) -> bool {
        self.locked_until != 0 && self.locked_until <= now
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty() && self.locked_until == 0
    }
}

pub type AttemptMap = BTreeMap<IdentifierKey, AttemptRecord>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode store document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Durable home of the limiter state.
///
/// Implementations are called from the blocking pool, one call at a time per limiter.
/// Stores shared beyond one limiter must override `update` so the whole cycle is
/// exclusive.
pub trait RateLimitStore: Send + Sync {
    /// Load every record.
    ///
    /// # Errors
    /// Returns an error only when the backing storage is unavailable; missing or
    /// corrupt documents load as an empty map.
    fn load(&self) -> Result<AttemptMap, StoreError>;

    /// Replace every record.
    ///
    /// # Errors
    /// Returns an error if the document cannot be written.
    fn save(&self, records: &AttemptMap) -> Result<(), StoreError>;

    /// One read-modify-write cycle. `apply` returns `true` when it changed the map,
    /// and only then is the map saved.
    ///
    /// # Errors
    /// Returns an error if the map cannot be loaded or the change cannot be saved.
    fn update(&self, apply: &mut dyn FnMut(&mut AttemptMap) -> bool) -> Result<(), StoreError> {
        let mut records = self.load()?;
        if apply(&mut records) {
            self.save(&records)?;
        }
        Ok(())
    }
}

/// In-process store, used by tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<AttemptMap>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> AttemptMap {
        self.records().clone()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, AttemptMap> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RateLimitStore for MemoryStore {
    fn load(&self) -> Result<AttemptMap, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &AttemptMap) -> Result<(), StoreError> {
        self.records().clone_from(records);
        Ok(())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut AttemptMap) -> bool) -> Result<(), StoreError> {
        let mut records = self.records();
        apply(&mut *records);
        Ok(())
    }
}

/// JSON document on local disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file carrying the advisory lock; it is never removed.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn parent(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn create_parent(&self) -> Result<(), StoreError> {
        let parent = self.parent();
        #[cfg(unix)]
        {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open_lock(&self) -> Result<RwLock<File>, StoreError> {
        self.create_parent()?;
        let mut options = std::fs::OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);
        #[cfg(unix)]
        options.mode(0o600);
        Ok(RwLock::new(options.open(self.lock_path())?))
    }

    fn read_document(&self) -> Result<AttemptMap, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "rate limit store missing, starting empty");
                return Ok(AttemptMap::new());
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        if contents.trim().is_empty() {
            return Ok(AttemptMap::new());
        }

        match serde_json::from_str(&contents) {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(path = %self.path.display(), "rate limit store is corrupt, starting empty: {err}");
                Ok(AttemptMap::new())
            }
        }
    }

    /// Caller holds the write lock.
    fn write_document(&self, records: &AttemptMap) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(records)?;

        // Created with mode 0o600 on unix.
        let mut temp = NamedTempFile::new_in(self.parent())?;
        temp.write_all(&encoded)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

impl RateLimitStore for FileStore {
    fn load(&self) -> Result<AttemptMap, StoreError> {
        // Renames are atomic, so readers never see a partial document.
        self.read_document()
    }

    fn save(&self, records: &AttemptMap) -> Result<(), StoreError> {
        let mut lock = self.open_lock()?;
        let _guard = lock.write()?;
        self.write_document(records)
    }

    fn update(&self, apply: &mut dyn FnMut(&mut AttemptMap) -> bool) -> Result<(), StoreError> {
        let mut lock = self.open_lock()?;
        let _guard = lock.write()?;
        let mut records = self.read_document()?;
        if apply(&mut records) {
            self.write_document(&records)?;
        }
        Ok(())
    }
}
