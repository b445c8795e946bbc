//! Append-only JSON Lines file writer for the security log.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

use super::events::{EventWriter, SecurityEvent};

/// Appends one event per line. The mutex serializes writers so lines never interleave.
pub struct FileEventWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileEventWriter {
    /// Open (or create) the log file in append mode.
    ///
    /// On unix the file is created with mode 0o600 and missing parent directories
    /// with mode 0o700.
    ///
    /// # Errors
    /// Returns an error if the file or its parent directory cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            #[cfg(unix)]
            {
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            #[cfg(not(unix))]
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options
            .open(path)
            .with_context(|| format!("failed to open security log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(File::from_std(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventWriter for FileEventWriter {
    async fn append(&self, _event: &SecurityEvent, line: &str) -> Result<()> {
        let mut buffer = Vec::with_capacity(line.len() + 1);
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }
}
