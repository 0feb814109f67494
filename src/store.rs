//! Filesystem persistence for the session record.
//!
//! One JSON file holds one session. Writes go through a temp file and an
//! atomic rename so a crash mid-save never leaves a truncated record.

use log::{debug, info, warn};
use std::path::PathBuf;
use thiserror::Error;
use wawebcore::session::SerializableSession;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, StoreError>;

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Loads the persisted session, if any. A missing file is `None`; an
    /// unreadable or corrupt file is an error so the caller can decide
    /// whether to fall back to fresh authentication.
    pub async fn load(&self) -> Result<Option<SerializableSession>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No session file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let session = serde_json::from_slice(&data)?;
        info!("Loaded session from {}", self.path.display());
        Ok(Some(session))
    }

    pub async fn save(&self, session: &SerializableSession) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(session)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted session to {}", self.path.display());
        Ok(())
    }

    /// Removes the persisted session. Missing file is not an error.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Cleared session file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to clear session file: {e}");
                Err(e.into())
            }
        }
    }
}
