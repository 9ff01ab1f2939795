//! Consumer cursor (byte offset) persistence.
//!
//! The worker checkpoints the offset of the next unread queue line here so a
//! restarted process resumes instead of replaying the whole file:
//! - Resume after crash (continue from the last persisted offset)
//! - Rebuild from scratch (save 0, dedup then relies on downstream idempotency)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor io {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cursor file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Offset persistence for a single queue consumer.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last saved offset, 0 when nothing was saved yet.
    async fn load(&self) -> Result<u64, CursorError>;

    async fn save(&self, offset: u64) -> Result<(), CursorError>;
}

#[async_trait]
impl<S> CursorStore for std::sync::Arc<S>
where
    S: CursorStore + ?Sized,
{
    async fn load(&self) -> Result<u64, CursorError> {
        (**self).load().await
    }

    async fn save(&self, offset: u64) -> Result<(), CursorError> {
        (**self).save(offset).await
    }
}

/// Process-local cursor (tests/dev, or one-shot drains).
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    offset: AtomicU64,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(offset: u64) -> Self {
        Self {
            offset: AtomicU64::new(offset),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self) -> Result<u64, CursorError> {
        Ok(self.offset())
    }

    async fn save(&self, offset: u64) -> Result<(), CursorError> {
        self.offset.store(offset, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    offset: u64,
}

/// JSON cursor file, replaced atomically (temp file + rename) on every save.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cursor file next to a queue: `<queue>.offset`.
    pub fn for_queue(queue_path: &Path) -> Self {
        let mut raw = queue_path.as_os_str().to_owned();
        raw.push(".offset");
        Self::new(PathBuf::from(raw))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CursorError {
        CursorError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<u64, CursorError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(self.io_err(e)),
        };
        let record: CursorRecord =
            serde_json::from_slice(&raw).map_err(|source| CursorError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(record.offset)
    }

    async fn save(&self, offset: u64) -> Result<(), CursorError> {
        let body = serde_json::to_vec(&CursorRecord { offset }).map_err(|source| {
            CursorError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_err(e))?;
            }
        }

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| self.io_err(e))?;
        file.write_all(&body).await.map_err(|e| self.io_err(e))?;
        file.flush().await.map_err(|e| self.io_err(e))?;
        file.sync_data().await.map_err(|e| self.io_err(e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))
    }
}
