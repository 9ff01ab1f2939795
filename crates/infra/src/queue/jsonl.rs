//! Append-only JSONL queue file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sessionflow_events::{Job, QueueSink, SinkError};

/// JSONL file sink.
///
/// Each `enqueue` opens the file in append mode (creating it and its parent
/// directories when missing), writes one complete line, and syncs it to stable
/// storage before returning. Writers inside this process are serialized.
#[derive(Debug)]
pub struct JsonlQueue {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueueSink for JsonlQueue {
    async fn enqueue(&self, ctx: &CancellationToken, job: &Job) -> Result<(), SinkError> {
        if ctx.is_cancelled() {
            return Err(SinkError::Cancelled);
        }

        let line = job.encode_line()?;

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;

        debug!(
            path = %self.path.display(),
            job_id = %job.id,
            bytes = line.len(),
            "job appended to queue"
        );
        Ok(())
    }
}
