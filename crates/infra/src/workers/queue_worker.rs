//! Resumable JSONL queue consumer.
//!
//! Per cycle: stat → open + seek(offset) → read complete lines → decode →
//! dedup → process → checkpoint, until EOF. Then sleep for the poll interval,
//! unless running in drain-and-exit mode.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sessionflow_events::{Job, JobDecodeError, JobProcessor};

use super::cursor_store::{CursorError, CursorStore};

/// Queue worker configuration.
#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    pub queue_path: PathBuf,
    /// How often to look for new lines once the file is drained
    pub poll_interval: Duration,
    /// Drain what is there and return
    pub once: bool,
    /// Name for logging
    pub name: String,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from("runner-logs/agent-session.jobs.jsonl"),
            poll_interval: Duration::from_millis(250),
            once: false,
            name: "queue-worker".to_string(),
        }
    }
}

impl QueueWorkerConfig {
    pub fn new(queue_path: impl Into<PathBuf>) -> Self {
        Self {
            queue_path: queue_path.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue path is required")]
    MissingQueuePath,

    #[error("poll interval must be greater than 0")]
    InvalidPollInterval,

    #[error("{op} queue file {}: {source}", .path.display())]
    Queue {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("queue record at offset {offset}: {source}")]
    Record {
        offset: u64,
        #[source]
        source: JobDecodeError,
    },

    #[error("process queued job {job_id:?}: {cause:#}")]
    Processor { job_id: String, cause: anyhow::Error },

    #[error("worker checkpoint: {0}")]
    Checkpoint(#[from] CursorError),
}

impl WorkerError {
    /// Coarse class for operator-facing remediation.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingQueuePath | Self::InvalidPollInterval => "config",
            Self::Queue { .. } => "queue",
            Self::Record { .. } => "record",
            Self::Processor { .. } => "processor",
            Self::Checkpoint(_) => "checkpoint",
        }
    }
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub duplicates: usize,
    pub blank: usize,
}

/// Single-consumer queue worker.
///
/// The byte offset is checkpointed through a [`CursorStore`] after every line
/// that is skipped or processed successfully. A processor error leaves the
/// offset at the start of the failing line, so a restart retries it.
/// Idempotency keys seen during this process lifetime are filtered in memory;
/// across restarts duplicate safety relies on downstream idempotent writes.
pub struct QueueWorker<P, C> {
    config: QueueWorkerConfig,
    processor: P,
    cursor: C,
    offset: u64,
    seen: HashSet<String>,
}

impl<P, C> QueueWorker<P, C>
where
    P: JobProcessor,
    C: CursorStore,
{
    /// Validate config and resume from the persisted offset.
    pub async fn new(config: QueueWorkerConfig, processor: P, cursor: C) -> Result<Self, WorkerError> {
        if config.queue_path.as_os_str().is_empty() {
            return Err(WorkerError::MissingQueuePath);
        }
        if config.poll_interval.is_zero() {
            return Err(WorkerError::InvalidPollInterval);
        }

        let offset = cursor.load().await?;
        if offset > 0 {
            info!(worker = %config.name, offset, "resuming queue worker from checkpoint");
        }

        Ok(Self {
            config,
            processor,
            cursor,
            offset,
            seen: HashSet::new(),
        })
    }

    /// Byte offset of the next unread line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Run until cancelled, or until the file is drained in `once` mode.
    pub async fn run(&mut self, ctx: &CancellationToken) -> Result<(), WorkerError> {
        info!(
            worker = %self.config.name,
            queue = %self.config.queue_path.display(),
            once = self.config.once,
            "queue worker started"
        );

        loop {
            let report = self.drain_once(ctx).await?;
            if report.processed > 0 {
                debug!(worker = %self.config.name, ?report, "drain cycle finished");
            }

            if self.config.once {
                break;
            }

            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker = %self.config.name, offset = self.offset, "queue worker stopped");
        Ok(())
    }

    /// Consume every complete line currently in the file.
    pub async fn drain_once(&mut self, ctx: &CancellationToken) -> Result<DrainReport, WorkerError> {
        let mut report = DrainReport::default();
        if ctx.is_cancelled() {
            return Ok(report);
        }

        let path = self.config.queue_path.clone();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(source) => return Err(WorkerError::Queue { op: "stat", path, source }),
        };

        if metadata.len() < self.offset {
            warn!(
                worker = %self.config.name,
                offset = self.offset,
                size = metadata.len(),
                "queue file shrank below offset; restarting from the beginning"
            );
            self.checkpoint(0).await?;
        }

        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(source) => return Err(WorkerError::Queue { op: "open", path, source }),
        };
        if let Err(source) = file.seek(SeekFrom::Start(self.offset)).await {
            return Err(WorkerError::Queue { op: "seek", path, source });
        }

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        loop {
            if ctx.is_cancelled() {
                return Ok(report);
            }

            line.clear();
            let read = match reader.read_until(b'\n', &mut line).await {
                Ok(n) => n,
                Err(source) => return Err(WorkerError::Queue { op: "read", path, source }),
            };
            if read == 0 {
                return Ok(report);
            }
            if line.last() != Some(&b'\n') {
                // Writer is mid-append; pick the line up next cycle.
                return Ok(report);
            }

            let next_offset = self.offset + read as u64;
            let record = line.trim_ascii();
            if record.is_empty() {
                report.blank += 1;
                self.checkpoint(next_offset).await?;
                continue;
            }

            let job = Job::decode_line(record).map_err(|source| WorkerError::Record {
                offset: self.offset,
                source,
            })?;

            let key = job.idempotency_key.trim().to_string();
            if !key.is_empty() && self.seen.contains(&key) {
                debug!(worker = %self.config.name, job_id = %job.id, idempotency_key = %key, "skipping duplicate job");
                report.duplicates += 1;
                self.checkpoint(next_offset).await?;
                continue;
            }

            debug!(
                worker = %self.config.name,
                job_id = %job.id,
                session_id = %job.session_id,
                offset = self.offset,
                "processing queued job"
            );
            if let Err(cause) = self.processor.process(ctx, &job).await {
                if ctx.is_cancelled() {
                    // Interrupted by shutdown; the line is retried on the next run.
                    info!(
                        worker = %self.config.name,
                        job_id = %job.id,
                        error = %format!("{cause:#}"),
                        "job interrupted by cancellation"
                    );
                    return Ok(report);
                }
                return Err(WorkerError::Processor {
                    job_id: job.id.clone(),
                    cause,
                });
            }

            if !key.is_empty() {
                self.seen.insert(key);
            }
            report.processed += 1;
            self.checkpoint(next_offset).await?;
        }
    }

    async fn checkpoint(&mut self, offset: u64) -> Result<(), WorkerError> {
        self.cursor.save(offset).await?;
        self.offset = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use sessionflow_events::JOB_CONTRACT_VERSION;

    use crate::workers::{FileCursorStore, InMemoryCursorStore};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
        cancel_after_first: Option<CancellationToken>,
        cancel_before_failing: Option<CancellationToken>,
    }

    impl Recorder {
        fn ids(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobProcessor for Recorder {
        async fn process(&self, _ctx: &CancellationToken, job: &Job) -> anyhow::Result<()> {
            if self.fail_on.as_deref() == Some(job.id.as_str()) {
                if let Some(token) = &self.cancel_before_failing {
                    token.cancel();
                    anyhow::bail!("agent run cancelled");
                }
                anyhow::bail!("runner exploded");
            }
            self.seen.lock().unwrap().push(job.id.clone());
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            Ok(())
        }
    }

    fn job(id: &str, key: &str) -> Job {
        Job {
            id: id.to_string(),
            contract_version: JOB_CONTRACT_VERSION,
            idempotency_key: key.to_string(),
            session_id: "session-1".into(),
            session_step: "session-1:created".into(),
            delivery_id: None,
            received_at: Default::default(),
            event: Default::default(),
            payload: Default::default(),
        }
    }

    fn append(path: &std::path::Path, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(bytes).unwrap();
    }

    fn append_job(path: &std::path::Path, job: &Job) {
        append(path, &job.encode_line().unwrap());
    }

    fn config(path: &std::path::Path) -> QueueWorkerConfig {
        QueueWorkerConfig::new(path)
            .with_once(true)
            .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn missing_queue_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(
            config(&dir.path().join("absent.jsonl")),
            recorder.clone(),
            InMemoryCursorStore::new(),
        )
        .await
        .unwrap();

        worker.run(&CancellationToken::new()).await.unwrap();
        assert!(recorder.ids().is_empty());
        assert_eq!(worker.offset(), 0);
    }

    #[tokio::test]
    async fn rejects_zero_poll_interval() {
        let err = QueueWorker::new(
            QueueWorkerConfig::new("q.jsonl").with_poll_interval(Duration::ZERO),
            Arc::new(Recorder::default()),
            InMemoryCursorStore::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, WorkerError::InvalidPollInterval));
        assert_eq!(err.category(), "config");
    }

    #[tokio::test]
    async fn processes_in_order_and_skips_duplicates_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        append_job(&path, &job("a", "k-a"));
        append(&path, b"\n   \n");
        append_job(&path, &job("b", "k-b"));
        append_job(&path, &job("a-redelivered", "k-a"));
        append_job(&path, &job("c", ""));
        append_job(&path, &job("c-again", ""));

        let recorder = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), InMemoryCursorStore::new())
            .await
            .unwrap();

        let report = worker.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(recorder.ids(), vec!["a", "b", "c", "c-again"]);
        assert_eq!(
            report,
            DrainReport {
                processed: 4,
                duplicates: 1,
                blank: 2
            }
        );
        assert_eq!(worker.offset(), std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn leaves_partial_trailing_line_for_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        append_job(&path, &job("a", "k-a"));
        let full = job("b", "k-b").encode_line().unwrap();
        let (head, tail) = full.split_at(full.len() / 2);
        append(&path, head);

        let recorder = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), InMemoryCursorStore::new())
            .await
            .unwrap();
        let ctx = CancellationToken::new();

        worker.drain_once(&ctx).await.unwrap();
        assert_eq!(recorder.ids(), vec!["a"]);
        let after_first = worker.offset();

        append(&path, tail);
        worker.drain_once(&ctx).await.unwrap();
        assert_eq!(recorder.ids(), vec!["a", "b"]);
        assert!(worker.offset() > after_first);
    }

    #[tokio::test]
    async fn resumes_from_persisted_offset_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        append_job(&path, &job("a", "k-a"));
        append_job(&path, &job("b", "k-b"));

        let first = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(config(&path), first.clone(), FileCursorStore::for_queue(&path))
            .await
            .unwrap();
        worker.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.ids(), vec!["a", "b"]);
        drop(worker);

        append_job(&path, &job("c", "k-c"));

        let second = Arc::new(Recorder::default());
        let mut restarted =
            QueueWorker::new(config(&path), second.clone(), FileCursorStore::for_queue(&path))
                .await
                .unwrap();
        restarted.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.ids(), vec!["c"]);
    }

    #[tokio::test]
    async fn truncated_file_resets_offset_but_keeps_dedup_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        append_job(&path, &job("a", "k-a"));
        append_job(&path, &job("b", "k-b"));

        let recorder = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), InMemoryCursorStore::new())
            .await
            .unwrap();
        let ctx = CancellationToken::new();
        worker.drain_once(&ctx).await.unwrap();

        std::fs::write(&path, job("a-replayed", "k-a").encode_line().unwrap()).unwrap();
        let report = worker.drain_once(&ctx).await.unwrap();

        assert_eq!(report.duplicates, 1);
        assert_eq!(recorder.ids(), vec!["a", "b"]);
        assert_eq!(worker.offset(), std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn malformed_line_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        append_job(&path, &job("a", "k-a"));
        append(&path, b"{\"contractVersion\":7,\"id\":\"x\"}\n");
        append_job(&path, &job("b", "k-b"));

        let recorder = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), InMemoryCursorStore::new())
            .await
            .unwrap();

        let err = worker.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Record {
                source: JobDecodeError::UnsupportedContractVersion { found: 7 },
                ..
            }
        ));
        assert_eq!(err.category(), "record");
        assert_eq!(recorder.ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn processor_error_names_job_and_keeps_offset_on_failing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        let first = job("a", "k-a");
        append_job(&path, &first);
        append_job(&path, &job("b", "k-b"));

        let recorder = Arc::new(Recorder {
            fail_on: Some("b".into()),
            ..Default::default()
        });
        let cursor = Arc::new(InMemoryCursorStore::new());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), cursor.clone())
            .await
            .unwrap();

        let err = worker.run(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.category(), "processor");
        let message = err.to_string();
        assert!(message.contains("process queued job \"b\""), "{message}");
        assert!(message.contains("runner exploded"), "{message}");

        let first_len = first.encode_line().unwrap().len() as u64;
        assert_eq!(worker.offset(), first_len);
        assert_eq!(cursor.offset(), first_len);
    }

    #[tokio::test]
    async fn cancellation_between_lines_returns_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        let first = job("a", "k-a");
        append_job(&path, &first);
        append_job(&path, &job("b", "k-b"));

        let ctx = CancellationToken::new();
        let recorder = Arc::new(Recorder {
            cancel_after_first: Some(ctx.clone()),
            ..Default::default()
        });
        let mut worker = QueueWorker::new(
            QueueWorkerConfig::new(&path),
            recorder.clone(),
            InMemoryCursorStore::new(),
        )
        .await
        .unwrap();

        worker.run(&ctx).await.unwrap();
        assert_eq!(recorder.ids(), vec!["a"]);
        assert_eq!(worker.offset(), first.encode_line().unwrap().len() as u64);
    }

    #[tokio::test]
    async fn processor_failure_after_cancellation_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        append_job(&path, &job("a", "k-a"));

        let ctx = CancellationToken::new();
        let recorder = Arc::new(Recorder {
            fail_on: Some("a".into()),
            cancel_before_failing: Some(ctx.clone()),
            ..Default::default()
        });
        let cursor = Arc::new(InMemoryCursorStore::new());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), cursor.clone())
            .await
            .unwrap();

        worker.run(&ctx).await.unwrap();
        assert!(recorder.ids().is_empty());
        assert_eq!(worker.offset(), 0);
        assert_eq!(cursor.offset(), 0);

        // The interrupted line is picked up again by the next run.
        let recorder = Arc::new(Recorder::default());
        let mut worker = QueueWorker::new(config(&path), recorder.clone(), cursor)
            .await
            .unwrap();
        worker.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(recorder.ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn polling_picks_up_late_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.jsonl");
        let ctx = CancellationToken::new();
        let recorder = Arc::new(Recorder::default());

        let mut worker = QueueWorker::new(
            QueueWorkerConfig::new(&path).with_poll_interval(Duration::from_millis(5)),
            recorder.clone(),
            InMemoryCursorStore::new(),
        )
        .await
        .unwrap();
        let run = {
            let ctx = ctx.clone();
            tokio::spawn(async move { worker.run(&ctx).await })
        };

        append_job(&path, &job("late", "k-late"));
        for _ in 0..200 {
            if !recorder.ids().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(recorder.ids(), vec!["late"]);
    }
}
