//! Dispatchers: hand accepted jobs to a [`QueueSink`].
//!
//! [`AsyncDispatcher`] decouples acknowledgement latency from write latency:
//! `dispatch` only enqueues into a bounded buffer and a single background task
//! drains it into the sink, in submission order. [`SinkDispatcher`] writes
//! synchronously and is useful when the caller can afford the fsync.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sessionflow_events::{DispatchError, Dispatcher, Job, QueueSink};

/// Async dispatcher configuration.
#[derive(Debug, Clone)]
pub struct AsyncDispatcherConfig {
    /// Buffered jobs beyond which `dispatch` fails fast with `QueueFull`.
    pub capacity: usize,
    /// Name for logging
    pub name: String,
}

impl Default for AsyncDispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            name: "webhook-dispatcher".to_string(),
        }
    }
}

impl AsyncDispatcherConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatcherStats {
    pub accepted: u64,
    pub rejected_full: u64,
    pub written: u64,
    pub write_failures: u64,
}

/// Bounded buffer plus one draining task.
///
/// Lifecycle: `Open → Closing → Closed`. After [`close`](Self::close) every
/// `dispatch` fails with [`DispatchError::Closed`]; jobs accepted before close
/// are still written.
pub struct AsyncDispatcher {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    drain: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl AsyncDispatcher {
    /// Start the draining task on the current runtime.
    pub fn spawn<S>(sink: S, config: AsyncDispatcherConfig) -> Self
    where
        S: QueueSink + 'static,
    {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));

        let drain = tokio::spawn(drain_loop(sink, rx, config.name.clone(), stats.clone()));

        info!(dispatcher = %config.name, capacity = config.capacity.max(1), "dispatcher started");

        Self {
            name: config.name,
            sender: Mutex::new(Some(tx)),
            drain: tokio::sync::Mutex::new(Some(drain)),
            stats,
        }
    }

    /// Stop accepting jobs and wait for the buffer to drain.
    ///
    /// Returns `Cancelled` if `ctx` fires first; the drain keeps running in the
    /// background and a later `close` can wait for it again.
    pub async fn close(&self, ctx: &CancellationToken) -> Result<(), DispatchError> {
        let sender = self.sender.lock().ok().and_then(|mut slot| slot.take());
        if sender.is_some() {
            info!(dispatcher = %self.name, "dispatcher closing");
        }
        drop(sender);

        let mut slot = self.drain.lock().await;
        let joined = {
            let Some(handle) = slot.as_mut() else {
                return Ok(());
            };
            tokio::select! {
                joined = handle => joined,
                _ = ctx.cancelled() => return Err(DispatchError::Cancelled),
            }
        };
        *slot = None;

        if let Err(err) = joined {
            error!(dispatcher = %self.name, error = %err, "dispatcher drain task failed");
        }
        info!(dispatcher = %self.name, "dispatcher closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    /// Get current dispatcher statistics.
    pub fn stats(&self) -> DispatcherStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut DispatcherStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }
}

#[async_trait]
impl Dispatcher for AsyncDispatcher {
    async fn dispatch(&self, ctx: &CancellationToken, job: Job) -> Result<(), DispatchError> {
        if ctx.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let result = {
            let slot = self.sender.lock().map_err(|_| DispatchError::Closed)?;
            match slot.as_ref() {
                Some(tx) => tx.try_send(job),
                None => return Err(DispatchError::Closed),
            }
        };

        match result {
            Ok(()) => {
                self.record(|s| s.accepted += 1);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.record(|s| s.rejected_full += 1);
                warn!(dispatcher = %self.name, job_id = %job.id, "dispatch buffer full");
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }
}

async fn drain_loop<S: QueueSink>(
    sink: S,
    mut rx: mpsc::Receiver<Job>,
    name: String,
    stats: Arc<Mutex<DispatcherStats>>,
) {
    // Writes are not tied to any request; only close() bounds how long we wait.
    let write_ctx = CancellationToken::new();

    while let Some(job) = rx.recv().await {
        match sink.enqueue(&write_ctx, &job).await {
            Ok(()) => {
                debug!(dispatcher = %name, job_id = %job.id, idempotency_key = %job.idempotency_key, "job persisted");
                if let Ok(mut s) = stats.lock() {
                    s.written += 1;
                }
            }
            Err(err) => {
                error!(
                    dispatcher = %name,
                    job_id = %job.id,
                    session_id = %job.session_id,
                    error = %err,
                    "failed to persist dispatched job"
                );
                if let Ok(mut s) = stats.lock() {
                    s.write_failures += 1;
                }
            }
        }
    }

    debug!(dispatcher = %name, "dispatch buffer drained");
}

/// Dispatcher that writes straight through to the sink.
///
/// Sink failures surface as [`DispatchError::Sink`].
pub struct SinkDispatcher<S> {
    sink: S,
}

impl<S: QueueSink> SinkDispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: QueueSink> Dispatcher for SinkDispatcher<S> {
    async fn dispatch(&self, ctx: &CancellationToken, job: Job) -> Result<(), DispatchError> {
        if ctx.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        self.sink.enqueue(ctx, &job).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionflow_events::{InMemoryQueueSink, JOB_CONTRACT_VERSION, SinkError};

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            contract_version: JOB_CONTRACT_VERSION,
            idempotency_key: format!("agent-session/v1:{id}:created"),
            session_id: id.to_string(),
            session_step: format!("{id}:created"),
            delivery_id: None,
            received_at: Default::default(),
            event: Default::default(),
            payload: Default::default(),
        }
    }

    #[tokio::test]
    async fn writes_in_submission_order() {
        let sink = Arc::new(InMemoryQueueSink::new());
        let dispatcher = AsyncDispatcher::spawn(sink.clone(), AsyncDispatcherConfig::default());
        let ctx = CancellationToken::new();

        for id in ["a", "b", "c"] {
            dispatcher.dispatch(&ctx, job(id)).await.unwrap();
        }
        dispatcher.close(&ctx).await.unwrap();

        assert_eq!(sink.job_ids(), vec!["a", "b", "c"]);
        let stats = dispatcher.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.written, 3);
    }

    #[tokio::test]
    async fn full_buffer_fails_fast_without_dropping_accepted_jobs() {
        let sink = Arc::new(InMemoryQueueSink::gated());
        let dispatcher = AsyncDispatcher::spawn(
            sink.clone(),
            AsyncDispatcherConfig::default().with_capacity(1),
        );
        let ctx = CancellationToken::new();

        // First job is pulled by the drain task and parks in the gated sink.
        dispatcher.dispatch(&ctx, job("a")).await.unwrap();
        sink.wait_for_entries(1).await;

        // Second job fills the buffer, third is rejected immediately.
        dispatcher.dispatch(&ctx, job("b")).await.unwrap();
        let err = dispatcher.dispatch(&ctx, job("c")).await.unwrap_err();
        assert!(matches!(err, DispatchError::QueueFull));

        sink.release(2);
        dispatcher.close(&ctx).await.unwrap();

        assert_eq!(sink.job_ids(), vec!["a", "b"]);
        assert_eq!(dispatcher.stats().rejected_full, 1);
    }

    #[tokio::test]
    async fn dispatch_after_close_is_rejected() {
        let sink = Arc::new(InMemoryQueueSink::new());
        let dispatcher = AsyncDispatcher::spawn(sink.clone(), AsyncDispatcherConfig::default());
        let ctx = CancellationToken::new();

        dispatcher.dispatch(&ctx, job("before")).await.unwrap();
        dispatcher.close(&ctx).await.unwrap();
        assert!(dispatcher.is_closed());

        let err = dispatcher.dispatch(&ctx, job("after")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Closed));
        assert_eq!(sink.job_ids(), vec!["before"]);

        // Closing twice is harmless.
        dispatcher.close(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn close_honours_cancellation_while_draining() {
        let sink = Arc::new(InMemoryQueueSink::gated());
        let dispatcher = AsyncDispatcher::spawn(sink.clone(), AsyncDispatcherConfig::default());
        let ctx = CancellationToken::new();

        dispatcher.dispatch(&ctx, job("slow")).await.unwrap();
        sink.wait_for_entries(1).await;

        let close_ctx = CancellationToken::new();
        close_ctx.cancel();
        let err = dispatcher.close(&close_ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));

        sink.release(1);
        dispatcher.close(&ctx).await.unwrap();
        assert_eq!(sink.job_ids(), vec!["slow"]);
    }

    #[tokio::test]
    async fn cancelled_context_is_rejected_up_front() {
        let dispatcher = AsyncDispatcher::spawn(
            Arc::new(InMemoryQueueSink::new()),
            AsyncDispatcherConfig::default(),
        );
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = dispatcher.dispatch(&ctx, job("x")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }

    #[tokio::test]
    async fn sink_failures_are_counted_not_fatal() {
        let sink = Arc::new(InMemoryQueueSink::failing());
        let dispatcher = AsyncDispatcher::spawn(sink, AsyncDispatcherConfig::default());
        let ctx = CancellationToken::new();

        dispatcher.dispatch(&ctx, job("a")).await.unwrap();
        dispatcher.dispatch(&ctx, job("b")).await.unwrap();
        dispatcher.close(&ctx).await.unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.write_failures, 2);
        assert_eq!(stats.written, 0);
    }

    #[tokio::test]
    async fn sink_dispatcher_surfaces_write_errors() {
        let ok = SinkDispatcher::new(InMemoryQueueSink::new());
        ok.dispatch(&CancellationToken::new(), job("a")).await.unwrap();

        let failing = SinkDispatcher::new(InMemoryQueueSink::failing());
        let err = failing
            .dispatch(&CancellationToken::new(), job("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Sink(SinkError::Io(_))));
        assert!(!err.is_transient());
    }
}
