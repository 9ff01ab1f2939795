//! Delivery seams between ingestion, the durable queue, and consumers.
//!
//! ```text
//! webhook → Dispatcher (buffer) → QueueSink (append) → ... → worker → JobProcessor
//! ```
//!
//! Every blocking call takes a [`CancellationToken`]; implementations must
//! return promptly once it fires.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::job::Job;

/// Failure to persist a job.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("encode job: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("queue io: {0}")]
    Io(#[from] std::io::Error),

    #[error("enqueue cancelled")]
    Cancelled,
}

/// Failure to hand a job to the delivery pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The buffer is at capacity; the caller should shed load.
    #[error("dispatch queue is full")]
    QueueFull,

    #[error("dispatcher is closed")]
    Closed,

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("dispatch timed out")]
    TimedOut,

    /// Durable write failed (only surfaced by synchronous dispatchers).
    #[error("dispatch sink: {0}")]
    Sink(#[from] SinkError),
}

impl DispatchError {
    /// Capacity/lifecycle failures that a redelivery may get past.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Sink(_))
    }
}

/// Durable destination for accepted jobs.
#[async_trait]
pub trait QueueSink: Send + Sync {
    /// Persist `job`. Returning `Ok` means the job survives a crash.
    async fn enqueue(&self, ctx: &CancellationToken, job: &Job) -> Result<(), SinkError>;
}

/// Entry point used by ingestion to hand off a job.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, ctx: &CancellationToken, job: Job) -> Result<(), DispatchError>;
}

/// Consumer-side side effects for one job.
///
/// Called once per non-duplicate job, in queue order. Errors are opaque so
/// collaborators can attach their own context.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<S> QueueSink for Arc<S>
where
    S: QueueSink + ?Sized,
{
    async fn enqueue(&self, ctx: &CancellationToken, job: &Job) -> Result<(), SinkError> {
        (**self).enqueue(ctx, job).await
    }
}

#[async_trait]
impl<D> Dispatcher for Arc<D>
where
    D: Dispatcher + ?Sized,
{
    async fn dispatch(&self, ctx: &CancellationToken, job: Job) -> Result<(), DispatchError> {
        (**self).dispatch(ctx, job).await
    }
}

#[async_trait]
impl<P> JobProcessor for Arc<P>
where
    P: JobProcessor + ?Sized,
{
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        (**self).process(ctx, job).await
    }
}
