//! In-memory queue sink for tests/dev.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

use crate::job::Job;
use crate::sink::{QueueSink, SinkError};

/// Records enqueued jobs in memory.
///
/// - No IO
/// - Optional gate: writes block until [`release`](Self::release) hands out permits
/// - Optional failure mode for exercising error paths
#[derive(Debug)]
pub struct InMemoryQueueSink {
    jobs: Mutex<Vec<Job>>,
    gate: Option<Semaphore>,
    entered: watch::Sender<usize>,
    fail: bool,
}

impl InMemoryQueueSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes wait for [`release`](Self::release).
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// A sink that rejects every write with an IO error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Let `n` blocked or future writes through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Wait until at least `n` writes have started.
    pub async fn wait_for_entries(&self, n: usize) {
        let mut rx = self.entered.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs().into_iter().map(|job| job.id).collect()
    }
}

impl Default for InMemoryQueueSink {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            gate: None,
            entered: watch::Sender::new(0),
            fail: false,
        }
    }
}

#[async_trait]
impl QueueSink for InMemoryQueueSink {
    async fn enqueue(&self, ctx: &CancellationToken, job: &Job) -> Result<(), SinkError> {
        self.entered.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    permit.map_err(|_| SinkError::Cancelled)?.forget();
                }
                _ = ctx.cancelled() => return Err(SinkError::Cancelled),
            }
        }

        if self.fail {
            return Err(SinkError::Io(std::io::Error::other("in-memory sink failure")));
        }

        // Lock poisoning only happens after a panic in a test; drop the write then.
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job.clone());
        }
        Ok(())
    }
}
