use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sessionflow_core::AgentSessionEvent;

use super::timer::{Clock, DeadlineTimer, SystemClock, TokioTimer};
use crate::external::{ActivityEmitter, ThoughtActivity};

pub const DEFAULT_FIRST_THOUGHT_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_FALLBACK_BODY: &str = "Processing started.";

/// Idempotency key of the fallback thought; stable per session so a retried
/// fallback lands on the same activity.
pub fn fallback_idempotency_key(session_id: &str) -> String {
    format!("{}:thought:first-sla-fallback", session_id.trim())
}

/// Posts a thought and returns the remote activity id.
#[async_trait]
pub trait ThoughtEmitter: Send + Sync {
    async fn emit(&self, ctx: &CancellationToken, input: &ThoughtActivity)
    -> anyhow::Result<String>;
}

#[async_trait]
impl<E> ThoughtEmitter for E
where
    E: ActivityEmitter + ?Sized,
{
    async fn emit(
        &self,
        ctx: &CancellationToken,
        input: &ThoughtActivity,
    ) -> anyhow::Result<String> {
        Ok(ActivityEmitter::emit_thought(self, ctx, input).await?)
    }
}

/// Persists an SLA violation somewhere a human will see it.
#[async_trait]
pub trait SlaErrorRecorder: Send + Sync {
    async fn record(&self, ctx: &CancellationToken, violation: &SlaViolation)
    -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Error)]
#[error("first thought SLA violated for session {session_id} after {deadline:?}: {cause:#}")]
pub struct SlaViolation {
    pub session_id: String,
    pub deadline: Duration,
    pub occurred_at: DateTime<Utc>,
    pub cause: Arc<anyhow::Error>,
}

#[derive(Debug, Clone, Error)]
pub enum WatchdogError {
    #[error("created event agent session id is required")]
    MissingSessionId,

    /// The deadline passed and the fallback thought could not be posted.
    #[error(transparent)]
    Violation(SlaViolation),

    /// As `Violation`, and the recorder failed too.
    #[error("{violation}: record explicit SLA error: {cause:#}")]
    RecordFailed {
        violation: SlaViolation,
        cause: Arc<anyhow::Error>,
    },
}

impl WatchdogError {
    pub fn violation(&self) -> Option<&SlaViolation> {
        match self {
            Self::Violation(v) | Self::RecordFailed { violation: v, .. } => Some(v),
            Self::MissingSessionId => None,
        }
    }
}

/// How a watchdog run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaOutcome {
    /// Not a `created` event.
    Skipped,
    Cancelled,
    /// A first thought was seen before the deadline.
    Observed,
    /// The deadline passed; the fallback thought was posted.
    FallbackEmitted { activity_id: String },
}

#[derive(Clone)]
pub struct FirstThoughtSlaConfig {
    pub deadline: Duration,
    pub fallback_body: String,
    timer: Arc<dyn DeadlineTimer>,
    clock: Arc<dyn Clock>,
}

impl Default for FirstThoughtSlaConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_FIRST_THOUGHT_DEADLINE,
            fallback_body: DEFAULT_FALLBACK_BODY.to_string(),
            timer: Arc::new(TokioTimer),
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for FirstThoughtSlaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstThoughtSlaConfig")
            .field("deadline", &self.deadline)
            .field("fallback_body", &self.fallback_body)
            .finish_non_exhaustive()
    }
}

impl FirstThoughtSlaConfig {
    /// A zero deadline keeps the default.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        if !deadline.is_zero() {
            self.deadline = deadline;
        }
        self
    }

    /// A blank body keeps the default.
    pub fn with_fallback_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        if !body.trim().is_empty() {
            self.fallback_body = body.trim().to_string();
        }
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn DeadlineTimer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Races the first thought of a `created` session against a deadline.
///
/// `start` launches the race once; `mark_observed` reports that a thought
/// reached the user; `wait` returns the single stored outcome. Cloning shares
/// the same race.
#[derive(Clone)]
pub struct FirstThoughtWatchdog {
    inner: Arc<Inner>,
}

struct Inner {
    session_id: String,
    enforce: bool,
    emitter: Arc<dyn ThoughtEmitter>,
    recorder: Option<Arc<dyn SlaErrorRecorder>>,
    config: FirstThoughtSlaConfig,
    started: AtomicBool,
    observed: watch::Sender<bool>,
    done: watch::Sender<bool>,
    outcome: Mutex<Option<Result<SlaOutcome, WatchdogError>>>,
}

impl FirstThoughtWatchdog {
    pub fn new(
        event: &AgentSessionEvent,
        emitter: Arc<dyn ThoughtEmitter>,
        recorder: Option<Arc<dyn SlaErrorRecorder>>,
        config: FirstThoughtSlaConfig,
    ) -> Result<Self, WatchdogError> {
        let enforce = event.is_created();
        let session_id = event.session_id().to_string();
        if enforce && session_id.is_empty() {
            return Err(WatchdogError::MissingSessionId);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                session_id,
                enforce,
                emitter,
                recorder,
                config,
                started: AtomicBool::new(false),
                observed: watch::Sender::new(false),
                done: watch::Sender::new(false),
                outcome: Mutex::new(None),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Launch the race. Later calls are no-ops.
    pub fn start(&self, ctx: CancellationToken) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        if !self.inner.enforce {
            self.inner.finish(Ok(SlaOutcome::Skipped));
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = inner.race(&ctx).await;
            inner.finish(outcome);
        });
    }

    /// Returns true only for the call that flipped the signal.
    pub fn mark_observed(&self) -> bool {
        self.inner.mark_observed()
    }

    pub fn is_observed(&self) -> bool {
        *self.inner.observed.borrow()
    }

    /// Outcome of the race. Cancelling `ctx` stops waiting, not the race.
    pub async fn wait(&self, ctx: &CancellationToken) -> Result<SlaOutcome, WatchdogError> {
        let mut done = self.inner.done.subscribe();
        tokio::select! {
            biased;
            _ = async { let _ = done.wait_for(|finished| *finished).await; } => {}
            _ = ctx.cancelled() => return Ok(SlaOutcome::Cancelled),
        }

        self.inner
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or(Ok(SlaOutcome::Cancelled))
    }
}

impl fmt::Debug for FirstThoughtWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstThoughtWatchdog")
            .field("session_id", &self.inner.session_id)
            .field("enforce", &self.inner.enforce)
            .field("observed", &*self.inner.observed.borrow())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn mark_observed(&self) -> bool {
        self.observed.send_if_modified(|seen| {
            if *seen {
                false
            } else {
                *seen = true;
                true
            }
        })
    }

    fn finish(&self, outcome: Result<SlaOutcome, WatchdogError>) {
        *self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(outcome);
        self.done.send_replace(true);
    }

    async fn race(&self, ctx: &CancellationToken) -> Result<SlaOutcome, WatchdogError> {
        let mut observed = self.observed.subscribe();
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!(session_id = %self.session_id, "first thought watchdog cancelled");
                return Ok(SlaOutcome::Cancelled);
            }
            _ = async { let _ = observed.wait_for(|seen| *seen).await; } => {
                return Ok(SlaOutcome::Observed);
            }
            _ = self.config.timer.expire(self.config.deadline) => {}
        }

        // Timer and first thought may have landed together.
        if *self.observed.borrow() {
            return Ok(SlaOutcome::Observed);
        }

        self.emit_fallback().await
    }

    async fn emit_fallback(&self) -> Result<SlaOutcome, WatchdogError> {
        let input = ThoughtActivity {
            session_id: self.session_id.clone(),
            body: self.config.fallback_body.clone(),
            idempotency_key: fallback_idempotency_key(&self.session_id),
        };
        // Detached from the caller: the deadline has already passed.
        let fallback_ctx = CancellationToken::new();

        match self.emitter.emit(&fallback_ctx, &input).await {
            Ok(activity_id) => {
                self.mark_observed();
                warn!(
                    session_id = %self.session_id,
                    deadline_ms = self.config.deadline.as_millis() as u64,
                    activity_id = %activity_id,
                    "first thought deadline missed, fallback thought emitted"
                );
                Ok(SlaOutcome::FallbackEmitted { activity_id })
            }
            Err(cause) => {
                let violation = SlaViolation {
                    session_id: self.session_id.clone(),
                    deadline: self.config.deadline,
                    occurred_at: self.config.clock.now(),
                    cause: Arc::new(cause),
                };
                error!(session_id = %self.session_id, error = %violation, "first thought SLA violated");

                if let Some(recorder) = &self.recorder {
                    if let Err(record_err) = recorder.record(&fallback_ctx, &violation).await {
                        return Err(WatchdogError::RecordFailed {
                            violation,
                            cause: Arc::new(record_err),
                        });
                    }
                }
                Err(WatchdogError::Violation(violation))
            }
        }
    }
}

/// Run a started watchdog to completion.
pub async fn enforce_first_thought_sla(
    ctx: &CancellationToken,
    watchdog: &FirstThoughtWatchdog,
) -> Result<SlaOutcome, WatchdogError> {
    watchdog.start(ctx.clone());
    watchdog.wait(ctx).await
}
