//! Routes session events to a runner, enforcing the first-thought SLA on
//! `created` events.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sessionflow_core::{AgentSessionEvent, EventAction};
use sessionflow_events::{Job, JobProcessor, RawPayload};

use super::watchdog::{
    FirstThoughtSlaConfig, FirstThoughtWatchdog, SlaErrorRecorder, SlaViolation, ThoughtEmitter,
    WatchdogError,
};
use crate::external::{ActivityEmitter, ResponseActivity, ThoughtActivity};

const UNKNOWN_SESSION: &str = "unknown-session";

/// One unit of session work: the event plus the identifiers derived from its job.
#[derive(Debug, Clone, Copy)]
pub struct SessionStep<'a> {
    pub session_id: &'a str,
    /// Prefix for the idempotency keys of every activity this step emits.
    pub base_key: &'a str,
    pub event: &'a AgentSessionEvent,
    /// Original webhook body, when the step came from a queued job.
    pub payload: Option<&'a RawPayload>,
}

impl<'a> SessionStep<'a> {
    pub fn for_job(job: &'a Job) -> Self {
        let session_id = first_non_blank(&[job.session_id.as_str(), job.event.session_id()])
            .unwrap_or(UNKNOWN_SESSION);
        let base_key = first_non_blank(&[
            job.idempotency_key.as_str(),
            job.id.as_str(),
            job.session_step.as_str(),
        ])
            .unwrap_or(session_id);

        Self {
            session_id,
            base_key,
            event: &job.event,
            payload: Some(&job.payload),
        }
    }

    pub fn for_event(event: &'a AgentSessionEvent, base_key: &'a str) -> Self {
        let session_id = first_non_blank(&[event.session_id()]).unwrap_or(UNKNOWN_SESSION);
        Self {
            session_id,
            base_key: first_non_blank(&[base_key]).unwrap_or(session_id),
            event,
            payload: None,
        }
    }

    pub fn action(&self) -> &str {
        self.event.action.as_str()
    }
}

fn first_non_blank<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().map(|c| c.trim()).find(|c| !c.is_empty())
}

/// The work behind a session event.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    /// Thoughts posted through `thoughts` count as the session's first thought.
    async fn run_created(
        &self,
        ctx: &CancellationToken,
        step: &SessionStep<'_>,
        thoughts: Arc<dyn ThoughtEmitter>,
    ) -> anyhow::Result<()>;

    async fn run_prompted(
        &self,
        _ctx: &CancellationToken,
        _step: &SessionStep<'_>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SessionProcessError {
    #[error("unsupported agent session event action {0:?}")]
    UnsupportedAction(String),

    #[error(transparent)]
    Sla(#[from] WatchdogError),

    #[error("created event run failed: {0:#}")]
    Created(anyhow::Error),

    #[error("prompted event run failed: {0:#}")]
    Prompted(anyhow::Error),

    #[error("created event run failed: {run:#}; first-thought SLA failed: {sla}")]
    Combined { run: anyhow::Error, sla: WatchdogError },
}

/// Marks the watchdog observed after every successful emit.
struct ObservingEmitter {
    inner: Arc<dyn ThoughtEmitter>,
    watchdog: FirstThoughtWatchdog,
}

#[async_trait]
impl ThoughtEmitter for ObservingEmitter {
    async fn emit(
        &self,
        ctx: &CancellationToken,
        input: &ThoughtActivity,
    ) -> anyhow::Result<String> {
        let id = self.inner.emit(ctx, input).await?;
        self.watchdog.mark_observed();
        Ok(id)
    }
}

pub struct AgentSessionProcessor {
    emitter: Arc<dyn ThoughtEmitter>,
    recorder: Option<Arc<dyn SlaErrorRecorder>>,
    runner: Arc<dyn SessionRunner>,
    sla: FirstThoughtSlaConfig,
}

impl AgentSessionProcessor {
    pub fn new(emitter: Arc<dyn ThoughtEmitter>, runner: Arc<dyn SessionRunner>) -> Self {
        Self {
            emitter,
            recorder: None,
            runner,
            sla: FirstThoughtSlaConfig::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn SlaErrorRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_sla_config(mut self, sla: FirstThoughtSlaConfig) -> Self {
        self.sla = sla;
        self
    }

    pub async fn process_event(
        &self,
        ctx: &CancellationToken,
        step: &SessionStep<'_>,
    ) -> Result<(), SessionProcessError> {
        match &step.event.action {
            EventAction::Created => self.process_created(ctx, step).await,
            EventAction::Prompted => self
                .runner
                .run_prompted(ctx, step)
                .await
                .map_err(SessionProcessError::Prompted),
            other => Err(SessionProcessError::UnsupportedAction(
                other.as_str().to_string(),
            )),
        }
    }

    async fn process_created(
        &self,
        ctx: &CancellationToken,
        step: &SessionStep<'_>,
    ) -> Result<(), SessionProcessError> {
        let watchdog = FirstThoughtWatchdog::new(
            step.event,
            self.emitter.clone(),
            self.recorder.clone(),
            self.sla.clone(),
        )?;
        watchdog.start(ctx.clone());

        let observing: Arc<dyn ThoughtEmitter> = Arc::new(ObservingEmitter {
            inner: self.emitter.clone(),
            watchdog: watchdog.clone(),
        });

        let run = self.runner.run_created(ctx, step, observing).await;
        let sla = watchdog.wait(ctx).await;

        match (run, sla) {
            (Ok(()), Ok(outcome)) => {
                debug!(session_id = step.session_id, ?outcome, "created session step finished");
                Ok(())
            }
            (Err(run), Ok(_)) => Err(SessionProcessError::Created(run)),
            (Ok(()), Err(sla)) => Err(SessionProcessError::Sla(sla)),
            (Err(run), Err(sla)) => Err(SessionProcessError::Combined { run, sla }),
        }
    }
}

#[async_trait]
impl JobProcessor for AgentSessionProcessor {
    async fn process(&self, ctx: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        self.process_event(ctx, &SessionStep::for_job(job)).await?;
        Ok(())
    }
}

/// Records SLA violations as a response activity on the session itself.
pub struct ResponseSlaRecorder<E> {
    activities: E,
}

impl<E> ResponseSlaRecorder<E> {
    pub fn new(activities: E) -> Self {
        Self { activities }
    }
}

#[async_trait]
impl<E> SlaErrorRecorder for ResponseSlaRecorder<E>
where
    E: ActivityEmitter,
{
    async fn record(
        &self,
        ctx: &CancellationToken,
        violation: &SlaViolation,
    ) -> anyhow::Result<()> {
        let input = ResponseActivity {
            session_id: violation.session_id.clone(),
            body: violation.to_string(),
            idempotency_key: format!("{}:response:first-sla-error", violation.session_id),
        };
        self.activities.emit_response(ctx, &input).await?;
        Ok(())
    }
}
