//! Session step execution: start thought, agent run, external links, final
//! response.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sessionflow_core::ExternalUrl;
use sessionflow_infra::external::{
    ActivityEmitter, ResponseActivity, SessionExternalUrls, ThoughtActivity,
};
use sessionflow_infra::sla::{SessionRunner, SessionStep, ThoughtEmitter};

use crate::agent::{AgentRequest, AgentRunner};
use crate::prompt::{build_job_prompt, response_body, sanitize_task_id, thought_body};

/// Runs queued session steps through an agent and reports back on the session.
///
/// Every activity it posts is keyed off the step's base idempotency key, so a
/// replayed job lands on the same remote activities.
pub struct SessionJobProcessor {
    activities: Arc<dyn ActivityEmitter>,
    agent: Arc<dyn AgentRunner>,
}

impl SessionJobProcessor {
    pub fn new(activities: Arc<dyn ActivityEmitter>, agent: Arc<dyn AgentRunner>) -> Self {
        Self { activities, agent }
    }

    fn start_thought(step: &SessionStep<'_>) -> ThoughtActivity {
        ThoughtActivity {
            session_id: step.session_id.to_string(),
            body: thought_body(&step.event.action).to_string(),
            idempotency_key: format!("{}:thought", step.base_key),
        }
    }

    async fn execute(&self, ctx: &CancellationToken, step: &SessionStep<'_>) -> anyhow::Result<()> {
        let request = AgentRequest {
            task_id: sanitize_task_id(step.base_key),
            session_id: step.session_id.to_string(),
            prompt: build_job_prompt(step),
        };
        info!(
            session_id = step.session_id,
            task_id = %request.task_id,
            action = step.action(),
            "running session step"
        );

        let (failure, urls) = match self.agent.run(ctx, &request).await {
            Ok(outcome) => (outcome.failure().map(anyhow::Error::msg), outcome.external_urls),
            Err(err) => (Some(err), Vec::new()),
        };

        self.link_external_urls(ctx, step, urls).await;

        let response = ResponseActivity {
            session_id: step.session_id.to_string(),
            body: response_body(step.action(), failure.as_ref()),
            idempotency_key: format!("{}:response", step.base_key),
        };
        let emitted = self.activities.emit_response(ctx, &response).await;

        match (failure, emitted) {
            (None, Ok(_)) => Ok(()),
            (Some(run), Ok(_)) => Err(run.context("run linear session job")),
            (None, Err(emit)) => {
                Err(anyhow::Error::new(emit).context("emit linear response activity"))
            }
            (Some(run), Err(emit)) => Err(anyhow!(
                "run linear session job: {run:#}; emit linear response activity: {emit}"
            )),
        }
    }

    /// Best effort; a failed link never fails the step.
    async fn link_external_urls(
        &self,
        ctx: &CancellationToken,
        step: &SessionStep<'_>,
        external_urls: Vec<ExternalUrl>,
    ) {
        if external_urls.is_empty() {
            return;
        }
        let input = SessionExternalUrls {
            session_id: step.session_id.to_string(),
            external_urls,
        };
        if let Err(err) = self.activities.update_session_external_urls(ctx, &input).await {
            warn!(session_id = step.session_id, error = %err, "failed to link session external urls");
        }
    }
}

#[async_trait]
impl SessionRunner for SessionJobProcessor {
    async fn run_created(
        &self,
        ctx: &CancellationToken,
        step: &SessionStep<'_>,
        thoughts: Arc<dyn ThoughtEmitter>,
    ) -> anyhow::Result<()> {
        thoughts
            .emit(ctx, &Self::start_thought(step))
            .await
            .context("emit linear thought activity")?;
        self.execute(ctx, step).await
    }

    async fn run_prompted(
        &self,
        ctx: &CancellationToken,
        step: &SessionStep<'_>,
    ) -> anyhow::Result<()> {
        self.activities
            .emit_thought(ctx, &Self::start_thought(step))
            .await
            .context("emit linear thought activity")?;
        self.execute(ctx, step).await
    }
}
