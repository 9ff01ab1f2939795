//! Production wiring for the queue consumer.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sessionflow_infra::config::SessionflowConfig;
use sessionflow_infra::external::{ActivityEmitter, AgentActivityClient};
use sessionflow_infra::sla::{
    AgentSessionProcessor, FirstThoughtSlaConfig, ResponseSlaRecorder, ThoughtEmitter,
};
use sessionflow_infra::workers::{FileCursorStore, QueueWorker};

use crate::agent::{AgentRunner, CommandAgentRunner};
use crate::processor::SessionJobProcessor;

/// Session processor with SLA enforcement, reporting through `activities`.
pub fn build_processor(
    activities: Arc<dyn ActivityEmitter>,
    agent: Arc<dyn AgentRunner>,
    sla: FirstThoughtSlaConfig,
) -> AgentSessionProcessor {
    let thoughts: Arc<dyn ThoughtEmitter> = Arc::new(activities.clone());
    let runner = Arc::new(SessionJobProcessor::new(activities.clone(), agent));

    AgentSessionProcessor::new(thoughts, runner)
        .with_recorder(Arc::new(ResponseSlaRecorder::new(activities)))
        .with_sla_config(sla)
}

pub fn build_agent(config: &SessionflowConfig) -> anyhow::Result<CommandAgentRunner> {
    let mut agent = CommandAgentRunner::new(config.agent_command.clone())
        .context("configure agent command")?
        .with_log_dir(&config.runner_log_dir);
    if let Some(timeout) = config.agent_timeout {
        agent = agent.with_timeout(timeout);
    }
    Ok(agent)
}

/// Consume the queue until `ctx` is cancelled (or once, in drain mode).
pub async fn run(config: &SessionflowConfig, ctx: &CancellationToken) -> anyhow::Result<()> {
    let client = AgentActivityClient::new(config.activity_client_config()?)
        .context("configure activity client")?;
    let activities: Arc<dyn ActivityEmitter> = Arc::new(client);
    let agent: Arc<dyn AgentRunner> = Arc::new(build_agent(config)?);

    let processor = build_processor(activities, agent, config.sla_config());
    run_with(config, processor, ctx).await
}

/// Drive a queue worker over `processor`, checkpointing next to the queue.
pub async fn run_with(
    config: &SessionflowConfig,
    processor: AgentSessionProcessor,
    ctx: &CancellationToken,
) -> anyhow::Result<()> {
    let cursor = FileCursorStore::for_queue(&config.queue_path);
    let mut worker = QueueWorker::new(config.queue_worker_config(), processor, cursor).await?;
    worker.run(ctx).await?;
    Ok(())
}
