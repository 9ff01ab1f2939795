use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sessionflow_api::app::{WebhookConfig, build_app, services};
use sessionflow_events::Dispatcher;
use sessionflow_infra::config::SessionflowConfig;

/// How long shutdown waits for buffered jobs to reach the queue.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sessionflow_observability::init();

    let config = SessionflowConfig::from_env().context("load configuration")?;
    let dispatcher = services::build_dispatcher(&config);

    let app = build_app(
        Some(dispatcher.clone() as Arc<dyn Dispatcher>),
        WebhookConfig::from_config(&config),
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        path = %config.webhook_path,
        queue = %config.queue_path.display(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve webhook api")?;

    let ctx = CancellationToken::new();
    let deadline = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(DRAIN_GRACE).await;
        deadline.cancel();
    });
    if let Err(err) = dispatcher.close(&ctx).await {
        tracing::warn!(error = %err, "dispatcher did not drain before shutdown");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
