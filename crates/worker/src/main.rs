use anyhow::Context;
use tokio_util::sync::CancellationToken;

use sessionflow_infra::config::SessionflowConfig;
use sessionflow_worker::{format_actionable_error, service};

#[tokio::main]
async fn main() {
    sessionflow_observability::init();

    let ctx = CancellationToken::new();
    let shutdown = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    if let Err(err) = start(&ctx).await {
        tracing::error!(error = %format!("{err:#}"), "worker failed");
        eprintln!("{}", format_actionable_error(&err));
        std::process::exit(1);
    }
}

async fn start(ctx: &CancellationToken) -> anyhow::Result<()> {
    let config = SessionflowConfig::from_env().context("load configuration")?;
    tracing::info!(
        queue = %config.queue_path.display(),
        once = config.once,
        agent = %config.agent_command.join(" "),
        "starting session worker"
    );
    service::run(&config, ctx).await
}
