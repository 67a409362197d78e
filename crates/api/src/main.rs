use std::sync::Arc;

use anyhow::Context;

use pantry_api::app::{self, services};
use pantry_api::config::Config;
use pantry_infra::external::{LogMailer, UnconfiguredRecipeGenerator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pantry_observability::init();

    let config = Config::from_env().context("invalid configuration")?;

    let services = Arc::new(
        services::build_services(&config)
            .await
            .context("failed to connect backing services")?,
    );
    // No model client or mail transport is wired in yet.
    let workers = services::spawn_workers(
        &services,
        Arc::new(LogMailer),
        Arc::new(UnconfiguredRecipeGenerator),
        config.worker_poll_interval,
    );

    let app = app::build_app(services, &config.jwt_secret);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down workers");
    workers.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
