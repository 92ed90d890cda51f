//! Application host glue: logging setup and the start/serve/stop sequence.

use std::future::Future;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::lifecycle::Orchestrator;

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `info`.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a subscriber is already set.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(&directives)
            .map_err(|e| anyhow::anyhow!("invalid tracing filter '{directives}': {e}"))?,
        Err(_) => EnvFilter::new("info"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
    }
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c");
}

/// Runs the orchestrator until `shutdown` resolves.
///
/// Calls the start hook, waits for `shutdown`, then calls the stop hook.
///
/// # Errors
///
/// Returns the start or stop hook's error.
pub async fn serve<F>(orchestrator: &Orchestrator, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    orchestrator
        .start()
        .await
        .context("orchestrator failed to start")?;
    info!("serving; waiting for shutdown");
    shutdown.await;
    info!("shutting down");
    orchestrator
        .stop()
        .await
        .context("orchestrator failed to stop cleanly")
}
