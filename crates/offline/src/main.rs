//! `stocktrack-sync` daemon: keeps the local mirror reconciled with the server.

use anyhow::Context;
use stocktrack_offline::{AppState, SyncConfig, SyncEvent};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncConfig::from_env().context("invalid configuration")?;
    stocktrack_observability::init(config.log_format);

    let state = AppState::open(&config)
        .await
        .context("failed to initialize sync state")?;

    let worker = state.worker(config.worker_timing());
    worker.probe().await;
    let initial = worker.sync_now().await;
    tracing::info!(
        replayed = initial.replayed.len(),
        rejected = initial.rejected.len(),
        remaining = initial.remaining,
        offline = initial.skipped_offline,
        "initial reconciliation done"
    );

    let handle = worker.start();
    let mut events = handle.subscribe();
    let log_events = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::Completed { replayed, .. }) => {
                    tracing::info!(replayed, "queued changes synchronized");
                }
                Ok(SyncEvent::Failed {
                    failed,
                    rejected,
                    remaining,
                    ..
                }) => {
                    tracing::warn!(
                        failed,
                        rejected,
                        remaining,
                        "some queued changes could not be synchronized"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sync event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    handle.shutdown().await;
    log_events.abort();
    Ok(())
}
