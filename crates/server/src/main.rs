mod bootstrap;
mod health;
mod notifier;
mod pdf;
mod scheduler;

use std::time::Duration;

use anyhow::Result;
use quoteflow_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use quoteflow_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = app.scheduler().map(|scheduler| scheduler.spawn(shutdown_rx));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        sweeper_enabled = scheduler.is_some(),
        "quoteflow-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "quoteflow-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let _ = shutdown_tx.send(true);
    if let Some(scheduler) = scheduler {
        if tokio::time::timeout(grace, scheduler).await.is_err() {
            tracing::warn!(
                event_name = "system.server.scheduler_timeout",
                correlation_id = "shutdown",
                "expiration sweep still running at shutdown deadline"
            );
        }
    }

    // The dispatcher drains queued side effects once the last engine handle
    // (and with it the queue sender) is gone.
    drop(app.engine);
    if tokio::time::timeout(grace, app.dispatcher).await.is_err() {
        tracing::warn!(
            event_name = "system.server.dispatcher_timeout",
            correlation_id = "shutdown",
            "pending side effects abandoned at shutdown deadline"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
