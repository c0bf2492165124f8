use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use coordinator_core::config::Config;
use coordinator_core::domains::recurrence::coordinator::{Coordinator, RetryConfig};
use coordinator_core::domains::recurrence::scanner::Scanner;
use coordinator_core::domains::recurrence::worker::WorkerPool;
use coordinator_core::kernel::service_host::ServiceHost;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coordinator_core=debug,sqlx=warn")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections((config.worker_count as u32) + 4)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let coordinator = Arc::new(Coordinator::new(pool));
    let retry_config = RetryConfig {
        max_retries: config.max_retries,
        base_backoff_ms: config.base_backoff_ms,
        max_backoff_secs: config.max_backoff_secs,
    };

    let host = ServiceHost::new()
        .with_service(WorkerPool::new(
            coordinator.clone(),
            config.worker_count,
            Duration::seconds(config.availability_timeout_secs),
            retry_config,
        ))
        .with_service(Scanner::new(
            coordinator.clone(),
            hostname(),
            StdDuration::from_secs(config.scan_interval_secs),
        ));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_token.cancel();
    });

    tracing::info!(worker_count = config.worker_count, "coordinator starting");
    host.run_until_shutdown(shutdown).await?;
    tracing::info!("coordinator stopped");
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("replica-{}", uuid::Uuid::new_v4()))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
