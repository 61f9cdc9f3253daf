//! Entry point for the price-radar service: initializes logging and
//! configuration, wires the service graph and drives the periodic
//! collection schedule until shutdown.
//! Version: 1.0.0

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use price_radar::{run_loop, Services, Settings, VERSION};

const SHUTDOWN_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration errors are fatal here and only here.
    let settings = Settings::from_env()
        .map_err(|e| anyhow::anyhow!("configuration initialization failed: {}", e))?;

    setup_logging(settings.log_level.as_deref())?;
    info!(version = VERSION, "starting price-radar");

    let services = Services::init(settings)
        .await
        .map_err(|e| anyhow::anyhow!("service initialization failed: {}", e))?;

    let token = CancellationToken::new();
    let loop_token = token.clone();
    let services = std::sync::Arc::new(services);
    let loop_services = services.clone();

    let scheduler = tokio::spawn(async move {
        run_loop(&loop_services, loop_token).await;
    });

    wait_for_shutdown().await?;
    info!("shutdown signal received");
    token.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler).await {
        Ok(Ok(())) => info!("scheduler stopped"),
        Ok(Err(e)) => error!(error = %e, "scheduler task panicked"),
        Err(_) => error!("scheduler did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }

    services.pool.close().await;
    info!("price-radar shutdown completed");
    Ok(())
}

/// JSON logging with env-filter overrides, matching production ingestion.
fn setup_logging(log_level: Option<&str>) -> Result<()> {
    let default_level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C"),
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
