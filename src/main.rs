use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use helm_operator::{config, run_operator};

/// Steady-state resync interval driving drift repair absent cluster events.
const DEFAULT_RESYNC_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("helm_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    info!("Starting helm-operator");

    // A bad watch configuration is fatal.
    let watches = config::load_watches()?;

    let resync_period = std::env::var("RESYNC_PERIOD_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_RESYNC_SECS));

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    tokio::select! {
        result = run_operator(client, watches, resync_period) => {
            if let Err(e) = result {
                error!("Operator failed: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
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
