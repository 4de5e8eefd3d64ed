//! Daemon bootstrap and shutdown.

use crate::metrics;
use crate::settings::Settings;
use crate::status::{self, StatusState};
use anyhow::{Context, Result};
use slobridge_endpoint::{AdapterRegistry, Bridge};
use tokio::sync::watch;
use tracing::{error, info};

/// Run the bridge until interrupted.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a listener cannot be
/// started. Nothing connects before the configuration has been validated.
pub async fn run(settings: Settings) -> Result<()> {
    let config = settings.bridge_config();
    config.validate().context("Invalid configuration")?;

    if settings.metrics.enabled {
        metrics::init(&settings.metrics, config.sockets.len())?;
    }

    let status_listener = if settings.status.enabled {
        Some(status::bind(&settings.status).await?)
    } else {
        None
    };

    let registry = AdapterRegistry::with_builtin();
    let bridge = Bridge::start(&config, &registry).context("Failed to start bridge")?;

    let (status_shutdown, status_rx) = watch::channel(false);
    let status_task = status_listener.map(|listener| {
        let state = StatusState {
            router: bridge.router().clone(),
            directory: bridge.directory().clone(),
        };
        tokio::spawn(status::serve(listener, state, status_rx))
    });

    shutdown_signal().await;

    let stats = bridge.shutdown().await;
    let _ = status_shutdown.send(true);
    if let Some(task) = status_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Status endpoint failed"),
            Err(e) => error!(error = %e, "Status task panicked"),
        }
    }

    info!(
        messages = stats.messages_relayed,
        deliveries = stats.deliveries_queued,
        failures = stats.delivery_failures,
        "Slobridge stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
