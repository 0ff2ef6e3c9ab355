use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use socket_bridge::app::{self, RelayApp};
use socket_bridge::bridge::Bridge;
use socket_bridge::config::Settings;
use socket_bridge::server::{create_app, AppState};
use socket_bridge::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    telemetry::init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    // Start the bridge and the application behind it
    let (bridge, ports) = Bridge::new(settings.bridge.clone());
    let app_handle = tokio::spawn(app::drive(RelayApp::new(), ports));

    // Create Axum app
    let state = AppState::new(settings.clone(), bridge.clone());
    let router = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_handler(bridge.clone()))
    .await?;

    let result = bridge.shutdown().await;
    tracing::info!(
        connections_closed = result.connections_closed,
        connections_forced = result.connections_forced,
        "Bridge stopped"
    );

    // The relay holds no state worth flushing
    app_handle.abort();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM, or when the bridge shuts itself down
async fn shutdown_signal_handler(bridge: Bridge) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let mut bridge_stopped = bridge.shutdown_signal();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
        _ = bridge_stopped.recv() => {
            tracing::warn!("Bridge stopped on its own, shutting the server down");
        }
    }
}
