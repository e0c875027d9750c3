use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use ws_message_counter::config::Settings;
use ws_message_counter::server::{create_app, AppState};
use ws_message_counter::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (also reads .env)
    let settings = Settings::new()?;

    // Initialize tracing; the guard flushes spans on exit
    let _telemetry = init_telemetry(&settings.logging, &settings.otel)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let (state, relay) = AppState::new(settings.clone());
    tracing::info!(
        session_backend = %settings.session.backend,
        broadcast_backend = state.connections.fabric.backend_type().as_str(),
        group = %state.connections.group,
        "Application state initialized"
    );

    // Start Redis relay in background
    let relay_handle = relay.map(|relay| tokio::spawn(relay.run()));

    // Start heartbeat loop
    state.heartbeat.start().await;

    // Create Axum app
    let app = create_app(state.clone());

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(shutdown_signal_handler(state))
        .await?;

    if let Some(handle) = relay_handle {
        tracing::info!("Waiting for Redis relay to finish...");
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal_handler(state: AppState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "SIGINT"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "SIGTERM"
        }
    };

    // Drain connections before the server stops accepting
    state.graceful_shutdown().execute(reason).await;
}
