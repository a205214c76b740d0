//! Presence Sync Service
//!
//! Hosts the presence reconciliation engine next to a proxy. Proxies stream
//! player events over the bridge port; operators query the management API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use presence_sync::api;
use presence_sync::config::PresenceConfig;
use presence_sync::net::bridge::BridgeHandler;
use presence_sync::state::AppState;
use presence_sync::sync::latency::LatencyRefresher;
use presence_sync::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("╔══════════════════════════════════════════════╗");
    info!("║          Presence Sync v{}                ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");

    // Load configuration
    let config = PresenceConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone())?);
    info!("Application state initialized");

    // Announce players already known and register placeholders
    state.engine.load();

    // Start the latency refresher if enabled
    let latency_handle = if config.global_playerlist.update_latency {
        let refresher =
            LatencyRefresher::new(state.engine.clone(), config.timing.latency_refresh());
        let mut latency_shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            refresher.run(&mut latency_shutdown_rx).await;
        }))
    } else {
        None
    };

    // Start TCP listener for proxy bridge connections
    let bridge_addr: SocketAddr = config.bridge_address().parse()?;
    let bridge_listener = TcpListener::bind(bridge_addr).await?;
    info!("Bridge listening on: {}", bridge_addr);

    let bridge_state = state.clone();
    let mut bridge_shutdown_rx = shutdown_tx.subscribe();
    let bridge_handle = tokio::spawn(async move {
        accept_bridge_connections(bridge_listener, bridge_state, &mut bridge_shutdown_rx).await;
    });

    // Start management API
    let api_addr: SocketAddr = config.management_address().parse()?;
    let api_listener = TcpListener::bind(api_addr).await?;
    info!("Management API listening on: {}", api_addr);

    let api_state = state.clone();
    let api_shutdown_rx = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(async move {
        run_api_server(api_listener, api_state, api_shutdown_rx).await;
    });

    info!("Service startup complete!");

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down service...");

    // Take every cross-server entry back out of client lists
    state.engine.unload();

    let _ = bridge_handle.await;
    let _ = api_handle.await;
    if let Some(handle) = latency_handle {
        let _ = handle.await;
    }

    info!("Service shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,presence_sync=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Accept incoming proxy bridge connections
async fn accept_bridge_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New bridge connection from: {}", addr);
                        let handler = BridgeHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle(stream, addr).await {
                                warn!("Bridge connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept bridge connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Bridge connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Run the management API server
async fn run_api_server(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let router = api::create_router(state);

    let shutdown_signal = async move {
        let _ = shutdown_rx.recv().await;
        info!("Management API shutting down");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .unwrap_or_else(|e| error!("API server error: {}", e));
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
