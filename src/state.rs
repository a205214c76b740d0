//! Application state module
//!
//! Contains the shared state used by bridge connections, the management API
//! and background tasks.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::PresenceConfig;
use crate::error::Result;
use crate::game::player::PlayerRegistry;
use crate::net::gateway::ChannelGateway;
use crate::scheduler::{Clock, Scheduler, SystemClock, TokioScheduler};
use crate::sync::engine::{Collaborators, EngineOptions, PresenceEngine};
use crate::sync::groups::ServerGroupRegistry;
use crate::sync::placeholders::PlaceholderBoard;

/// Application state shared across all connections
pub struct AppState {
    /// Service configuration
    pub config: PresenceConfig,
    /// Online players
    pub registry: Arc<PlayerRegistry>,
    /// Routes packets to bridge connections
    pub gateway: Arc<ChannelGateway>,
    /// Group occupancy placeholders
    pub placeholders: Arc<PlaceholderBoard>,
    /// Server groups snapshot
    pub groups: Arc<ServerGroupRegistry>,
    /// Presence reconciliation engine
    pub engine: Arc<PresenceEngine>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state on the current tokio runtime
    pub fn new(config: PresenceConfig, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let scheduler = Arc::new(TokioScheduler::current()?);
        Ok(Self::with_scheduler(
            config,
            shutdown_tx,
            scheduler,
            Arc::new(SystemClock),
        ))
    }

    /// Create a new application state with an explicit scheduler and clock
    pub fn with_scheduler(
        config: PresenceConfig,
        shutdown_tx: broadcast::Sender<()>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(PlayerRegistry::new());
        let gateway = Arc::new(ChannelGateway::new(config.pipeline_injection));
        let placeholders = Arc::new(PlaceholderBoard::new());
        let groups = Arc::new(ServerGroupRegistry::from_config(&config.global_playerlist));

        let engine = PresenceEngine::new(
            EngineOptions::from_config(&config),
            groups.clone(),
            Collaborators {
                directory: registry.clone(),
                gateway: gateway.clone(),
                scheduler,
                clock,
                placeholders: placeholders.clone(),
                formatter: None,
            },
        );

        info!(
            groups = groups.groups().len(),
            spy_servers = groups.spy_servers().len(),
            pipeline_injection = config.pipeline_injection,
            "Presence state initialized"
        );

        Self {
            config,
            registry,
            gateway,
            placeholders,
            groups,
            engine,
            shutdown_tx,
        }
    }
}
