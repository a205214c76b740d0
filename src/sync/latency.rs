//! Latency refresher
//!
//! Background task that periodically pushes player latency to viewers on
//! other servers. Backends only update latency for their own players.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::engine::PresenceEngine;

/// Latency refresher
pub struct LatencyRefresher {
    engine: Arc<PresenceEngine>,
    period: Duration,
}

impl LatencyRefresher {
    pub fn new(engine: Arc<PresenceEngine>, period: Duration) -> Self {
        Self { engine, period }
    }

    /// Run until shutdown or until the engine is unloaded
    pub async fn run(&self, shutdown_rx: &mut broadcast::Receiver<()>) {
        info!(period_ms = self.period.as_millis() as u64, "Latency refresher started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.engine.is_loaded() {
                        debug!("Engine unloaded, stopping latency refresher");
                        break;
                    }
                    self.engine.refresh_latency();
                }
                _ = shutdown_rx.recv() => {
                    debug!("Latency refresher received shutdown signal");
                    break;
                }
            }
        }

        info!("Latency refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::PlayerRegistry;
    use crate::net::gateway::ChannelGateway;
    use crate::scheduler::SystemClock;
    use crate::scheduler::TokioScheduler;
    use crate::sync::engine::{Collaborators, EngineOptions};
    use crate::sync::groups::ServerGroupRegistry;
    use crate::sync::placeholders::PlaceholderBoard;

    #[tokio::test]
    async fn test_stops_when_engine_not_loaded() {
        let engine = PresenceEngine::new(
            EngineOptions::default(),
            Arc::new(ServerGroupRegistry::default()),
            Collaborators {
                directory: Arc::new(PlayerRegistry::new()),
                gateway: Arc::new(ChannelGateway::new(true)),
                scheduler: Arc::new(TokioScheduler::current().unwrap()),
                clock: Arc::new(SystemClock),
                placeholders: Arc::new(PlaceholderBoard::new()),
                formatter: None,
            },
        );
        let refresher = LatencyRefresher::new(engine, Duration::from_millis(10));
        let (_tx, mut rx) = broadcast::channel(1);

        tokio::time::timeout(Duration::from_secs(1), refresher.run(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let engine = PresenceEngine::new(
            EngineOptions::default(),
            Arc::new(ServerGroupRegistry::default()),
            Collaborators {
                directory: Arc::new(PlayerRegistry::new()),
                gateway: Arc::new(ChannelGateway::new(true)),
                scheduler: Arc::new(TokioScheduler::current().unwrap()),
                clock: Arc::new(SystemClock),
                placeholders: Arc::new(PlaceholderBoard::new()),
                formatter: None,
            },
        );
        engine.load();
        let refresher = LatencyRefresher::new(engine, Duration::from_millis(10));
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), refresher.run(&mut rx))
            .await
            .unwrap();
    }
}
