//! Packet gateway
//!
//! Boundary between the engine and the transport that carries presence packets
//! to and from clients. The engine sends packets through [`PacketGateway`] and
//! rewrites inbound packets through the [`InboundFilter`] it installs per player.
//!
//! [`ChannelGateway`] routes every packet onto the outbound channel of the
//! bridge connection that owns the player, one FIFO channel per connection.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::game::player::{ConnectionId, Player};
use crate::protocol::player_info::PresencePacket;

/// Decision for an inbound packet after filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Pass the (possibly rewritten) packet on to the client
    Forward,
    /// Swallow the packet
    Drop,
}

/// Rewrites presence packets sent by a backend to a player
pub trait InboundFilter: Send + Sync {
    fn filter_inbound(&self, receiver: &Player, packet: &mut PresencePacket) -> FilterVerdict;
}

/// Transport hook used by the engine
pub trait PacketGateway: Send + Sync {
    /// Check whether inbound packets can be intercepted on this transport
    fn probe(&self) -> Result<(), GatewayError>;

    /// Install an inbound filter on a player's connection
    fn intercept(&self, player: &Arc<Player>, filter: Arc<dyn InboundFilter>)
        -> Result<(), GatewayError>;

    /// Send a packet to a player. Delivery failures are logged, not returned.
    fn send(&self, viewer: &Player, packet: PresencePacket);
}

/// Message written to a bridge connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dispatch {
    /// Packet emitted by the engine
    Send { viewer: Uuid, packet: PresencePacket },
    /// Inbound packet to deliver, possibly rewritten
    Forward { receiver: Uuid, packet: PresencePacket },
    /// Inbound packet to discard
    Drop { receiver: Uuid },
}

/// Outbound half of a bridge connection
pub type DispatchSender = mpsc::UnboundedSender<Dispatch>;

/// Gateway backed by per-connection channels
pub struct ChannelGateway {
    /// Account id -> owning connection and its outbound channel
    channels: DashMap<Uuid, (ConnectionId, DispatchSender)>,
    /// Account id -> installed filter
    filters: DashMap<Uuid, (ConnectionId, Arc<dyn InboundFilter>)>,
    /// Whether packets may be rewritten inline
    injection_enabled: bool,
}

impl ChannelGateway {
    pub fn new(injection_enabled: bool) -> Self {
        Self {
            channels: DashMap::new(),
            filters: DashMap::new(),
            injection_enabled,
        }
    }

    /// Route a player's packets to a connection
    pub fn attach(&self, player: &Player, tx: DispatchSender) {
        self.channels.insert(player.id, (player.connection_id, tx));
        debug!(id = %player.id, connection_id = player.connection_id, "Gateway route attached");
    }

    /// Remove a player's route and filter, unless a newer connection owns them
    pub fn detach(&self, player: &Player) {
        let connection_id = player.connection_id;
        self.channels
            .remove_if(&player.id, |_, (owner, _)| *owner == connection_id);
        self.filters
            .remove_if(&player.id, |_, (owner, _)| *owner == connection_id);
        debug!(id = %player.id, connection_id = connection_id, "Gateway route detached");
    }

    /// Run the filter installed for a receiver, if any
    pub fn filter_inbound(&self, receiver: &Player, packet: &mut PresencePacket) -> FilterVerdict {
        let filter = self
            .filters
            .get(&receiver.id)
            .filter(|entry| entry.0 == receiver.connection_id)
            .map(|entry| entry.1.clone());

        match filter {
            Some(filter) => filter.filter_inbound(receiver, packet),
            None => FilterVerdict::Forward,
        }
    }

    /// Check if a filter is installed for a player
    pub fn is_intercepted(&self, id: Uuid) -> bool {
        self.filters.contains_key(&id)
    }

    pub fn route_count(&self) -> usize {
        self.channels.len()
    }

    fn try_deliver(&self, viewer: &Player, packet: PresencePacket) -> Result<(), GatewayError> {
        let tx = self
            .channels
            .get(&viewer.id)
            .filter(|entry| entry.0 == viewer.connection_id)
            .map(|entry| entry.1.clone())
            .ok_or(GatewayError::NoRoute(viewer.id))?;

        tx.send(Dispatch::Send {
            viewer: viewer.id,
            packet,
        })
        .map_err(|_| GatewayError::ChannelClosed(viewer.id))
    }
}

impl PacketGateway for ChannelGateway {
    fn probe(&self) -> Result<(), GatewayError> {
        if self.injection_enabled {
            Ok(())
        } else {
            Err(GatewayError::InterceptionUnavailable(
                "pipeline injection is disabled".to_string(),
            ))
        }
    }

    fn intercept(
        &self,
        player: &Arc<Player>,
        filter: Arc<dyn InboundFilter>,
    ) -> Result<(), GatewayError> {
        self.probe()?;
        match self.channels.get(&player.id) {
            Some(entry) if entry.0 == player.connection_id => {}
            _ => return Err(GatewayError::NoRoute(player.id)),
        }
        self.filters
            .insert(player.id, (player.connection_id, filter));
        Ok(())
    }

    fn send(&self, viewer: &Player, packet: PresencePacket) {
        trace!(
            viewer = %viewer.id,
            actions = ?packet.actions,
            entries = packet.entries.len(),
            "Sending presence packet"
        );
        if let Err(e) = self.try_deliver(viewer, packet) {
            debug!(viewer = %viewer.id, error = %e, "Presence packet not delivered");
        }
    }
}

impl Default for ChannelGateway {
    fn default() -> Self {
        Self::new(true)
    }
}
