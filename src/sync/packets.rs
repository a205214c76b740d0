//! Presence packet construction
//!
//! Builds the packets the engine emits on its own behalf.

use std::sync::Arc;

use crate::game::player::Player;
use crate::protocol::player_info::{
    GameMode, InfoActions, PresenceEntry, PresencePacket, EMPTY_ROSTER_ID,
};

/// Supplies the player list display name of a player as seen by a viewer
pub trait DisplayNameFormatter: Send + Sync {
    fn format(&self, displayed: &Player, viewer: &Player) -> Option<String>;
}

/// Packet factory
#[derive(Clone, Default)]
pub struct PacketFactory {
    vanished_as_spectators: bool,
    fill_profile_key: bool,
    formatter: Option<Arc<dyn DisplayNameFormatter>>,
}

impl PacketFactory {
    pub fn new(
        vanished_as_spectators: bool,
        fill_profile_key: bool,
        formatter: Option<Arc<dyn DisplayNameFormatter>>,
    ) -> Self {
        Self {
            vanished_as_spectators,
            fill_profile_key,
            formatter,
        }
    }

    /// Removal of a player, marked as emitted by this service
    pub fn build_remove(&self, player: &Player) -> PresencePacket {
        PresencePacket::core(
            InfoActions::REMOVE_PLAYER,
            vec![
                PresenceEntry::bare(player.roster_id),
                PresenceEntry::bare(EMPTY_ROSTER_ID),
            ],
        )
    }

    /// Addition of `displayed` to the list of `viewer`
    pub fn build_add(&self, displayed: &Player, viewer: &Player) -> PresencePacket {
        let game_mode = if self.vanished_as_spectators && displayed.is_vanished() {
            GameMode::Spectator
        } else {
            GameMode::Creative
        };

        let display_name = if viewer.protocol.supports_display_name() {
            self.formatter
                .as_ref()
                .and_then(|formatter| formatter.format(displayed, viewer))
        } else {
            None
        };

        let (chat_session_id, public_key) = if self.fill_profile_key {
            (displayed.chat_session_id, displayed.public_key.clone())
        } else {
            (None, None)
        };

        let entry = PresenceEntry {
            roster_id: displayed.roster_id,
            name: Some(displayed.name.clone()),
            skin: displayed.skin.clone(),
            listed: Some(true),
            latency: Some(displayed.ping()),
            game_mode: Some(game_mode),
            display_name,
            chat_session_id,
            public_key,
        };

        PresencePacket::core(InfoActions::ADD_PLAYER, vec![entry])
    }

    /// Latency update of a player
    pub fn build_latency(&self, player: &Player) -> PresencePacket {
        PresencePacket::core(
            InfoActions::UPDATE_LATENCY,
            vec![PresenceEntry::latency(player.roster_id, player.ping())],
        )
    }
}

impl std::fmt::Debug for PacketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketFactory")
            .field("vanished_as_spectators", &self.vanished_as_spectators)
            .field("fill_profile_key", &self.fill_profile_key)
            .field("formatter", &self.formatter.is_some())
            .finish()
    }
}
