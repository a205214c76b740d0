//! Player info (presence) packet model
//!
//! Semantic representation of the packets that add, remove and update entries
//! in a client's player list. Binary encoding is left to the proxy; this module
//! only describes what a packet carries.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roster id reserved to mark a removal as emitted by this service
pub const EMPTY_ROSTER_ID: Uuid = Uuid::nil();

bitflags! {
    /// Actions carried by a player info packet
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct InfoActions: u8 {
        const ADD_PLAYER = 1 << 0;
        const REMOVE_PLAYER = 1 << 1;
        const UPDATE_GAME_MODE = 1 << 2;
        const UPDATE_LATENCY = 1 << 3;
        const UPDATE_DISPLAY_NAME = 1 << 4;
        const UPDATE_LISTED = 1 << 5;
    }
}

/// Game mode shown next to a player list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

/// Skin texture property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skin {
    /// Base64 texture payload
    pub value: String,
    /// Signature over the payload (unsigned skins have none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Skin {
    pub fn new(value: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            value: value.into(),
            signature,
        }
    }
}

/// Profile public key used for signed chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePublicKey {
    /// Expiry as unix epoch milliseconds
    pub expires_at: i64,
    pub key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Where a packet was produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketOrigin {
    /// Emitted by this service
    Core,
    /// Produced by a backend server and relayed by the proxy
    #[default]
    Relayed,
}

/// One player list entry inside a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Id keying the entry in the client's player list
    pub roster_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin: Option<Skin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_mode: Option<GameMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<ProfilePublicKey>,
}

impl PresenceEntry {
    /// Create an entry that carries nothing but its roster id
    pub fn bare(roster_id: Uuid) -> Self {
        Self {
            roster_id,
            name: None,
            skin: None,
            listed: None,
            latency: None,
            game_mode: None,
            display_name: None,
            chat_session_id: None,
            public_key: None,
        }
    }

    /// Entry for an update-latency packet
    pub fn latency(roster_id: Uuid, latency: u32) -> Self {
        Self {
            latency: Some(latency),
            ..Self::bare(roster_id)
        }
    }

    /// Entry for an update-game-mode packet
    pub fn game_mode(roster_id: Uuid, game_mode: GameMode) -> Self {
        Self {
            game_mode: Some(game_mode),
            ..Self::bare(roster_id)
        }
    }

    /// Check if this is the core-origin marker entry
    pub fn is_sentinel(&self) -> bool {
        self.roster_id == EMPTY_ROSTER_ID
    }
}

/// A player info packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePacket {
    pub actions: InfoActions,
    pub entries: Vec<PresenceEntry>,
    #[serde(default)]
    pub origin: PacketOrigin,
}

impl PresencePacket {
    /// Create a relayed packet
    pub fn new(actions: InfoActions, entries: Vec<PresenceEntry>) -> Self {
        Self {
            actions,
            entries,
            origin: PacketOrigin::Relayed,
        }
    }

    /// Create a packet emitted by this service
    pub fn core(actions: InfoActions, entries: Vec<PresenceEntry>) -> Self {
        Self {
            actions,
            entries,
            origin: PacketOrigin::Core,
        }
    }

    /// Removal of the given roster ids, as a backend would send it
    pub fn removal(roster_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self::new(
            InfoActions::REMOVE_PLAYER,
            roster_ids.into_iter().map(PresenceEntry::bare).collect(),
        )
    }

    /// Check if the packet carries an action
    pub fn has_action(&self, action: InfoActions) -> bool {
        self.actions.contains(action)
    }

    /// Check if this packet was emitted by this service.
    ///
    /// The origin tag is lost when a packet travels through a backend, so the
    /// sentinel entry counts as well.
    pub fn is_core_originated(&self) -> bool {
        self.origin == PacketOrigin::Core || self.entries.iter().any(PresenceEntry::is_sentinel)
    }

    /// Roster ids of all entries, sentinel excluded
    pub fn roster_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.is_sentinel())
            .map(|entry| entry.roster_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
