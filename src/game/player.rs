//! Player module
//!
//! Manages connected players as seen by the proxy:
//! - Player identity (account id, roster id, name)
//! - Mutable presence state (current server, vanish, latency)
//! - Client capabilities (protocol version, permissions, profile keys)
//! - The registry of online players, indexed for roster lookups

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PlayerError, Result};
use crate::protocol::player_info::{ProfilePublicKey, Skin};

/// Permission allowing a player to see vanished players
pub const SEE_VANISHED_PERMISSION: &str = "tab.seevanished";

/// Identifies one connection of a player (a reconnect gets a new one)
pub type ConnectionId = u64;

/// Client protocol version, in `major.minor.patch` release form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Get the minor release number (the `20` in `1.20.4`)
    pub fn minor_version(&self) -> u8 {
        self.minor
    }

    /// Check if the client renders custom player list display names
    pub fn supports_display_name(&self) -> bool {
        self.major > 1 || self.minor >= 8
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::new(1, 20, 4)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |required: bool| -> std::result::Result<u8, String> {
            match parts.next() {
                Some(part) => part
                    .parse()
                    .map_err(|_| format!("invalid protocol version '{}'", s)),
                None if required => Err(format!("invalid protocol version '{}'", s)),
                None => Ok(0),
            }
        };
        let version = Self::new(next(true)?, next(true)?, next(false)?);
        if parts.next().is_some() {
            return Err(format!("invalid protocol version '{}'", s));
        }
        Ok(version)
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

/// Everything the proxy reports about a player when they connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// Account id
    pub id: Uuid,
    /// Player list id, defaults to the account id
    #[serde(default)]
    pub roster_id: Option<Uuid>,
    pub name: String,
    pub server: String,
    #[serde(default)]
    pub vanished: bool,
    #[serde(default)]
    pub ping: u32,
    #[serde(default)]
    pub skin: Option<Skin>,
    #[serde(default)]
    pub protocol: ProtocolVersion,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub chat_session_id: Option<Uuid>,
    #[serde(default)]
    pub public_key: Option<ProfilePublicKey>,
}

impl PlayerProfile {
    /// Create a minimal profile
    pub fn new(id: Uuid, name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            id,
            roster_id: None,
            name: name.into(),
            server: server.into(),
            vanished: false,
            ping: 0,
            skin: None,
            protocol: ProtocolVersion::default(),
            permissions: Vec::new(),
            chat_session_id: None,
            public_key: None,
        }
    }

    /// Set the roster id
    pub fn with_roster_id(mut self, roster_id: Uuid) -> Self {
        self.roster_id = Some(roster_id);
        self
    }

    /// Set the vanished flag
    pub fn with_vanished(mut self, vanished: bool) -> Self {
        self.vanished = vanished;
        self
    }

    /// Grant a permission
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    /// Set the client protocol version
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the measured latency
    pub fn with_ping(mut self, ping: u32) -> Self {
        self.ping = ping;
        self
    }
}

/// A player connected to the proxy
pub struct Player {
    /// Account id
    pub id: Uuid,
    /// Id used for the player's entry in player lists
    pub roster_id: Uuid,
    /// Connection this instance belongs to
    pub connection_id: ConnectionId,
    pub name: String,
    /// Current backend server
    server: RwLock<String>,
    vanished: AtomicBool,
    /// Latency in milliseconds
    ping: AtomicU32,
    pub skin: Option<Skin>,
    pub protocol: ProtocolVersion,
    /// Granted permissions, lowercase
    permissions: HashSet<String>,
    pub chat_session_id: Option<Uuid>,
    pub public_key: Option<ProfilePublicKey>,
}

impl Player {
    /// Create a player from a connection profile
    pub fn from_profile(connection_id: ConnectionId, profile: PlayerProfile) -> Self {
        Self {
            id: profile.id,
            roster_id: profile.roster_id.unwrap_or(profile.id),
            connection_id,
            name: profile.name,
            server: RwLock::new(profile.server),
            vanished: AtomicBool::new(profile.vanished),
            ping: AtomicU32::new(profile.ping),
            skin: profile.skin,
            protocol: profile.protocol,
            permissions: profile
                .permissions
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            chat_session_id: profile.chat_session_id,
            public_key: profile.public_key,
        }
    }

    /// Get the current server name
    pub fn server(&self) -> String {
        self.server.read().clone()
    }

    /// Check if the player is on the given server
    pub fn is_on_server(&self, server: &str) -> bool {
        *self.server.read() == server
    }

    /// Check if two players are on the same server
    pub fn shares_server_with(&self, other: &Player) -> bool {
        if self.id == other.id {
            return true;
        }
        *self.server.read() == *other.server.read()
    }

    /// Move the player to another server, returning the previous one
    pub fn set_server(&self, server: impl Into<String>) -> String {
        std::mem::replace(&mut *self.server.write(), server.into())
    }

    pub fn is_vanished(&self) -> bool {
        self.vanished.load(Ordering::SeqCst)
    }

    /// Set the vanished flag, returning whether it changed
    pub fn set_vanished(&self, vanished: bool) -> bool {
        self.vanished.swap(vanished, Ordering::SeqCst) != vanished
    }

    pub fn ping(&self) -> u32 {
        self.ping.load(Ordering::Relaxed)
    }

    pub fn set_ping(&self, ping: u32) {
        self.ping.store(ping, Ordering::Relaxed);
    }

    /// Check a permission (case-insensitive)
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(&permission.to_lowercase())
    }

    /// Check if the player may see vanished players
    pub fn can_see_vanished(&self) -> bool {
        self.has_permission(SEE_VANISHED_PERMISSION)
    }
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection_id", &self.connection_id)
            .field("server", &self.server())
            .field("vanished", &self.is_vanished())
            .finish()
    }
}

/// Read access to the set of online players
pub trait PlayerDirectory: Send + Sync {
    /// Snapshot of all online players
    fn online_players(&self) -> Vec<Arc<Player>>;

    /// Find an online player by account id
    fn find(&self, id: Uuid) -> Option<Arc<Player>>;

    /// Find an online player by roster id
    fn find_by_roster_id(&self, roster_id: Uuid) -> Option<Arc<Player>>;
}

/// Player registry - handles player lifecycle and indexing
pub struct PlayerRegistry {
    /// Map of account id to player
    players: DashMap<Uuid, Arc<Player>>,
    /// Map of roster id to account id
    roster_to_id: DashMap<Uuid, Uuid>,
    /// Map of lowercase name to account id
    name_to_id: DashMap<String, Uuid>,
    /// Next connection id to assign
    next_connection: AtomicU64,
}

impl PlayerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
            roster_to_id: DashMap::new(),
            name_to_id: DashMap::new(),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Register a newly connected player
    pub fn register(&self, profile: PlayerProfile) -> Result<Arc<Player>> {
        if self.players.contains_key(&profile.id) {
            return Err(PlayerError::AlreadyOnline(profile.id).into());
        }
        let roster_id = profile.roster_id.unwrap_or(profile.id);
        if self.roster_to_id.contains_key(&roster_id) {
            return Err(PlayerError::RosterIdInUse(roster_id).into());
        }

        let connection_id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let player = Arc::new(Player::from_profile(connection_id, profile));

        self.players.insert(player.id, player.clone());
        self.roster_to_id.insert(player.roster_id, player.id);
        self.name_to_id.insert(player.name.to_lowercase(), player.id);

        info!(
            id = %player.id,
            name = %player.name,
            server = %player.server(),
            connection_id = connection_id,
            "Player registered"
        );

        Ok(player)
    }

    /// Unregister a player, returning the removed instance
    pub fn unregister(&self, id: Uuid) -> Option<Arc<Player>> {
        let (_, player) = self.players.remove(&id)?;
        self.roster_to_id.remove(&player.roster_id);
        self.name_to_id
            .remove_if(&player.name.to_lowercase(), |_, owner| *owner == id);

        info!(
            id = %id,
            name = %player.name,
            "Player unregistered"
        );

        Some(player)
    }

    /// Get a player by account id
    pub fn get(&self, id: Uuid) -> Option<Arc<Player>> {
        self.players.get(&id).map(|r| r.clone())
    }

    /// Get a player by name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Player>> {
        self.name_to_id
            .get(&name.to_lowercase())
            .and_then(|id| self.get(*id))
    }

    /// Get the player count
    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// Iterate over all players
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Player),
    {
        for entry in self.players.iter() {
            f(&entry);
        }
    }
}

impl PlayerDirectory for PlayerRegistry {
    fn online_players(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|r| r.value().clone()).collect()
    }

    fn find(&self, id: Uuid) -> Option<Arc<Player>> {
        self.get(id)
    }

    fn find_by_roster_id(&self, roster_id: Uuid) -> Option<Arc<Player>> {
        let id = *self.roster_to_id.get(&roster_id)?;
        let player = self.get(id);
        if player.is_none() {
            debug!(roster_id = %roster_id, "Stale roster index entry");
        }
        player
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, server: &str) -> PlayerProfile {
        PlayerProfile::new(Uuid::new_v4(), name, server)
    }

    #[test]
    fn test_protocol_version_parse() {
        let version: ProtocolVersion = "1.20.4".parse().unwrap();
        assert_eq!(version, ProtocolVersion::new(1, 20, 4));
        assert_eq!(version.minor_version(), 20);

        let version: ProtocolVersion = "1.8".parse().unwrap();
        assert_eq!(version, ProtocolVersion::new(1, 8, 0));
        assert_eq!(version.to_string(), "1.8");

        assert!("1".parse::<ProtocolVersion>().is_err());
        assert!("1.x.2".parse::<ProtocolVersion>().is_err());
        assert!("1.2.3.4".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_display_name_support() {
        assert!(!ProtocolVersion::new(1, 7, 10).supports_display_name());
        assert!(ProtocolVersion::new(1, 8, 0).supports_display_name());
        assert!(ProtocolVersion::new(1, 20, 4).supports_display_name());
    }

    #[test]
    fn test_player_from_profile() {
        let id = Uuid::new_v4();
        let player = Player::from_profile(
            7,
            PlayerProfile::new(id, "Steve", "lobby").with_permission("TAB.SeeVanished"),
        );

        assert_eq!(player.id, id);
        assert_eq!(player.roster_id, id);
        assert_eq!(player.connection_id, 7);
        assert_eq!(player.server(), "lobby");
        assert!(player.can_see_vanished());
        assert!(!player.has_permission("tab.admin"));
    }

    #[test]
    fn test_player_state_changes() {
        let player = Player::from_profile(1, profile("Alex", "lobby"));

        assert_eq!(player.set_server("survival"), "lobby");
        assert!(player.is_on_server("survival"));

        assert!(player.set_vanished(true));
        assert!(!player.set_vanished(true));
        assert!(player.is_vanished());

        player.set_ping(42);
        assert_eq!(player.ping(), 42);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = PlayerRegistry::new();
        let roster_id = Uuid::new_v4();
        let player = registry
            .register(profile("Steve", "lobby").with_roster_id(roster_id))
            .unwrap();

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get_by_name("STEVE").unwrap().id, player.id);
        assert_eq!(registry.find_by_roster_id(roster_id).unwrap().id, player.id);
        assert!(registry.find_by_roster_id(player.id).is_none());

        let removed = registry.unregister(player.id).unwrap();
        assert_eq!(removed.id, player.id);
        assert_eq!(registry.count(), 0);
        assert!(registry.find_by_roster_id(roster_id).is_none());
        assert!(registry.get_by_name("steve").is_none());
    }

    #[test]
    fn test_registry_duplicate() {
        let registry = PlayerRegistry::new();
        let first = profile("Steve", "lobby");
        registry.register(first.clone()).unwrap();

        let err = registry.register(first).unwrap_err();
        assert!(err.to_string().contains("already online"));
    }

    #[test]
    fn test_reconnect_gets_new_connection_id() {
        let registry = PlayerRegistry::new();
        let steve = profile("Steve", "lobby");

        let first = registry.register(steve.clone()).unwrap();
        registry.unregister(first.id);
        let second = registry.register(steve).unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.connection_id, second.connection_id);
    }
}
