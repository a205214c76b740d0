//! Presence reconciliation engine
//!
//! Reacts to player lifecycle events and keeps every client's player list in
//! line with the visibility policy:
//! - Join / quit / server switch / vanish change deltas
//! - Debouncing of quit and switch races through the scheduler
//! - Inline rewriting of backend presence packets
//! - Group occupancy placeholders
//! - Periodic latency updates across servers

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::game::player::{ConnectionId, Player, PlayerDirectory};
use crate::net::gateway::{FilterVerdict, InboundFilter, PacketGateway};
use crate::protocol::player_info::{GameMode, InfoActions, PresencePacket};
use crate::scheduler::{Clock, Scheduler};

use super::groups::{ServerGroupRegistry, DEFAULT_GROUP};
use super::packets::{DisplayNameFormatter, PacketFactory};
use super::placeholders::{group_placeholder, CountSupplier, PlaceholderRegistry};
use super::switches::SwitchTracker;
use super::visibility::VisibilityPolicy;

/// Engine behaviour switches and timings
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub display_others_as_spectators: bool,
    pub vanished_as_spectators: bool,
    pub fill_profile_key: bool,
    pub quit_delay: Duration,
    pub switch_delay: Duration,
    pub switch_protection: Duration,
}

impl EngineOptions {
    pub fn from_config(config: &PresenceConfig) -> Self {
        let list = &config.global_playerlist;
        Self {
            display_others_as_spectators: list.display_others_as_spectators,
            vanished_as_spectators: list.display_vanished_players_as_spectators,
            fill_profile_key: list.fill_profile_key,
            quit_delay: config.timing.quit_delay(),
            switch_delay: config.timing.switch_delay(),
            switch_protection: config.timing.switch_protection(),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&PresenceConfig::default())
    }
}

/// Services the engine depends on
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn PlayerDirectory>,
    pub gateway: Arc<dyn PacketGateway>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub placeholders: Arc<dyn PlaceholderRegistry>,
    pub formatter: Option<Arc<dyn DisplayNameFormatter>>,
}

/// Presence reconciliation engine
pub struct PresenceEngine {
    /// Handle to ourselves for deferred tasks and filter installation
    this: Weak<PresenceEngine>,
    options: EngineOptions,
    groups: Arc<ServerGroupRegistry>,
    policy: VisibilityPolicy,
    packets: PacketFactory,
    directory: Arc<dyn PlayerDirectory>,
    gateway: Arc<dyn PacketGateway>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    placeholders: Arc<dyn PlaceholderRegistry>,
    switches: SwitchTracker,
    /// Account id -> connection whose join has been handled
    announced: DashMap<Uuid, ConnectionId>,
    /// Account id -> latency last pushed to other servers
    latency_cache: DashMap<Uuid, u32>,
    /// Groups with a registered occupancy placeholder
    tracked_groups: DashSet<String>,
    interception: AtomicBool,
    loaded: AtomicBool,
}

impl PresenceEngine {
    /// Create a new engine
    pub fn new(
        options: EngineOptions,
        groups: Arc<ServerGroupRegistry>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        debug!(
            spy_servers = ?groups.spy_servers(),
            groups = groups.groups().len(),
            isolate_unlisted = groups.isolates_unlisted(),
            display_others_as_spectators = options.display_others_as_spectators,
            vanished_as_spectators = options.vanished_as_spectators,
            fill_profile_key = options.fill_profile_key,
            "Creating presence engine"
        );

        let packets = PacketFactory::new(
            options.vanished_as_spectators,
            options.fill_profile_key,
            collaborators.formatter,
        );

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            policy: VisibilityPolicy::new(groups.clone()),
            groups,
            packets,
            options,
            directory: collaborators.directory,
            gateway: collaborators.gateway,
            scheduler: collaborators.scheduler,
            clock: collaborators.clock,
            placeholders: collaborators.placeholders,
            switches: SwitchTracker::new(),
            announced: DashMap::new(),
            latency_cache: DashMap::new(),
            tracked_groups: DashSet::new(),
            interception: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
        })
    }

    /// Start synchronizing players that are already online
    pub fn load(&self) {
        match self.gateway.probe() {
            Ok(()) => {
                self.interception.store(true, Ordering::SeqCst);
                debug!("Packet interception available");
            }
            Err(e) => {
                self.interception.store(false, Ordering::SeqCst);
                warn!(
                    error = %e,
                    "Running in compatibility mode: switch reconciliation is delayed and backend packets are not rewritten"
                );
            }
        }

        let online = self.directory.online_players();
        for player in &online {
            self.announced.insert(player.id, player.connection_id);
            self.latency_cache.insert(player.id, player.ping());
            self.install_filter(player);
        }

        for displayed in &online {
            for viewer in &online {
                if viewer.shares_server_with(displayed) {
                    continue;
                }
                if self.policy.should_see(viewer, displayed) {
                    self.gateway
                        .send(viewer, self.packets.build_add(displayed, viewer));
                }
            }
        }

        for group in self.groups.groups() {
            self.ensure_group_placeholder(&group.name);
        }
        if !self.groups.isolates_unlisted() {
            self.ensure_group_placeholder(DEFAULT_GROUP);
        }
        for player in &online {
            self.track_server(&player.server());
        }
        self.refresh_placeholders();

        self.loaded.store(true, Ordering::SeqCst);
        info!(
            players = online.len(),
            interception = self.interception_active(),
            "Presence engine loaded"
        );
    }

    /// Remove every cross-server entry from every client
    pub fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);

        let online = self.directory.online_players();
        for displayed in &online {
            let remove = self.packets.build_remove(displayed);
            for viewer in &online {
                if !viewer.shares_server_with(displayed) {
                    self.gateway.send(viewer, remove.clone());
                }
            }
        }

        info!(players = online.len(), "Presence engine unloaded");
    }

    /// Handle a player connecting
    pub fn on_join(&self, player: &Arc<Player>) {
        if !self.is_loaded() {
            return;
        }
        if let Some(previous) = self.announced.insert(player.id, player.connection_id) {
            if previous == player.connection_id {
                debug!(
                    id = %player.id,
                    connection_id = player.connection_id,
                    "Duplicate join ignored"
                );
                return;
            }
        }

        debug!(id = %player.id, name = %player.name, server = %player.server(), "Player joined");

        self.install_filter(player);
        self.latency_cache.insert(player.id, player.ping());

        for other in self.directory.online_players() {
            if other.id == player.id {
                continue;
            }
            if self.policy.should_see(&other, player) {
                self.gateway.send(&other, self.packets.build_add(player, &other));
            }
            if self.policy.should_see(player, &other) {
                self.gateway.send(player, self.packets.build_add(&other, player));
            }
        }

        self.track_server(&player.server());
        self.refresh_placeholders();
    }

    /// Handle a player disconnecting. Acted upon after the quit delay.
    pub fn on_quit(&self, player: &Arc<Player>) {
        if !self.is_loaded() {
            return;
        }
        debug!(
            id = %player.id,
            connection_id = player.connection_id,
            "Player quit, scheduling removal"
        );

        let engine = self.this.clone();
        let player = player.clone();
        self.scheduler.run_after(
            self.options.quit_delay,
            Box::new(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.finish_quit(&player);
                }
            }),
        );
    }

    fn finish_quit(&self, player: &Player) {
        if !self.is_loaded() {
            return;
        }
        if self.directory.find(player.id).is_some() {
            trace!(id = %player.id, "Player reconnected before removal, skipping");
            return;
        }

        let remove = self.packets.build_remove(player);
        for other in self.directory.online_players() {
            if other.id == player.id {
                continue;
            }
            self.gateway.send(&other, remove.clone());
        }

        self.switches.forget(player.id);
        self.announced
            .remove_if(&player.id, |_, connection| *connection == player.connection_id);
        self.latency_cache.remove(&player.id);
        self.refresh_placeholders();

        debug!(id = %player.id, name = %player.name, "Player removed from player lists");
    }

    /// Handle a player moving to another backend server
    pub fn on_server_change(&self, player: &Arc<Player>, from: &str, to: &str) {
        if !self.is_loaded() {
            return;
        }
        self.switches.record(player.id, self.clock.now());
        debug!(id = %player.id, from = from, to = to, "Player switched server");

        if self.interception_active() {
            self.reconcile_switch(player);
        } else {
            let engine = self.this.clone();
            let player = player.clone();
            self.scheduler.run_after(
                self.options.switch_delay,
                Box::new(move || {
                    if let Some(engine) = engine.upgrade() {
                        engine.finish_switch(&player);
                    }
                }),
            );
        }

        self.track_server(to);
        self.refresh_placeholders();
    }

    fn finish_switch(&self, player: &Player) {
        if !self.is_loaded() {
            return;
        }
        match self.directory.find(player.id) {
            Some(current) if current.connection_id == player.connection_id => {
                self.reconcile_switch(player);
            }
            _ => trace!(id = %player.id, "Player left before switch reconciliation"),
        }
    }

    fn reconcile_switch(&self, player: &Player) {
        let remove_player = self.packets.build_remove(player);
        for other in self.directory.online_players() {
            if other.id == player.id {
                continue;
            }
            if self.policy.should_see(&other, player) {
                self.gateway.send(&other, self.packets.build_add(player, &other));
            } else {
                self.gateway.send(&other, remove_player.clone());
            }
            if self.policy.should_see(player, &other) {
                self.gateway.send(player, self.packets.build_add(&other, player));
            } else {
                self.gateway.send(player, self.packets.build_remove(&other));
            }
        }
    }

    /// Handle a player's vanish status changing
    pub fn on_vanish_status_change(&self, player: &Player) {
        if !self.is_loaded() {
            return;
        }
        let vanished = player.is_vanished();
        debug!(id = %player.id, vanished = vanished, "Vanish status changed");

        for viewer in self.directory.online_players() {
            if viewer.id == player.id {
                continue;
            }
            let visible = self.policy.should_see(&viewer, player);
            if vanished && !visible {
                self.gateway.send(&viewer, self.packets.build_remove(player));
            } else if !vanished && visible {
                self.gateway.send(&viewer, self.packets.build_add(player, &viewer));
            }
        }

        self.refresh_placeholders();
    }

    /// Push latency of players whose ping changed to viewers on other servers
    pub fn refresh_latency(&self) {
        if !self.is_loaded() {
            return;
        }

        let online = self.directory.online_players();
        for displayed in &online {
            let ping = displayed.ping();
            let changed = self
                .latency_cache
                .insert(displayed.id, ping)
                .map_or(true, |previous| previous != ping);
            if !changed {
                continue;
            }

            let packet = self.packets.build_latency(displayed);
            for viewer in &online {
                if viewer.shares_server_with(displayed) {
                    continue;
                }
                if self.policy.should_see(viewer, displayed) {
                    self.gateway.send(viewer, packet.clone());
                }
            }
        }
    }

    /// Recompute every group occupancy placeholder
    pub fn refresh_placeholders(&self) {
        for group in self.tracked_groups.iter() {
            self.placeholders.refresh(&group_placeholder(group.key()));
        }
    }

    fn track_server(&self, server: &str) {
        let group = self.groups.group_of(server);
        self.ensure_group_placeholder(&group);
    }

    fn ensure_group_placeholder(&self, group: &str) {
        if !self.tracked_groups.insert(group.to_string()) {
            return;
        }

        let directory = self.directory.clone();
        let groups = self.groups.clone();
        let name = group.to_string();
        let supplier: CountSupplier = Arc::new(move || {
            directory
                .online_players()
                .iter()
                .filter(|p| !p.is_vanished() && groups.group_of(&p.server()) == name.as_str())
                .count()
        });
        self.placeholders
            .register_count(&group_placeholder(group), supplier);
        debug!(group = group, "Registered group placeholder");
    }

    fn install_filter(&self, player: &Arc<Player>) {
        if !self.interception_active() {
            return;
        }
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        let filter: Arc<dyn InboundFilter> = engine;
        if let Err(e) = self.gateway.intercept(player, filter) {
            debug!(id = %player.id, error = %e, "Failed to intercept player connection");
        }
    }

    /// Resolve the group of a server
    pub fn group_of(&self, server: &str) -> String {
        self.groups.group_of(server).into_owned()
    }

    /// Groups that have an occupancy placeholder, sorted
    pub fn tracked_groups(&self) -> BTreeSet<String> {
        self.tracked_groups.iter().map(|g| g.key().clone()).collect()
    }

    /// Check if `viewer` should see `displayed`
    pub fn should_see(&self, viewer: &Player, displayed: &Player) -> bool {
        self.policy.should_see(viewer, displayed)
    }

    pub fn interception_active(&self) -> bool {
        self.interception.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn switches(&self) -> &SwitchTracker {
        &self.switches
    }
}

impl InboundFilter for PresenceEngine {
    fn filter_inbound(&self, receiver: &Player, packet: &mut PresencePacket) -> FilterVerdict {
        if !self.is_loaded() || !self.interception_active() {
            return FilterVerdict::Forward;
        }

        if packet.has_action(InfoActions::REMOVE_PLAYER) && !packet.is_core_originated() {
            let now = self.clock.now();
            for entry in &mut packet.entries {
                // Unknown ids are NPCs, their removal goes through
                let Some(player) = self.directory.find_by_roster_id(entry.roster_id) else {
                    continue;
                };
                if player.is_vanished()
                    || !self
                        .switches
                        .switched_within(player.id, now, self.options.switch_protection)
                {
                    continue;
                }
                let replacement = Uuid::new_v4();
                debug!(
                    receiver = %receiver.id,
                    player = %player.id,
                    replacement = %replacement,
                    "Cancelled backend removal racing a server switch"
                );
                entry.roster_id = replacement;
            }
        }

        if self.options.display_others_as_spectators
            && packet.has_action(InfoActions::UPDATE_GAME_MODE)
        {
            for entry in &mut packet.entries {
                let Some(player) = self.directory.find_by_roster_id(entry.roster_id) else {
                    continue;
                };
                if !player.shares_server_with(receiver) {
                    entry.game_mode = Some(GameMode::Spectator);
                }
            }
        }

        FilterVerdict::Forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{PlayerProfile, PlayerRegistry};
    use crate::protocol::player_info::PresenceEntry;
    use crate::scheduler::ManualScheduler;
    use crate::sync::groups::ServerGroup;
    use crate::sync::placeholders::PlaceholderBoard;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(Uuid, PresencePacket)>>,
        intercepted: Mutex<Vec<Uuid>>,
        unavailable: bool,
    }

    impl RecordingGateway {
        fn take(&self) -> Vec<(Uuid, PresencePacket)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl PacketGateway for RecordingGateway {
        fn probe(&self) -> Result<(), crate::error::GatewayError> {
            if self.unavailable {
                Err(crate::error::GatewayError::InterceptionUnavailable(
                    "test".to_string(),
                ))
            } else {
                Ok(())
            }
        }

        fn intercept(
            &self,
            player: &Arc<Player>,
            _filter: Arc<dyn InboundFilter>,
        ) -> Result<(), crate::error::GatewayError> {
            self.intercepted.lock().push(player.id);
            Ok(())
        }

        fn send(&self, viewer: &Player, packet: PresencePacket) {
            self.sent.lock().push((viewer.id, packet));
        }
    }

    struct Harness {
        registry: Arc<PlayerRegistry>,
        gateway: Arc<RecordingGateway>,
        scheduler: Arc<ManualScheduler>,
        board: Arc<PlaceholderBoard>,
        engine: Arc<PresenceEngine>,
    }

    fn harness(gateway: RecordingGateway, options: EngineOptions) -> Harness {
        let registry = Arc::new(PlayerRegistry::new());
        let gateway = Arc::new(gateway);
        let scheduler = ManualScheduler::new();
        let board = Arc::new(PlaceholderBoard::new());
        let groups = Arc::new(ServerGroupRegistry::new(
            vec![ServerGroup::new(
                "a",
                vec!["s1".to_string(), "s2".to_string()],
            )],
            vec!["spy".to_string()],
            false,
        ));
        let engine = PresenceEngine::new(
            options,
            groups,
            Collaborators {
                directory: registry.clone(),
                gateway: gateway.clone(),
                scheduler: scheduler.clone(),
                clock: scheduler.clone(),
                placeholders: board.clone(),
                formatter: None,
            },
        );
        Harness {
            registry,
            gateway,
            scheduler,
            board,
            engine,
        }
    }

    fn join(h: &Harness, name: &str, server: &str) -> Arc<Player> {
        let player = h
            .registry
            .register(PlayerProfile::new(Uuid::new_v4(), name, server))
            .unwrap();
        h.engine.on_join(&player);
        player
    }

    fn adds_to(sent: &[(Uuid, PresencePacket)], viewer: Uuid) -> Vec<Uuid> {
        sent.iter()
            .filter(|(to, p)| *to == viewer && p.has_action(InfoActions::ADD_PLAYER))
            .flat_map(|(_, p)| p.roster_ids().collect::<Vec<_>>())
            .collect()
    }

    fn removes_to(sent: &[(Uuid, PresencePacket)], viewer: Uuid) -> Vec<Uuid> {
        sent.iter()
            .filter(|(to, p)| *to == viewer && p.has_action(InfoActions::REMOVE_PLAYER))
            .flat_map(|(_, p)| p.roster_ids().collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_load_sends_cross_server_adds() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        let x = h
            .registry
            .register(PlayerProfile::new(Uuid::new_v4(), "X", "s1"))
            .unwrap();
        let y = h
            .registry
            .register(PlayerProfile::new(Uuid::new_v4(), "Y", "s2"))
            .unwrap();
        let x2 = h
            .registry
            .register(PlayerProfile::new(Uuid::new_v4(), "X2", "s1"))
            .unwrap();

        h.engine.load();
        let sent = h.gateway.take();

        assert!(h.engine.interception_active());
        assert_eq!(h.gateway.intercepted.lock().len(), 3);
        // Same-server pairs are left to the backend
        assert!(!adds_to(&sent, x.id).contains(&x2.roster_id));
        let mut to_y = adds_to(&sent, y.id);
        to_y.sort();
        let mut expected = vec![x.roster_id, x2.roster_id];
        expected.sort();
        assert_eq!(to_y, expected);
        assert_eq!(h.board.value("%playerlist-group_a%"), Some(3));
        assert_eq!(h.board.value("%playerlist-group_DEFAULT%"), Some(0));
    }

    #[test]
    fn test_join_is_mutual_and_deduplicated() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let y = join(&h, "Y", "s2");
        let sent = h.gateway.take();

        assert_eq!(adds_to(&sent, x.id), vec![y.roster_id]);
        assert_eq!(adds_to(&sent, y.id), vec![x.roster_id]);

        h.engine.on_join(&y);
        assert!(h.gateway.take().is_empty());
    }

    #[test]
    fn test_quit_is_delayed() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let y = join(&h, "Y", "s2");
        h.gateway.take();

        h.registry.unregister(y.id);
        h.engine.on_quit(&y);
        assert!(h.gateway.take().is_empty());

        h.scheduler.advance(Duration::from_millis(50));
        let sent = h.gateway.take();
        assert_eq!(removes_to(&sent, x.id), vec![y.roster_id]);
        assert_eq!(h.board.value("%playerlist-group_a%"), Some(1));
    }

    #[test]
    fn test_switch_updates_both_directions() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let z = join(&h, "Z", "s3");
        h.gateway.take();

        z.set_server("s2");
        h.engine.on_server_change(&z, "s3", "s2");
        let sent = h.gateway.take();
        assert_eq!(adds_to(&sent, x.id), vec![z.roster_id]);
        assert_eq!(adds_to(&sent, z.id), vec![x.roster_id]);

        z.set_server("s4");
        h.engine.on_server_change(&z, "s2", "s4");
        let sent = h.gateway.take();
        assert_eq!(removes_to(&sent, x.id), vec![z.roster_id]);
        assert_eq!(removes_to(&sent, z.id), vec![x.roster_id]);
        assert!(h.engine.switches().last_switch(z.id).is_some());
    }

    #[test]
    fn test_switch_delayed_without_interception() {
        let gateway = RecordingGateway {
            unavailable: true,
            ..Default::default()
        };
        let h = harness(gateway, EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let z = join(&h, "Z", "s3");
        h.gateway.take();
        assert!(h.gateway.intercepted.lock().is_empty());

        z.set_server("s2");
        h.engine.on_server_change(&z, "s3", "s2");
        assert!(h.gateway.take().is_empty());

        h.scheduler.advance(Duration::from_millis(199));
        assert!(h.gateway.take().is_empty());
        h.scheduler.advance(Duration::from_millis(1));
        assert_eq!(adds_to(&h.gateway.take(), x.id), vec![z.roster_id]);
    }

    #[test]
    fn test_vanish_hides_and_reveals() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let y = join(&h, "Y", "s2");
        h.gateway.take();

        y.set_vanished(true);
        h.engine.on_vanish_status_change(&y);
        assert_eq!(removes_to(&h.gateway.take(), x.id), vec![y.roster_id]);
        assert_eq!(h.board.value("%playerlist-group_a%"), Some(1));

        y.set_vanished(false);
        h.engine.on_vanish_status_change(&y);
        assert_eq!(adds_to(&h.gateway.take(), x.id), vec![y.roster_id]);
    }

    #[test]
    fn test_latency_refresh_only_on_change() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let y = join(&h, "Y", "s2");
        h.gateway.take();

        h.engine.refresh_latency();
        assert!(h.gateway.take().is_empty());

        y.set_ping(80);
        h.engine.refresh_latency();
        let sent = h.gateway.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, x.id);
        assert_eq!(
            sent[0].1.entries,
            vec![PresenceEntry::latency(y.roster_id, 80)]
        );
    }

    #[test]
    fn test_filter_forces_spectators() {
        let options = EngineOptions {
            display_others_as_spectators: true,
            ..EngineOptions::default()
        };
        let h = harness(RecordingGateway::default(), options);
        h.engine.load();
        let x = join(&h, "X", "s1");
        let x2 = join(&h, "X2", "s1");
        let y = join(&h, "Y", "s2");

        let mut packet = PresencePacket::new(
            InfoActions::UPDATE_GAME_MODE,
            vec![
                PresenceEntry::game_mode(x2.roster_id, GameMode::Survival),
                PresenceEntry::game_mode(y.roster_id, GameMode::Survival),
                PresenceEntry::game_mode(Uuid::new_v4(), GameMode::Survival),
            ],
        );
        assert_eq!(h.engine.filter_inbound(&x, &mut packet), FilterVerdict::Forward);

        let modes: Vec<_> = packet.entries.iter().map(|e| e.game_mode).collect();
        assert_eq!(
            modes,
            vec![
                Some(GameMode::Survival),
                Some(GameMode::Spectator),
                Some(GameMode::Survival)
            ]
        );
    }

    #[test]
    fn test_unload_removes_cross_server_entries() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let y = join(&h, "Y", "s2");
        let x2 = join(&h, "X2", "s1");
        h.gateway.take();

        h.engine.unload();
        let sent = h.gateway.take();
        let mut to_y = removes_to(&sent, y.id);
        to_y.sort();
        let mut expected = vec![x.roster_id, x2.roster_id];
        expected.sort();
        assert_eq!(to_y, expected);
        assert!(!removes_to(&sent, x.id).contains(&x2.roster_id));
        assert!(!h.engine.is_loaded());
    }

    #[test]
    fn test_events_after_unload_are_ignored() {
        let h = harness(RecordingGateway::default(), EngineOptions::default());
        h.engine.load();
        let x = join(&h, "X", "s1");
        let y = join(&h, "Y", "s2");
        h.engine.on_quit(&y);
        h.engine.unload();
        h.gateway.take();

        let z = join(&h, "Z", "s2");
        z.set_server("s1");
        h.engine.on_server_change(&z, "s2", "s1");
        x.set_vanished(true);
        h.engine.on_vanish_status_change(&x);
        h.scheduler.advance(Duration::from_secs(1));
        assert!(h.gateway.take().is_empty());

        // A fresh switch would normally protect Z from a backend removal
        h.engine.switches().record(z.id, h.scheduler.now());
        let mut packet = PresencePacket::removal([z.roster_id]);
        let before = packet.clone();
        assert_eq!(h.engine.filter_inbound(&x, &mut packet), FilterVerdict::Forward);
        assert_eq!(packet, before);
    }
}
