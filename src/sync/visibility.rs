//! Visibility policy
//!
//! Decides whether one player's list should contain another player.

use std::sync::Arc;

use crate::game::player::Player;

use super::groups::ServerGroupRegistry;

/// Visibility rules, evaluated in order (first match wins):
///
/// 1. A player always sees themself.
/// 2. A vanished player is hidden from viewers without the see-vanished permission.
/// 3. Viewers on a spy server see everyone.
/// 4. Otherwise both servers must resolve to the same group.
#[derive(Debug, Clone)]
pub struct VisibilityPolicy {
    groups: Arc<ServerGroupRegistry>,
}

impl VisibilityPolicy {
    pub fn new(groups: Arc<ServerGroupRegistry>) -> Self {
        Self { groups }
    }

    /// Check if `viewer` should have `displayed` in their player list
    pub fn should_see(&self, viewer: &Player, displayed: &Player) -> bool {
        if viewer.id == displayed.id {
            return true;
        }
        if displayed.is_vanished() && !viewer.can_see_vanished() {
            return false;
        }
        let viewer_server = viewer.server();
        if self.groups.is_spy_server(&viewer_server) {
            return true;
        }
        self.groups.same_group(&viewer_server, &displayed.server())
    }

    pub fn groups(&self) -> &ServerGroupRegistry {
        &self.groups
    }
}
