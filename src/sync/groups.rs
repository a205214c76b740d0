//! Server group registry
//!
//! Immutable snapshot of which backend servers share a player list, built once
//! from configuration. Players only see players whose server resolves to the
//! same group, unless they stand on a spy server.

use std::borrow::Cow;

use crate::config::GlobalPlayerListConfig;

/// Group shared by all unlisted servers when isolation is off
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Prefix of the synthetic per-server group used when isolation is on
pub const ISOLATED_PREFIX: &str = "isolated:";

/// A named set of servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGroup {
    pub name: String,
    servers: Vec<String>,
}

impl ServerGroup {
    pub fn new(name: impl Into<String>, servers: Vec<String>) -> Self {
        Self {
            name: name.into(),
            servers,
        }
    }

    /// Check if the group lists a server (case-insensitive)
    pub fn contains(&self, server: &str) -> bool {
        self.servers.iter().any(|s| s.eq_ignore_ascii_case(server))
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }
}

/// Server group registry
#[derive(Debug, Clone, Default)]
pub struct ServerGroupRegistry {
    groups: Vec<ServerGroup>,
    spy_servers: Vec<String>,
    isolate_unlisted: bool,
}

impl ServerGroupRegistry {
    /// Create a registry. Groups are matched in the given order.
    pub fn new(groups: Vec<ServerGroup>, spy_servers: Vec<String>, isolate_unlisted: bool) -> Self {
        Self {
            groups,
            spy_servers,
            isolate_unlisted,
        }
    }

    /// Build the registry from the global player list section
    pub fn from_config(config: &GlobalPlayerListConfig) -> Self {
        let groups = config
            .server_groups
            .iter()
            .map(|(name, servers)| ServerGroup::new(name.clone(), servers.clone()))
            .collect();
        Self::new(
            groups,
            config.spy_servers.clone(),
            config.isolate_unlisted_servers,
        )
    }

    /// Resolve the group a server belongs to
    pub fn group_of(&self, server: &str) -> Cow<'_, str> {
        if let Some(group) = self.groups.iter().find(|g| g.contains(server)) {
            return Cow::Borrowed(group.name.as_str());
        }
        if self.isolate_unlisted {
            Cow::Owned(format!("{}{}", ISOLATED_PREFIX, server))
        } else {
            Cow::Borrowed(DEFAULT_GROUP)
        }
    }

    /// Check if two servers share a group
    pub fn same_group(&self, a: &str, b: &str) -> bool {
        self.group_of(a) == self.group_of(b)
    }

    /// Check if a server grants its players a view of everyone
    pub fn is_spy_server(&self, server: &str) -> bool {
        self.spy_servers.iter().any(|s| s.eq_ignore_ascii_case(server))
    }

    /// Configured groups, in match order
    pub fn groups(&self) -> &[ServerGroup] {
        &self.groups
    }

    pub fn spy_servers(&self) -> &[String] {
        &self.spy_servers
    }

    pub fn isolates_unlisted(&self) -> bool {
        self.isolate_unlisted
    }
}
