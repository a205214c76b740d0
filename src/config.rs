//! Service configuration module
//!
//! Handles loading and parsing of the presence sync configuration from a TOML
//! file and environment variables.
//!
//! ```toml
//! pipeline-injection = true
//!
//! [global-playerlist]
//! spy-servers = ["spyserver1"]
//! isolate-unlisted-servers = false
//!
//! [global-playerlist.server-groups]
//! lobbies = ["lobby1", "lobby2"]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sync::groups::{DEFAULT_GROUP, ISOLATED_PREFIX};

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PresenceConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Global player list options
    #[serde(default)]
    pub global_playerlist: GlobalPlayerListConfig,

    /// Whether inbound presence packets may be rewritten inline
    #[serde(default = "default_true")]
    pub pipeline_injection: bool,

    /// Debounce and suppression windows
    #[serde(default)]
    pub timing: TimingConfig,

    /// Proxy bridge and management API
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Global player list options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalPlayerListConfig {
    /// Servers whose players see everyone
    #[serde(default = "default_spy_servers")]
    pub spy_servers: Vec<String>,

    /// Group name -> member servers
    #[serde(default)]
    pub server_groups: BTreeMap<String, Vec<String>>,

    /// Show players from other servers in spectator game mode
    #[serde(default)]
    pub display_others_as_spectators: bool,

    /// Show vanished players in spectator game mode
    #[serde(default = "default_true")]
    pub display_vanished_players_as_spectators: bool,

    /// Give every unlisted server its own group instead of the shared default
    #[serde(default)]
    pub isolate_unlisted_servers: bool,

    /// Forward chat session ids and profile public keys in add packets
    #[serde(default)]
    pub fill_profile_key: bool,

    /// Periodically push latency of players on other servers
    #[serde(default)]
    pub update_latency: bool,
}

/// Timing configuration (all values in milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimingConfig {
    /// Delay before a quit is acted upon
    #[serde(default = "default_quit_delay")]
    pub quit_delay_ms: u64,

    /// Delay before switch reconciliation when interception is unavailable
    #[serde(default = "default_switch_delay")]
    pub switch_delay_ms: u64,

    /// How long after a switch backend removals are cancelled
    #[serde(default = "default_switch_protection")]
    pub switch_protection_ms: u64,

    /// Latency refresh interval
    #[serde(default = "default_latency_refresh")]
    pub latency_refresh_ms: u64,
}

/// Bridge listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    /// Address both listeners bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port proxies connect to
    #[serde(default = "default_bridge_port")]
    pub port: u16,

    /// Management API port
    #[serde(default = "default_management_port")]
    pub management_port: u16,

    /// Maximum length of one bridge message line
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_spy_servers() -> Vec<String> {
    vec!["spyserver1".to_string()]
}

fn default_quit_delay() -> u64 {
    50
}

fn default_switch_delay() -> u64 {
    200
}

fn default_switch_protection() -> u64 {
    2000
}

fn default_latency_refresh() -> u64 {
    500
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bridge_port() -> u16 {
    25590
}

fn default_management_port() -> u16 {
    25591
}

fn default_max_line_bytes() -> usize {
    65536
}

impl Default for GlobalPlayerListConfig {
    fn default() -> Self {
        Self {
            spy_servers: default_spy_servers(),
            server_groups: BTreeMap::new(),
            display_others_as_spectators: false,
            display_vanished_players_as_spectators: default_true(),
            isolate_unlisted_servers: false,
            fill_profile_key: false,
            update_latency: false,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quit_delay_ms: default_quit_delay(),
            switch_delay_ms: default_switch_delay(),
            switch_protection_ms: default_switch_protection(),
            latency_refresh_ms: default_latency_refresh(),
        }
    }
}

impl TimingConfig {
    pub fn quit_delay(&self) -> Duration {
        Duration::from_millis(self.quit_delay_ms)
    }

    pub fn switch_delay(&self) -> Duration {
        Duration::from_millis(self.switch_delay_ms)
    }

    pub fn switch_protection(&self) -> Duration {
        Duration::from_millis(self.switch_protection_ms)
    }

    pub fn latency_refresh(&self) -> Duration {
        Duration::from_millis(self.latency_refresh_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_bridge_port(),
            management_port: default_management_port(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/presence.toml"),
            global_playerlist: GlobalPlayerListConfig::default(),
            pipeline_injection: default_true(),
            timing: TimingConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl PresenceConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("PRESENCE_SYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/presence.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration document without touching the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PRESENCE_SYNC_BIND_ADDRESS") {
            self.bridge.bind_address = val;
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_PORT") {
            if let Ok(port) = val.parse() {
                self.bridge.port = port;
            }
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_MANAGEMENT_PORT") {
            if let Ok(port) = val.parse() {
                self.bridge.management_port = port;
            }
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_PIPELINE_INJECTION") {
            self.pipeline_injection = parse_flag(&val);
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_ISOLATE_UNLISTED_SERVERS") {
            self.global_playerlist.isolate_unlisted_servers = parse_flag(&val);
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_UPDATE_LATENCY") {
            self.global_playerlist.update_latency = parse_flag(&val);
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_QUIT_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                self.timing.quit_delay_ms = ms;
            }
        }
        if let Ok(val) = env::var("PRESENCE_SYNC_SWITCH_DELAY_MS") {
            if let Ok(ms) = val.parse() {
                self.timing.switch_delay_ms = ms;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bridge.port == 0 || self.bridge.management_port == 0 {
            anyhow::bail!("Bridge and management ports must be non-zero");
        }
        if self.bridge.port == self.bridge.management_port {
            anyhow::bail!("Bridge port and management port must be different");
        }
        if self.bridge.max_line_bytes < 1024 {
            anyhow::bail!("Max line bytes must be at least 1024");
        }

        if self.timing.quit_delay_ms > 5000 {
            anyhow::bail!("Quit delay must be at most 5000ms");
        }
        if self.timing.switch_delay_ms > 10000 {
            anyhow::bail!("Switch delay must be at most 10000ms");
        }
        if self.timing.switch_protection_ms < 100 || self.timing.switch_protection_ms > 60000 {
            anyhow::bail!("Switch protection must be between 100ms and 60000ms");
        }
        if self.timing.latency_refresh_ms < 50 || self.timing.latency_refresh_ms > 60000 {
            anyhow::bail!("Latency refresh interval must be between 50ms and 60000ms");
        }

        for name in self.global_playerlist.server_groups.keys() {
            if name.trim().is_empty() {
                anyhow::bail!("Server group names must not be empty");
            }
            if name.starts_with(ISOLATED_PREFIX) || name == DEFAULT_GROUP {
                anyhow::bail!("Server group name '{}' is reserved", name);
            }
        }

        // Overlapping groups are legal, the first group in name order wins
        let mut owners: HashMap<String, &str> = HashMap::new();
        for (group, servers) in &self.global_playerlist.server_groups {
            for server in servers {
                if let Some(first) = owners.get(&server.to_lowercase()) {
                    tracing::warn!(
                        server = %server,
                        group = %group,
                        kept = %first,
                        "Server listed in more than one group"
                    );
                } else {
                    owners.insert(server.to_lowercase(), group);
                }
            }
        }

        Ok(())
    }

    /// Socket address of the bridge listener
    pub fn bridge_address(&self) -> String {
        format!("{}:{}", self.bridge.bind_address, self.bridge.port)
    }

    /// Socket address of the management API
    pub fn management_address(&self) -> String {
        format!("{}:{}", self.bridge.bind_address, self.bridge.management_port)
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}
