//! Presence Sync Library
//!
//! Keeps player lists consistent across the backend servers behind a proxy:
//! who sees whom is derived from server groups, spy servers and vanish state,
//! and every client receives the add/remove/update packets that bring its
//! list in line.
//!
//! ## Modules
//!
//! - `api` - Management HTTP API
//! - `config` - Service configuration management
//! - `error` - Error types and result definitions
//! - `game` - Online players and the player registry
//! - `net` - Packet gateway and proxy event bridge
//! - `protocol` - Presence packet model
//! - `scheduler` - Deferred task execution
//! - `sync` - Visibility policy and the reconciliation engine

pub mod api;
pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod sync;

// Re-export commonly used types
pub use config::PresenceConfig;
pub use error::{Result, SyncError};
pub use state::AppState;
pub use sync::engine::PresenceEngine;

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
