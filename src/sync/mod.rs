//! Presence synchronization
//!
//! Everything that decides who appears in whose player list:
//! - Server groups and spy servers
//! - The visibility policy
//! - Packet construction
//! - The reconciliation engine and its background tasks

pub mod engine;
pub mod groups;
pub mod latency;
pub mod packets;
pub mod placeholders;
pub mod switches;
pub mod visibility;

pub use engine::{Collaborators, EngineOptions, PresenceEngine};
pub use groups::{ServerGroup, ServerGroupRegistry, DEFAULT_GROUP, ISOLATED_PREFIX};
pub use latency::LatencyRefresher;
pub use packets::{DisplayNameFormatter, PacketFactory};
pub use placeholders::{group_placeholder, PlaceholderBoard, PlaceholderRegistry};
pub use visibility::VisibilityPolicy;
