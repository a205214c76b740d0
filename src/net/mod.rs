//! Networking module
//!
//! - Packet gateway between the engine and player connections
//! - JSON-lines event bridge used by proxies

pub mod bridge;
pub mod gateway;
