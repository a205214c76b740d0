//! Error handling module
//!
//! Defines custom error types for the presence sync service.
//!
//! The reconciliation engine itself never returns errors: lookups degrade to
//! fallbacks. These types cover the edges around it (player registry, packet
//! gateway, bridge connections and startup).

use std::io;

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the presence sync service
#[derive(Error, Debug)]
pub enum SyncError {
    /// Packet gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Bridge connection errors
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Player registry errors
    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Packet gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The transport cannot hook into connections on this build
    #[error("Packet interception unavailable: {0}")]
    InterceptionUnavailable(String),

    #[error("No route to player {0}")]
    NoRoute(Uuid),

    #[error("Channel closed for player {0}")]
    ChannelClosed(Uuid),
}

/// Bridge protocol errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Player registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    #[error("Player already online: {0}")]
    AlreadyOnline(Uuid),

    #[error("Roster id already in use: {0}")]
    RosterIdInUse(Uuid),

    #[error("Player not found: {0}")]
    NotFound(Uuid),
}

/// Result type alias for presence sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
