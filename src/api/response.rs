//! API response types for consistent JSON responses

use serde::Serialize;
use uuid::Uuid;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful
    pub success: bool,
    /// Response message
    pub message: String,
    /// Response data (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful response with data
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Service health
#[derive(Debug, Serialize)]
pub struct HealthInfo {
    pub version: &'static str,
    pub loaded: bool,
    pub interception: bool,
    pub players: usize,
}

/// One group and its visible player count
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GroupOccupancy {
    pub name: String,
    pub placeholder: String,
    pub players: usize,
}

/// An online player as seen by the engine
#[derive(Debug, Serialize)]
pub struct PlayerSummary {
    pub id: Uuid,
    pub roster_id: Uuid,
    pub name: String,
    pub server: String,
    pub group: String,
    pub vanished: bool,
    pub ping: u32,
}
