//! Management API
//!
//! Read-only HTTP endpoints for operators:
//! - Health and readiness
//! - Group occupancy (the values behind the group placeholders)
//! - Online players with their resolved group

pub mod error;
pub mod response;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::response::{ApiResponse, GroupOccupancy, HealthInfo, PlayerSummary};
use crate::error::PlayerError;
use crate::game::player::{Player, PlayerDirectory};
use crate::state::AppState;
use crate::sync::placeholders::group_placeholder;

/// API version prefix
pub const API_VERSION: &str = "v1";

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let health_routes = Router::new()
        .route("/", get(health_check))
        .route("/ready", get(readiness_check));

    let player_routes = Router::new()
        .route("/", get(list_players))
        .route("/:id", get(get_player));

    let api_routes = Router::new()
        .nest("/health", health_routes)
        .nest("/players", player_routes)
        .route("/groups", get(list_groups));

    Router::new()
        .nest(&format!("/api/{}", API_VERSION), api_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthInfo>> {
    Json(ApiResponse::success(
        "OK",
        HealthInfo {
            version: crate::VERSION,
            loaded: state.engine.is_loaded(),
            interception: state.engine.interception_active(),
            players: state.registry.count(),
        },
    ))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    if state.engine.is_loaded() {
        Ok("Ready")
    } else {
        Err(ApiError::NotReady)
    }
}

/// Occupancy of every tracked group
async fn list_groups(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<GroupOccupancy>>> {
    let groups: Vec<GroupOccupancy> = state
        .engine
        .tracked_groups()
        .into_iter()
        .map(|name| {
            let placeholder = group_placeholder(&name);
            let players = state.placeholders.value(&placeholder).unwrap_or(0);
            GroupOccupancy {
                name,
                placeholder,
                players,
            }
        })
        .collect();

    Json(ApiResponse::success(
        format!("{} groups", groups.len()),
        groups,
    ))
}

/// All online players, sorted by name
async fn list_players(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<PlayerSummary>>> {
    let mut players: Vec<PlayerSummary> = state
        .registry
        .online_players()
        .iter()
        .map(|player| summarize(&state, player))
        .collect();
    players.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    Json(ApiResponse::success(
        format!("{} players online", players.len()),
        players,
    ))
}

/// One online player
async fn get_player(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PlayerSummary>>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::InvalidInput(format!("Invalid player id '{}'", id)))?;
    let player = state.registry.get(id).ok_or(PlayerError::NotFound(id))?;

    Ok(Json(ApiResponse::success(
        "Player found",
        summarize(&state, &player),
    )))
}

fn summarize(state: &AppState, player: &Player) -> PlayerSummary {
    let server = player.server();
    PlayerSummary {
        id: player.id,
        roster_id: player.roster_id,
        name: player.name.clone(),
        group: state.engine.group_of(&server),
        server,
        vanished: player.is_vanished(),
        ping: player.ping(),
    }
}
