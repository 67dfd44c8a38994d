//! Operator-facing endpoints: aggregate stats, room membership, and
//! server-side broadcast into a room.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::hub::envelope::RoomMember;
use crate::hub::registry::HubStats;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(get_stats))
        .route("/admin/rooms/{room_id}/members", get(get_room_members))
        .route("/admin/rooms/{room_id}/broadcast", post(broadcast_to_room))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoomMembersResponse {
    pub room_id: String,
    pub users: Vec<RoomMember>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

// ---------------------------------------------------------------------------
// GET /api/v1/admin/stats
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    tag = "Admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Aggregate counters", body = HubStats),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn get_stats(
    AuthUser { user_id: _ }: AuthUser,
    State(state): State<AppState>,
) -> Json<HubStats> {
    Json(state.hub.stats())
}

// ---------------------------------------------------------------------------
// GET /api/v1/admin/rooms/:room_id/members
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/admin/rooms/{room_id}/members",
    tag = "Admin",
    security(("bearer" = [])),
    params(("room_id" = String, Path, description = "Room key")),
    responses(
        (status = 200, description = "Current members", body = RoomMembersResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Room not found", body = ApiErrorBody),
    ),
)]
pub async fn get_room_members(
    AuthUser { user_id: _ }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomMembersResponse>, ApiError> {
    let users = state
        .hub
        .room_members(&room_id)
        .ok_or_else(|| ApiError::not_found("Room not found"))?;

    Ok(Json(RoomMembersResponse { room_id, users }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/admin/rooms/:room_id/broadcast
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/admin/rooms/{room_id}/broadcast",
    tag = "Admin",
    security(("bearer" = [])),
    params(("room_id" = String, Path, description = "Room key")),
    request_body = BroadcastRequest,
    responses(
        (status = 202, description = "Broadcast queued"),
        (status = 400, description = "Invalid request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn broadcast_to_room(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<BroadcastRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if request.event.trim().is_empty() {
        return Err(ApiError::bad_request("event must not be empty"));
    }

    tracing::info!(user_id, %room_id, event = %request.event, "operator broadcast");
    state
        .hub
        .broadcast(room_id, request.event, request.data, None);

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "queued" })),
    ))
}
