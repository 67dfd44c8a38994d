pub mod admin;
pub mod health;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::hub::server::router())
        .nest("/api/v1", admin::router())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Admin
        admin::get_stats,
        admin::get_room_members,
        admin::broadcast_to_room,
    ),
    components(schemas(
        crate::error::ApiErrorBody,
        crate::error::ApiErrorDetail,
        crate::hub::envelope::RoomMember,
        crate::hub::registry::HubStats,
        admin::RoomMembersResponse,
        admin::BroadcastRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Admin", description = "Operator endpoints"),
    )
)]
pub struct ApiDoc;
