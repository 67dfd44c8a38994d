//! Bearer-token extraction for the operator endpoints.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::AppState;

/// Authenticated operator identity, resolved through the configured
/// [`TokenVerifier`](crate::auth::verifier::TokenVerifier).
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

        let user_id = state.verifier.verify(token).await.map_err(|reason| {
            tracing::debug!(%reason, "operator credential rejected");
            ApiError::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthUser { user_id })
    }
}
