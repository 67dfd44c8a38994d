pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod routes;

use std::sync::Arc;

use auth::verifier::TokenVerifier;
use config::Config;
use hub::registry::HubHandle;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Arc<Config>,
}
