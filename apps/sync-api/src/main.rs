use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sync_api::auth::verifier::JwtVerifier;
use sync_api::config::Config;
use sync_api::hub::registry::Hub;
use sync_api::hub::AllowAll;
use sync_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file; skip silently when env vars are set externally.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    let port = config.port;

    let verifier = Arc::new(JwtVerifier::new(&config.token_secret));

    let (hub, handle) = Hub::new(&config, Arc::new(AllowAll));
    tokio::spawn(hub.run());

    tracing::info!(
        mailbox_capacity = config.mailbox_capacity,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        ping_interval_secs = config.ping_interval.as_secs(),
        "sync-api configured"
    );

    let state = AppState {
        hub: handle.clone(),
        verifier,
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(sync_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "sync-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("server error");

    handle.shutdown();
}
