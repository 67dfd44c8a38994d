use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

use sync_api::auth::verifier::JwtVerifier;
use sync_api::config::Config;
use sync_api::hub::registry::Hub;
use sync_api::hub::AllowAll;
use sync_api::AppState;

pub const TEST_SECRET: &str = "sync-api-test-secret";

/// Config with small queues and a ping interval that stays out of the way of
/// short-lived test connections.
pub fn test_config() -> Config {
    Config {
        port: 0,
        token_secret: TEST_SECRET.to_string(),
        max_frame_bytes: 65_536,
        write_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(30),
        ping_interval: Duration::from_secs(20),
        mailbox_capacity: 64,
        dispatch_capacity: 256,
        reap_interval: Duration::from_secs(30),
    }
}

/// Start an actual TCP server for WebSocket testing with the default test
/// config. Returns (addr, state); the server and the hub loop run in the
/// background.
pub async fn start_server() -> (SocketAddr, AppState) {
    start_server_with(test_config()).await
}

/// Same, with the caller's config (for deadline and frame-size scenarios).
pub async fn start_server_with(config: Config) -> (SocketAddr, AppState) {
    let config = Arc::new(config);
    let verifier = Arc::new(JwtVerifier::new(TEST_SECRET));

    let (hub, handle) = Hub::new(&config, Arc::new(AllowAll));
    tokio::spawn(hub.run());

    let state = AppState {
        hub: handle,
        verifier,
        config,
    };

    let app = sync_api::routes::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

#[derive(Serialize)]
struct TestClaims {
    sub: String,
    exp: i64,
}

/// Mint a token the default HS256 verifier accepts.
pub fn mint_token(user_id: i64) -> String {
    let claims = TestClaims {
        sub: user_id.to_string(),
        exp: chrono::Utc::now().timestamp() + 300,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}
