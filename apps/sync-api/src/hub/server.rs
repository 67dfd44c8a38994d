//! WebSocket upgrade handler and the per-connection read/write loops.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time;

use crate::config::Config;
use crate::error::ApiError;
use crate::AppState;

use super::client::Client;
use super::envelope::{self, code, inbound, Envelope, JoinRoomPayload};
use super::registry::JoinRefused;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    #[serde(default)]
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let Some(credential) = extract_credential(&query, &headers) else {
        return ApiError::unauthorized("Missing credential").into_response();
    };

    let user_id = match state.verifier.verify(&credential).await {
        Ok(id) => id,
        Err(reason) => {
            tracing::debug!(%reason, "gateway credential rejected");
            return ApiError::unauthorized("Invalid credential").into_response();
        }
    };

    ws.max_message_size(state.config.max_frame_bytes)
        .max_frame_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, user_id))
        .into_response()
}

/// Credential lookup order: query parameter, bearer header, cookie.
fn extract_credential(query: &GatewayQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(str::trim)
                .find_map(|c| c.strip_prefix("token="))
        })
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn handle_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(state.config.mailbox_capacity);
    let client = Arc::new(Client::new(user_id, mailbox_tx));

    state.hub.register(client.clone()).await;

    tracing::info!(socket_id = %client.id, user_id, "connection established");

    let (ws_tx, ws_rx) = socket.split();
    let write_task = tokio::spawn(write_loop(
        ws_tx,
        mailbox_rx,
        client.clone(),
        state.config.clone(),
    ));

    read_loop(ws_rx, &client, &state).await;

    // Whatever ended the read loop, the connection is gone: cancel the write
    // loop and remove the client from every room it occupied.
    client.close();
    state.hub.unregister(client.clone()).await;
    let _ = write_task.await;

    tracing::info!(socket_id = %client.id, user_id, "connection closed");
}

/// Inbound loop: one frame at a time under an idle-read deadline that resets
/// on every received frame, pongs included.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, client: &Arc<Client>, state: &AppState) {
    let token = client.token();

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = time::timeout(state.config.idle_timeout, ws_rx.next()) => received,
        };

        let msg = match received {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!(socket_id = %client.id, ?e, "ws read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(socket_id = %client.id, "idle timeout, closing connection");
                break;
            }
        };

        match msg {
            Message::Text(text) => handle_frame(&text, client, state),
            // axum answers pings itself; both frames count as activity.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                tracing::debug!(socket_id = %client.id, "ignoring binary frame");
            }
        }
    }
}

fn handle_frame(text: &str, client: &Arc<Client>, state: &AppState) {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        client.send(Envelope::error(
            code::INVALID_JSON,
            "Frame is not a valid {event, data} envelope",
        ));
        return;
    };

    match envelope.event.as_str() {
        inbound::JOIN_ROOM => {
            let room_id = serde_json::from_value::<JoinRoomPayload>(envelope.data)
                .map(|p| p.room_id)
                .unwrap_or_default();
            if room_id.trim().is_empty() {
                client.send(Envelope::error(
                    code::INVALID_PAYLOAD,
                    "join_room requires a non-empty room_id",
                ));
                return;
            }

            // The registry handles room switching as leave-then-join.
            if let Err(refusal) = state.hub.join_room(client, &room_id) {
                let envelope = match refusal {
                    JoinRefused::Forbidden => {
                        Envelope::error(code::ROOM_FORBIDDEN, "Not allowed to join this room")
                    }
                    JoinRefused::NotRegistered => Envelope::error(
                        code::NOT_REGISTERED,
                        "Connection is not registered; retry after the connected ack",
                    ),
                };
                client.send(envelope);
            }
        }

        inbound::LEAVE_ROOM => {
            state.hub.leave_room(client);
        }

        name if envelope::is_reserved_outbound(name) => {
            tracing::debug!(
                socket_id = %client.id,
                event = name,
                "ignoring reserved event from client"
            );
        }

        // Everything else is an opaque collaboration payload, relayed to the
        // rest of the sender's current room.
        _ => {
            let Some(room_id) = client.current_room() else {
                client.send(Envelope::error(
                    code::NOT_IN_ROOM,
                    "Join a room before sending events",
                ));
                return;
            };

            let data = envelope::with_sender_metadata(&client.member_info(), envelope.data);
            state
                .hub
                .broadcast(room_id, envelope.event, data, Some(client.id.clone()));
        }
    }
}

/// Outbound loop: the only writer to the socket. Drains already-queued
/// envelopes into a single flush, and owns the keepalive ping timer.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut mailbox: mpsc::Receiver<Envelope>,
    client: Arc<Client>,
    config: Arc<Config>,
) {
    let token = client.token();
    let mut ping = time::interval(config.ping_interval);
    ping.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            _ = ping.tick() => {
                let ping_frame = async {
                    ws_tx.send(Message::Ping(Bytes::new())).await
                };
                match time::timeout(config.write_timeout, ping_frame).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(socket_id = %client.id, ?e, "ping write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(socket_id = %client.id, "write deadline exceeded");
                        break;
                    }
                }
            }

            received = mailbox.recv() => {
                let Some(envelope) = received else { break };
                if flush_batch(&mut ws_tx, &mut mailbox, envelope, &config, &client).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    // Ensure the read loop unwinds too.
    client.close();
}

/// Write the envelope plus anything else already queued, in one flush.
async fn flush_batch(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    mailbox: &mut mpsc::Receiver<Envelope>,
    first: Envelope,
    config: &Config,
    client: &Client,
) -> Result<(), ()> {
    let write = async {
        let json = serde_json::to_string(&first).map_err(axum::Error::new)?;
        ws_tx.feed(Message::Text(json.into())).await?;

        while let Ok(next) = mailbox.try_recv() {
            let json = serde_json::to_string(&next).map_err(axum::Error::new)?;
            ws_tx.feed(Message::Text(json.into())).await?;
        }

        ws_tx.flush().await
    };

    match time::timeout(config.write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::debug!(socket_id = %client.id, ?e, "ws write error");
            Err(())
        }
        Err(_) => {
            tracing::debug!(socket_id = %client.id, "write deadline exceeded");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: axum::http::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    #[test]
    fn query_parameter_wins_over_header() {
        let query = GatewayQuery {
            token: Some("from-query".to_string()),
        };
        let headers = headers_with(AUTHORIZATION, "Bearer from-header");
        assert_eq!(
            extract_credential(&query, &headers).as_deref(),
            Some("from-query")
        );
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let query = GatewayQuery { token: None };
        let mut headers = headers_with(AUTHORIZATION, "Bearer from-header");
        headers.insert(COOKIE, "token=from-cookie".parse().unwrap());
        assert_eq!(
            extract_credential(&query, &headers).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn cookie_is_used_as_last_resort() {
        let query = GatewayQuery { token: None };
        let headers = headers_with(COOKIE, "theme=dark; token=from-cookie; lang=en");
        assert_eq!(
            extract_credential(&query, &headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn missing_credential_yields_none() {
        let query = GatewayQuery { token: None };
        assert!(extract_credential(&query, &HeaderMap::new()).is_none());
    }

    #[test]
    fn empty_query_token_is_ignored() {
        let query = GatewayQuery {
            token: Some(String::new()),
        };
        let headers = headers_with(COOKIE, "token=fallback");
        assert_eq!(
            extract_credential(&query, &headers).as_deref(),
            Some("fallback")
        );
    }
}
