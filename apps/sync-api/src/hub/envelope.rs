//! The `{event, data}` wire envelope and reserved event names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Inbound control events. Everything else is an opaque application payload.
pub mod inbound {
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
}

/// Outbound events emitted by the hub itself.
pub mod outbound {
    pub const CONNECTED: &str = "connected";
    pub const ROOM_JOINED: &str = "room_joined";
    pub const USER_JOINED: &str = "user_joined";
    pub const USER_LEFT: &str = "user_left";
    pub const ERROR: &str = "error";
}

/// Error codes carried in `error` envelopes.
pub mod code {
    pub const INVALID_JSON: &str = "INVALID_JSON";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
    pub const NOT_REGISTERED: &str = "NOT_REGISTERED";
    pub const ROOM_FORBIDDEN: &str = "ROOM_FORBIDDEN";
}

/// True for event names the hub reserves for its own outbound notifications.
/// Clients cannot relay these.
pub fn is_reserved_outbound(event: &str) -> bool {
    matches!(
        event,
        outbound::CONNECTED
            | outbound::ROOM_JOINED
            | outbound::USER_JOINED
            | outbound::USER_LEFT
            | outbound::ERROR
    )
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One JSON object per WebSocket text frame, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Identity of one room member, as exposed on the wire and to operators.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomMember {
    pub user_id: i64,
    pub socket_id: String,
}

/// Payload of the inbound `join_room` event.
#[derive(Debug, Deserialize)]
pub struct JoinRoomPayload {
    #[serde(default)]
    pub room_id: String,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Envelope {
    /// Registration acknowledgement carrying the assigned connection id.
    pub fn connected(socket_id: &str, user_id: i64) -> Self {
        Self {
            event: outbound::CONNECTED.to_string(),
            data: serde_json::json!({
                "socket_id": socket_id,
                "user_id": user_id,
                "timestamp": now_ms(),
            }),
        }
    }

    /// Join acknowledgement with a snapshot of the current member list.
    pub fn room_joined(room_id: &str, users: &[RoomMember]) -> Self {
        Self {
            event: outbound::ROOM_JOINED.to_string(),
            data: serde_json::json!({
                "room_id": room_id,
                "users": users,
                "timestamp": now_ms(),
            }),
        }
    }

    pub fn user_joined(room_id: &str, member: &RoomMember) -> Self {
        Self {
            event: outbound::USER_JOINED.to_string(),
            data: serde_json::json!({
                "user_id": member.user_id,
                "socket_id": member.socket_id,
                "room_id": room_id,
                "timestamp": now_ms(),
            }),
        }
    }

    pub fn user_left(room_id: &str, member: &RoomMember) -> Self {
        Self {
            event: outbound::USER_LEFT.to_string(),
            data: serde_json::json!({
                "user_id": member.user_id,
                "socket_id": member.socket_id,
                "room_id": room_id,
                "timestamp": now_ms(),
            }),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            event: outbound::ERROR.to_string(),
            data: serde_json::json!({
                "code": code,
                "message": message,
                "timestamp": now_ms(),
            }),
        }
    }
}

/// Wrap an opaque client payload with sender metadata before relaying it to
/// the rest of the room. The payload itself is never interpreted.
pub fn with_sender_metadata(member: &RoomMember, payload: Value) -> Value {
    serde_json::json!({
        "user_id": member.user_id,
        "socket_id": member.socket_id,
        "timestamp": now_ms(),
        "payload": payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_with_opaque_data() {
        let raw = r#"{"event":"cursor_move","data":{"line":3,"col":17}}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.event, "cursor_move");
        assert_eq!(envelope.data["line"], 3);
    }

    #[test]
    fn data_defaults_to_null_when_missing() {
        let envelope: Envelope = serde_json::from_str(r#"{"event":"leave_room"}"#).unwrap();
        assert_eq!(envelope.event, "leave_room");
        assert!(envelope.data.is_null());
    }

    #[test]
    fn reserved_outbound_names_are_recognized() {
        assert!(is_reserved_outbound("connected"));
        assert!(is_reserved_outbound("user_left"));
        assert!(!is_reserved_outbound("join_room"));
        assert!(!is_reserved_outbound("edit"));
    }

    #[test]
    fn sender_metadata_preserves_payload() {
        let member = RoomMember {
            user_id: 7,
            socket_id: "sock_A".to_string(),
        };
        let wrapped = with_sender_metadata(&member, serde_json::json!({"op": "insert"}));
        assert_eq!(wrapped["user_id"], 7);
        assert_eq!(wrapped["socket_id"], "sock_A");
        assert_eq!(wrapped["payload"]["op"], "insert");
        assert!(wrapped["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        let envelope = Envelope::error(code::NOT_IN_ROOM, "Join a room first");
        assert_eq!(envelope.event, "error");
        assert_eq!(envelope.data["code"], "NOT_IN_ROOM");
        assert_eq!(envelope.data["message"], "Join a room first");
    }
}
