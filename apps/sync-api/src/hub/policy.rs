//! Optional room-authorization capability.
//!
//! Callers are assumed to be authorized before a join request reaches the
//! hub, so the default policy allows everything. A deployment that wants the
//! hub to double-check can wire in its own implementation.

pub trait RoomPolicy: Send + Sync {
    fn allows(&self, user_id: i64, room_id: &str) -> bool;
}

/// The no-op default.
pub struct AllowAll;

impl RoomPolicy for AllowAll {
    fn allows(&self, _user_id: i64, _room_id: &str) -> bool {
        true
    }
}
