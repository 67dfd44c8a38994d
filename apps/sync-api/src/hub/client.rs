//! Per-connection state: identity, outbound mailbox, teardown token.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::envelope::{Envelope, RoomMember};

/// Server-side handle for one physical WebSocket connection.
///
/// The mailbox sender is shared with the registry; the matching receiver is
/// owned exclusively by the connection's write loop, which is the only writer
/// to the socket. Cancelling the token tears both loops down.
pub struct Client {
    /// Generated connection id (`sock_`-prefixed ULID).
    pub id: String,
    /// Authenticated user identity.
    pub user_id: i64,
    tx: mpsc::Sender<Envelope>,
    token: CancellationToken,
    current_room: Mutex<Option<String>>,
}

impl Client {
    pub fn new(user_id: i64, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id: scribe_common::id::prefixed_ulid(scribe_common::id::prefix::SOCKET),
            user_id,
            tx,
            token: CancellationToken::new(),
            current_room: Mutex::new(None),
        }
    }

    /// Non-blocking enqueue onto the outbound mailbox.
    ///
    /// A full mailbox means the peer is not draining fast enough; the
    /// connection is dropped rather than allowed to stall broadcasters. A
    /// closed mailbox means teardown already started and the message is
    /// silently discarded.
    pub fn send(&self, envelope: Envelope) {
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    socket_id = %self.id,
                    user_id = self.user_id,
                    "outbound mailbox full, dropping connection"
                );
                self.close();
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Begin teardown. Idempotent; both I/O loops watch this token.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The room this connection currently occupies, if any.
    pub fn current_room(&self) -> Option<String> {
        self.current_room.lock().clone()
    }

    /// Set by the registry while holding its own index lock, so the pointer
    /// stays consistent with the room and user indices.
    pub(super) fn set_current_room(&self, room: Option<String>) {
        *self.current_room.lock() = room;
    }

    pub fn member_info(&self) -> RoomMember {
        RoomMember {
            user_id: self.user_id,
            socket_id: self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_enqueues_until_capacity() {
        let (tx, mut rx) = mpsc::channel(2);
        let client = Client::new(1, tx);

        client.send(Envelope::error("X", "one"));
        client.send(Envelope::error("X", "two"));
        assert!(!client.is_closed());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn full_mailbox_closes_the_connection() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client::new(1, tx);

        client.send(Envelope::error("X", "one"));
        assert!(!client.is_closed());

        // Second send overflows the mailbox and triggers teardown.
        client.send(Envelope::error("X", "two"));
        assert!(client.is_closed());
    }

    #[test]
    fn send_after_receiver_dropped_is_a_no_op() {
        let (tx, rx) = mpsc::channel(1);
        let client = Client::new(1, tx);
        drop(rx);

        client.send(Envelope::error("X", "one"));
        // Closed mailbox is teardown-in-progress, not backpressure.
        assert!(!client.is_closed());
    }

    #[test]
    fn ids_are_socket_prefixed_and_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let a = Client::new(1, tx.clone());
        let b = Client::new(1, tx);
        assert!(a.id.starts_with("sock_"));
        assert_ne!(a.id, b.id);
    }
}
