//! Connection/room registry and the hub command loop.
//!
//! All membership state lives in one tri-part index (live connections,
//! room → members, user → rooms) guarded by a single mutex, so the three
//! maps always change as one atomic unit. Structural lifecycle events and
//! broadcast requests are funneled through a bounded command channel into a
//! single event loop, giving them a total order even when issued from many
//! connection tasks at once. Join/leave and read-only queries take the lock
//! directly.
//!
//! Mailbox enqueues always happen after the lock is released: a stalled
//! connection can never hold up unrelated registry operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::config::Config;

use super::client::Client;
use super::envelope::{Envelope, RoomMember};
use super::policy::RoomPolicy;

/// A command processed by the hub's event loop.
enum Command {
    /// Admit a new connection and send its `connected` acknowledgement.
    Register { client: Arc<Client> },
    /// Remove a connection from the live set and any room it occupies.
    Unregister { client: Arc<Client> },
    /// Fan an envelope out to the members of a room.
    Broadcast {
        room_id: String,
        event: String,
        data: Value,
        exclude: Option<String>,
    },
}

/// Why a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRefused {
    /// The room policy denied this user access to the room.
    Forbidden,
    /// The connection is not in the live set. Registration flows through the
    /// dispatcher, so a join sent before the `connected` ack can land here;
    /// the client should retry once the ack arrives.
    NotRegistered,
}

/// Aggregate counters for the operator endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HubStats {
    pub connections: usize,
    pub rooms: usize,
}

#[derive(Default)]
struct RoomIndex {
    /// All live connections, by socket id.
    clients: HashMap<String, Arc<Client>>,
    /// Room key → member socket ids. A room exists iff it has members.
    rooms: HashMap<String, HashSet<String>>,
    /// User id → room keys that user currently occupies, across all of their
    /// connections.
    user_rooms: HashMap<i64, HashSet<String>>,
}

impl RoomIndex {
    /// Remove the client from its current room, if any. Returns the vacated
    /// room and the remaining members to notify. Emptied rooms are deleted.
    fn detach(&mut self, client: &Client) -> Option<(String, Vec<Arc<Client>>)> {
        let room_id = client.current_room()?;

        let mut remaining = Vec::new();
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(&client.id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            } else {
                remaining = members
                    .iter()
                    .filter_map(|id| self.clients.get(id).cloned())
                    .collect();
            }
        }

        // Another connection of the same user may still occupy the room.
        let user_still_present = self.rooms.get(&room_id).is_some_and(|members| {
            members
                .iter()
                .any(|id| self.clients.get(id).is_some_and(|c| c.user_id == client.user_id))
        });
        if !user_still_present {
            if let Some(rooms) = self.user_rooms.get_mut(&client.user_id) {
                rooms.remove(&room_id);
                if rooms.is_empty() {
                    self.user_rooms.remove(&client.user_id);
                }
            }
        }

        client.set_current_room(None);
        Some((room_id, remaining))
    }

    fn member_clients(&self, room_id: &str, exclude: Option<&str>) -> Vec<Arc<Client>> {
        let Some(members) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|id| exclude != Some(id.as_str()))
            .filter_map(|id| self.clients.get(id).cloned())
            .collect()
    }

    fn member_snapshot(&self, room_id: &str) -> Option<Vec<RoomMember>> {
        let members = self.rooms.get(room_id)?;
        Some(
            members
                .iter()
                .filter_map(|id| self.clients.get(id).map(|c| c.member_info()))
                .collect(),
        )
    }
}

struct HubShared {
    index: Mutex<RoomIndex>,
    policy: Arc<dyn RoomPolicy>,
}

impl HubShared {
    fn register(&self, client: Arc<Client>) {
        let ack = Envelope::connected(&client.id, client.user_id);
        {
            let mut index = self.index.lock();
            index.clients.insert(client.id.clone(), client.clone());
        }
        tracing::info!(
            socket_id = %client.id,
            user_id = client.user_id,
            "connection registered"
        );
        client.send(ack);
    }

    /// Idempotent: a second unregister for the same connection is a no-op.
    fn unregister(&self, client: &Arc<Client>) {
        let departed = {
            let mut index = self.index.lock();
            if index.clients.remove(&client.id).is_none() {
                return;
            }
            index.detach(client)
        };

        if let Some((room_id, remaining)) = departed {
            let notice = Envelope::user_left(&room_id, &client.member_info());
            for member in remaining {
                member.send(notice.clone());
            }
        }

        client.close();
        tracing::info!(
            socket_id = %client.id,
            user_id = client.user_id,
            "connection unregistered"
        );
    }

    fn join_room(&self, client: &Arc<Client>, room_id: &str) -> Result<(), JoinRefused> {
        if !self.policy.allows(client.user_id, room_id) {
            return Err(JoinRefused::Forbidden);
        }

        // Re-join of the current room: just re-acknowledge.
        if client.current_room().as_deref() == Some(room_id) {
            let users = self.room_members(room_id).unwrap_or_default();
            client.send(Envelope::room_joined(room_id, &users));
            return Ok(());
        }

        let (left, existing, snapshot) = {
            let mut index = self.index.lock();
            if !index.clients.contains_key(&client.id) {
                return Err(JoinRefused::NotRegistered);
            }

            // Switching rooms is leave-then-join, never a direct swap.
            let left = index.detach(client);

            let existing = index.member_clients(room_id, None);
            index
                .rooms
                .entry(room_id.to_string())
                .or_default()
                .insert(client.id.clone());
            index
                .user_rooms
                .entry(client.user_id)
                .or_default()
                .insert(room_id.to_string());
            client.set_current_room(Some(room_id.to_string()));

            let snapshot = index.member_snapshot(room_id).unwrap_or_default();
            (left, existing, snapshot)
        };

        if let Some((old_room, remaining)) = left {
            let notice = Envelope::user_left(&old_room, &client.member_info());
            for member in remaining {
                member.send(notice.clone());
            }
        }

        let joined = Envelope::user_joined(room_id, &client.member_info());
        for member in existing {
            member.send(joined.clone());
        }
        client.send(Envelope::room_joined(room_id, &snapshot));

        tracing::debug!(socket_id = %client.id, room_id, "joined room");
        Ok(())
    }

    /// No-op when the connection is not in a room.
    fn leave_room(&self, client: &Arc<Client>) {
        let departed = self.index.lock().detach(client);

        if let Some((room_id, remaining)) = departed {
            let notice = Envelope::user_left(&room_id, &client.member_info());
            for member in remaining {
                member.send(notice.clone());
            }
            tracing::debug!(socket_id = %client.id, room_id = %room_id, "left room");
        }
    }

    /// Snapshot the member set under the lock, enqueue outside it. Full or
    /// closed mailboxes are the per-connection backpressure policy's problem,
    /// not the broadcaster's.
    fn broadcast(&self, room_id: &str, event: String, data: Value, exclude: Option<&str>) {
        let recipients = self.index.lock().member_clients(room_id, exclude);
        if recipients.is_empty() {
            return;
        }
        let envelope = Envelope { event, data };
        for member in recipients {
            member.send(envelope.clone());
        }
    }

    fn room_members(&self, room_id: &str) -> Option<Vec<RoomMember>> {
        self.index.lock().member_snapshot(room_id)
    }

    fn stats(&self) -> HubStats {
        let index = self.index.lock();
        HubStats {
            connections: index.clients.len(),
            rooms: index.rooms.len(),
        }
    }

    /// Defensive cleanup in case an empty room ever survives a leave.
    fn reap_empty_rooms(&self) -> usize {
        let mut index = self.index.lock();
        let before = index.rooms.len();
        index.rooms.retain(|_, members| !members.is_empty());
        before - index.rooms.len()
    }

    /// Hard shutdown: drop all membership state and cancel every client,
    /// which deterministically terminates their outbound loops.
    fn close_all(&self) {
        let clients: Vec<Arc<Client>> = {
            let mut index = self.index.lock();
            index.rooms.clear();
            index.user_rooms.clear();
            index.clients.drain().map(|(_, c)| c).collect()
        };
        for client in clients {
            client.set_current_room(None);
            client.close();
        }
    }
}

/// The hub event loop. Spawn [`run`](Self::run) once at startup.
pub struct Hub {
    shared: Arc<HubShared>,
    cmd_rx: mpsc::Receiver<Command>,
    token: CancellationToken,
    reap_interval: Duration,
}

/// Cloneable handle through which endpoints, connection tasks, and operator
/// routes talk to the hub.
#[derive(Clone)]
pub struct HubHandle {
    shared: Arc<HubShared>,
    cmd_tx: mpsc::Sender<Command>,
    token: CancellationToken,
}

impl Hub {
    pub fn new(config: &Config, policy: Arc<dyn RoomPolicy>) -> (Self, HubHandle) {
        let shared = Arc::new(HubShared {
            index: Mutex::new(RoomIndex::default()),
            policy,
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(config.dispatch_capacity);
        let token = CancellationToken::new();

        let handle = HubHandle {
            shared: shared.clone(),
            cmd_tx,
            token: token.clone(),
        };

        (
            Self {
                shared,
                cmd_rx,
                token,
                reap_interval: config.reap_interval,
            },
            handle,
        )
    }

    pub async fn run(mut self) {
        let mut reaper = time::interval(self.reap_interval);
        reaper.tick().await; // First tick fires immediately; skip it.

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.process(cmd),
                        None => break,
                    }
                }

                _ = reaper.tick() => {
                    let removed = self.shared.reap_empty_rooms();
                    if removed > 0 {
                        tracing::debug!(removed, "reaped empty rooms");
                    }
                }
            }
        }

        self.shared.close_all();
        tracing::info!("hub stopped");
    }

    fn process(&self, cmd: Command) {
        match cmd {
            Command::Register { client } => self.shared.register(client),
            Command::Unregister { client } => self.shared.unregister(&client),
            Command::Broadcast {
                room_id,
                event,
                data,
                exclude,
            } => self
                .shared
                .broadcast(&room_id, event, data, exclude.as_deref()),
        }
    }
}

impl HubHandle {
    /// Admit a connection. Awaits dispatcher capacity so registration is
    /// never dropped; a send error only occurs after shutdown.
    pub async fn register(&self, client: Arc<Client>) {
        if self.cmd_tx.send(Command::Register { client }).await.is_err() {
            tracing::debug!("hub is stopped; registration refused");
        }
    }

    pub async fn unregister(&self, client: Arc<Client>) {
        if self
            .cmd_tx
            .send(Command::Unregister { client })
            .await
            .is_err()
        {
            tracing::debug!("hub is stopped; unregister skipped");
        }
    }

    /// Best-effort fan-out. A full dispatch queue drops the broadcast with a
    /// warning rather than blocking the producer.
    pub fn broadcast(&self, room_id: String, event: String, data: Value, exclude: Option<String>) {
        let cmd = Command::Broadcast {
            room_id,
            event,
            data,
            exclude,
        };
        match self.cmd_tx.try_send(cmd) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("hub dispatch queue full, dropping broadcast");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("hub is stopped; broadcast dropped");
            }
        }
    }

    pub fn join_room(&self, client: &Arc<Client>, room_id: &str) -> Result<(), JoinRefused> {
        self.shared.join_room(client, room_id)
    }

    pub fn leave_room(&self, client: &Arc<Client>) {
        self.shared.leave_room(client)
    }

    pub fn room_members(&self, room_id: &str) -> Option<Vec<RoomMember>> {
        self.shared.room_members(room_id)
    }

    pub fn stats(&self) -> HubStats {
        self.shared.stats()
    }

    /// Stop the event loop and close every live connection's mailbox.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}
