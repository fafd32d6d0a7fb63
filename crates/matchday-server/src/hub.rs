//! Presence / channel hub: live connections, room membership and fan-out.
//!
//! Each connection gets a bounded outbound queue drained by its own socket
//! writer task. Broadcasting only ever `try_send`s into those queues, so a
//! slow or stuck receiver loses events instead of stalling the sender.
//!
//! All state sits behind a single `RwLock`: join/leave/disconnect take the
//! write lock and broadcasts the read lock, so a broadcast never observes a
//! half-applied membership change.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use matchday_shared::protocol::ServerEvent;
use matchday_shared::{ConnectionId, ParticipantId, RoomId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("participant {participant} is not a member of room {room}")]
    NotAParticipant {
        participant: ParticipantId,
        room: RoomId,
    },

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

struct LiveConnection {
    participant: ParticipantId,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, LiveConnection>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

#[derive(Clone)]
pub struct ChannelHub {
    state: Arc<RwLock<HubState>>,
    queue_capacity: usize,
}

impl ChannelHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(HubState::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new live connection for an authenticated participant.
    /// Returns its id and the queue its writer task drains.
    pub async fn connect(&self, participant: ParticipantId) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let connection_id = ConnectionId::new();

        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id,
            LiveConnection {
                participant,
                tx,
                rooms: HashSet::new(),
            },
        );

        info!(
            connection = %connection_id,
            participant = %participant,
            connections = state.connections.len(),
            "Live connection opened"
        );

        (connection_id, rx)
    }

    /// Add the connection to a room. Idempotent; returns `true` if membership changed.
    ///
    /// Only the two participants encoded in the room id may join it.
    pub async fn join(&self, connection_id: ConnectionId, room: &RoomId) -> Result<bool, HubError> {
        let mut state = self.state.write().await;

        let connection = state
            .connections
            .get_mut(&connection_id)
            .ok_or(HubError::UnknownConnection(connection_id))?;
        authorize(connection.participant, room)?;

        if !connection.rooms.insert(room.clone()) {
            return Ok(false);
        }
        let members = state.rooms.entry(room.clone()).or_default();
        members.insert(connection_id);

        debug!(
            room = %room,
            connection = %connection_id,
            members = members.len(),
            "Connection joined room"
        );
        Ok(true)
    }

    /// Remove the connection from a room. Idempotent; returns `true` if membership changed.
    pub async fn leave(&self, connection_id: ConnectionId, room: &RoomId) -> Result<bool, HubError> {
        let mut state = self.state.write().await;

        let connection = state
            .connections
            .get_mut(&connection_id)
            .ok_or(HubError::UnknownConnection(connection_id))?;
        authorize(connection.participant, room)?;

        if !connection.rooms.remove(room) {
            return Ok(false);
        }
        remove_member(&mut state.rooms, room, connection_id);

        debug!(room = %room, connection = %connection_id, "Connection left room");
        Ok(true)
    }

    /// Deliver an event to every live member of a room except `exclude`.
    ///
    /// Fire-and-forget: returns how many queues accepted the event. An empty
    /// room, a full queue or a closed connection all just mean fewer deliveries.
    pub async fn broadcast_to_room(
        &self,
        room: &RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let state = self.state.read().await;

        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for connection_id in members {
            if Some(*connection_id) == exclude {
                continue;
            }
            let Some(connection) = state.connections.get(connection_id) else {
                continue;
            };

            match connection.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(
                        room = %room,
                        target = %connection_id,
                        event = event.name(),
                        "Dropping event for slow connection"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        delivered
    }

    /// Queue an event for one connection only (acks, protocol errors).
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let state = self.state.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|c| c.tx.try_send(event).is_ok())
            .unwrap_or(false)
    }

    /// Drop a connection and all of its memberships. Nobody is notified.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        let mut state = self.state.write().await;

        let Some(connection) = state.connections.remove(&connection_id) else {
            return Vec::new();
        };

        let rooms: Vec<RoomId> = connection.rooms.into_iter().collect();
        for room in &rooms {
            remove_member(&mut state.rooms, room, connection_id);
        }

        info!(
            connection = %connection_id,
            participant = %connection.participant,
            rooms = rooms.len(),
            connections = state.connections.len(),
            "Live connection closed"
        );

        rooms
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    #[cfg(test)]
    pub async fn room_member_count(&self, room: &RoomId) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn list_rooms(&self) -> Vec<RoomId> {
        self.state.read().await.rooms.keys().cloned().collect()
    }
}

fn authorize(participant: ParticipantId, room: &RoomId) -> Result<(), HubError> {
    if room.involves(participant) {
        Ok(())
    } else {
        Err(HubError::NotAParticipant {
            participant,
            room: room.clone(),
        })
    }
}

/// Remove a member and forget the room once nobody is left in it.
fn remove_member(
    rooms: &mut HashMap<RoomId, HashSet<ConnectionId>>,
    room: &RoomId,
    connection_id: ConnectionId,
) {
    if let Some(members) = rooms.get_mut(room) {
        members.remove(&connection_id);
        if members.is_empty() {
            rooms.remove(room);
            debug!(room = %room, "Removed empty room");
        }
    }
}
