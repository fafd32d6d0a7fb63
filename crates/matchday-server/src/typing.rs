//! Typing indicators with an expiry.
//!
//! A client that stops sending `typing` frames (closed tab, lost network)
//! would otherwise leave its peer looking at "typing..." forever, so every
//! indicator carries a deadline and a sweeper clears the stale ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use matchday_shared::protocol::{ServerEvent, TypingNotice};
use matchday_shared::{ConnectionId, ParticipantId, RoomId};

use crate::delivery::LiveTransport;

struct TypingEntry {
    display_name: String,
    origin: Option<ConnectionId>,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct TypingTracker {
    active: Arc<Mutex<HashMap<(RoomId, ParticipantId), TypingEntry>>>,
    transport: Arc<dyn LiveTransport>,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(transport: Arc<dyn LiveTransport>, ttl: Duration) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            transport,
            ttl,
        }
    }

    /// Forward a typing state change to the rest of the room.
    pub async fn set_typing(
        &self,
        room: RoomId,
        participant: ParticipantId,
        display_name: String,
        is_typing: bool,
        origin: Option<ConnectionId>,
    ) -> usize {
        let key = (room.clone(), participant);
        {
            let mut active = self.active.lock().await;
            if is_typing {
                active.insert(
                    key,
                    TypingEntry {
                        display_name: display_name.clone(),
                        origin,
                        expires_at: Instant::now() + self.ttl,
                    },
                );
            } else {
                active.remove(&key);
            }
        }

        let notice = ServerEvent::UserTyping(TypingNotice {
            room_id: room.clone(),
            is_typing,
            display_name,
        });
        self.transport.publish(room, notice, origin).await
    }

    /// Clear every indicator past its deadline, telling the room it stopped.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    async fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<(RoomId, TypingEntry)> = {
            let mut active = self.active.lock().await;
            let keys: Vec<(RoomId, ParticipantId)> = active
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| active.remove(&key).map(|entry| (key.0, entry)))
                .collect()
        };

        let cleared = expired.len();
        for (room, entry) in expired {
            debug!(room = %room, name = %entry.display_name, "Typing indicator expired");
            let notice = ServerEvent::UserTyping(TypingNotice {
                room_id: room.clone(),
                is_typing: false,
                display_name: entry.display_name,
            });
            self.transport.publish(room, notice, entry.origin).await;
        }
        cleared
    }

    /// Drop every indicator that came from a closed connection, announcing the stop.
    pub async fn clear_connection(&self, connection: ConnectionId) -> usize {
        let gone: Vec<(RoomId, TypingEntry)> = {
            let mut active = self.active.lock().await;
            let keys: Vec<(RoomId, ParticipantId)> = active
                .iter()
                .filter(|(_, entry)| entry.origin == Some(connection))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| active.remove(&key).map(|entry| (key.0, entry)))
                .collect()
        };

        let cleared = gone.len();
        for (room, entry) in gone {
            let notice = ServerEvent::UserTyping(TypingNotice {
                room_id: room.clone(),
                is_typing: false,
                display_name: entry.display_name,
            });
            self.transport.publish(room, notice, Some(connection)).await;
        }
        cleared
    }

    #[cfg(test)]
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
