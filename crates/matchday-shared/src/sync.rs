//! Client-side reconciliation of live events with polled history.
//!
//! Live arrival order is not canonical: two participants sending at the same
//! time can see each other's messages in either order, and a poll response
//! may overtake an older one in flight. Clients therefore merge everything
//! into a [`ConversationTimeline`] keyed by message id and ordered by the
//! server timestamp, and track live-channel health with a [`ChannelState`]
//! that falls back to polling and re-joins rooms after a reconnect.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::{RECONNECT_BASE_MS, RECONNECT_MAX_MS};
use crate::protocol::{ClientEvent, MessageView};
use crate::types::{ParticipantId, RoomId};

/// Result of applying a polled snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied { added: usize },
    /// Older than a snapshot already applied; ignored.
    Stale,
}

/// Ordered, de-duplicated view of one conversation.
#[derive(Debug, Default, Clone)]
pub struct ConversationTimeline {
    messages: Vec<MessageView>,
    ids: HashSet<Uuid>,
    snapshot_high_water: Option<DateTime<Utc>>,
}

impl ConversationTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Newest server timestamp seen, suitable as the `since` cursor of the next poll.
    /// The cursor is inclusive, so the next page repeats messages at this
    /// timestamp; they are dropped by id on merge.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.timestamp)
    }

    /// Merge a message pushed over the live channel. Returns `true` if it was new.
    pub fn apply_live(&mut self, message: MessageView) -> bool {
        let added = self.merge_one(message);
        if added {
            self.sort();
        }
        added
    }

    /// Merge a polled snapshot (full history or a `since` page).
    ///
    /// A snapshot whose newest message is older than the newest message of a
    /// previously applied snapshot is stale and is dropped whole, whatever
    /// order the responses completed in.
    pub fn apply_snapshot(&mut self, snapshot: Vec<MessageView>) -> SnapshotOutcome {
        let snapshot_high = snapshot.iter().map(|m| m.timestamp).max();

        if let (Some(high), Some(seen)) = (snapshot_high, self.snapshot_high_water) {
            if high < seen {
                return SnapshotOutcome::Stale;
            }
        }
        if snapshot_high.is_some() {
            self.snapshot_high_water = snapshot_high;
        }

        let mut added = 0;
        for message in snapshot {
            if self.merge_one(message) {
                added += 1;
            }
        }
        self.sort();
        SnapshotOutcome::Applied { added }
    }

    /// Local bookkeeping after the reader marked the conversation read.
    pub fn mark_read_from(&mut self, sender: ParticipantId) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut() {
            if message.sender_id == sender && !message.is_read {
                message.is_read = true;
                changed += 1;
            }
        }
        changed
    }

    pub fn unread_from(&self, sender: ParticipantId) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender_id == sender && !m.is_read)
            .count()
    }

    fn merge_one(&mut self, message: MessageView) -> bool {
        if self.ids.contains(&message.id) {
            // Read flags only ever move forward.
            if message.is_read {
                if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
                    existing.is_read = true;
                }
            }
            return false;
        }
        self.ids.insert(message.id);
        self.messages.push(message);
        true
    }

    fn sort(&mut self) {
        self.messages.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}

/// Exponential reconnect delay, capped.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: u32,
    base: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempt: 0,
            base,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(RECONNECT_BASE_MS),
            Duration::from_millis(RECONNECT_MAX_MS),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Live,
    /// Live updates paused; the client polls until the channel is back.
    Polling,
}

/// Live-channel bookkeeping for one client.
///
/// The server keeps no membership across reconnects, so the client owns the
/// list of rooms it cares about and replays the joins itself.
#[derive(Debug, Clone)]
pub struct ChannelState {
    status: ConnectionStatus,
    rooms: HashSet<RoomId>,
    backoff: ReconnectBackoff,
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Polling,
            rooms: HashSet::new(),
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status == ConnectionStatus::Live
    }

    /// Remember the room and return the frame to send if the channel is up.
    pub fn join(&mut self, room: RoomId) -> Option<ClientEvent> {
        self.rooms.insert(room.clone());
        self.is_live().then(|| ClientEvent::JoinRoom(room))
    }

    pub fn leave(&mut self, room: &RoomId) -> Option<ClientEvent> {
        let was_member = self.rooms.remove(room);
        (was_member && self.is_live()).then(|| ClientEvent::LeaveRoom(room.clone()))
    }

    /// Channel (re)established: returns the joins to replay, in a stable order.
    pub fn on_connected(&mut self) -> Vec<ClientEvent> {
        self.status = ConnectionStatus::Live;
        self.backoff.reset();

        let mut rooms: Vec<&RoomId> = self.rooms.iter().collect();
        rooms.sort_by_key(|r| r.to_string());
        rooms
            .into_iter()
            .cloned()
            .map(ClientEvent::JoinRoom)
            .collect()
    }

    /// Channel dropped: switch to polling and return how long to wait before reconnecting.
    pub fn on_disconnected(&mut self) -> Duration {
        self.status = ConnectionStatus::Polling;
        self.backoff.next_delay()
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}
