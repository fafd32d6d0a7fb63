//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use matchday_shared::ParticipantId;

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A team account able to send and receive direct messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    /// Team name shown next to messages.
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single direct message between two participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    /// Trimmed, never empty.
    pub content: String,
    /// Assigned by the store; never earlier than the sender's previous message.
    pub created_at: DateTime<Utc>,
    /// Flips false -> true once, never back.
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Derived views
// ---------------------------------------------------------------------------

/// Unread messages from one peer, from the reader's point of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub peer_id: ParticipantId,
    pub count: u64,
}

/// One conversation in a participant's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub peer: Participant,
    pub last_message: Option<Message>,
    pub unread_count: u64,
}
