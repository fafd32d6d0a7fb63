//! The message store: append, history, read flags and unread counters.
//!
//! Unread counters are never stored; they are recomputed from the rows so
//! they cannot drift from the read flags.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use matchday_shared::ParticipantId;

use crate::codec::{format_ts, now, parse_participant, parse_ts, parse_uuid};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ConversationSummary, Message, UnreadCount};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, created_at, is_read, read_at";

impl Database {
    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Persist a new, unread message and return it.
    ///
    /// The row is written before this returns; callers may broadcast it
    /// straight away.
    pub fn append_message(
        &self,
        sender: ParticipantId,
        receiver: ParticipantId,
        content: &str,
    ) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::InvalidContent);
        }
        if sender == receiver {
            return Err(StoreError::SelfMessage);
        }

        // Per-sender timestamps never go backwards, even if the clock does.
        let previous: Option<String> = self.conn().query_row(
            "SELECT MAX(created_at) FROM messages WHERE sender_id = ?1",
            params![sender.to_string()],
            |row| row.get(0),
        )?;
        let mut created_at = now();
        if let Some(previous) = previous {
            let previous = parse_ts(0, &previous)?;
            if created_at < previous {
                created_at = previous;
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            created_at,
            is_read: false,
            read_at: None,
        };

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, created_at, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                message.id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.content,
                format_ts(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Full history between two participants, oldest first.
    pub fn list_between(&self, a: ParticipantId, b: ParticipantId) -> Result<Vec<Message>> {
        self.list_between_after(a, b, None)
    }

    /// History between two participants created at or after `since`, oldest first.
    ///
    /// With `since = None` this is the full history. Polling clients pass the
    /// newest timestamp they hold and drop the ids they already have; the
    /// cursor is inclusive because several messages can share a timestamp.
    pub fn list_between_after(
        &self,
        a: ParticipantId,
        b: ParticipantId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
               AND (?3 IS NULL OR created_at >= ?3)
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(
            params![a.to_string(), b.to_string(), since.as_ref().map(format_ts)],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn last_message_between(
        &self,
        a: ParticipantId,
        b: ParticipantId,
    ) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS}
                     FROM messages
                     WHERE (sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![a.to_string(), b.to_string()],
                row_to_message,
            )
            .optional()?)
    }

    // ------------------------------------------------------------------
    // Read state
    // ------------------------------------------------------------------

    /// Mark every unread message from `sender` to `receiver` as read.
    ///
    /// Idempotent: returns the number of rows flipped, zero on a repeat call.
    pub fn mark_read_from(&self, sender: ParticipantId, receiver: ParticipantId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET is_read = 1, read_at = ?3
             WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![sender.to_string(), receiver.to_string(), format_ts(&now())],
        )?;
        Ok(affected)
    }

    /// Unread messages `reader` has from `peer`.
    pub fn unread_count_from(&self, peer: ParticipantId, reader: ParticipantId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![peer.to_string(), reader.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Non-zero unread counters of `reader`, one per sending peer.
    pub fn unread_counts(&self, reader: ParticipantId) -> Result<Vec<UnreadCount>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_id, COUNT(*)
             FROM messages
             WHERE receiver_id = ?1 AND is_read = 0
             GROUP BY sender_id
             ORDER BY sender_id ASC",
        )?;

        let rows = stmt.query_map(params![reader.to_string()], |row| {
            let peer: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(UnreadCount {
                peer_id: parse_participant(0, &peer)?,
                count: count as u64,
            })
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------

    /// Every conversation `me` has at least one message in, most recent first.
    pub fn conversations_for(&self, me: ParticipantId) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1",
        )?;
        let peers = stmt
            .query_map(params![me.to_string()], |row| {
                let raw: String = row.get(0)?;
                parse_participant(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summaries = Vec::with_capacity(peers.len());
        for peer_id in peers {
            summaries.push(ConversationSummary {
                peer: self.get_participant(peer_id)?,
                last_message: self.last_message_between(me, peer_id)?,
                unread_count: self.unread_count_from(peer_id, me)?,
            });
        }

        summaries.sort_by(|a, b| {
            let a_ts = a.last_message.as_ref().map(|m| m.created_at);
            let b_ts = b.last_message.as_ref().map(|m| m.created_at);
            b_ts.cmp(&a_ts)
        });
        Ok(summaries)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let content: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let is_read: bool = row.get(5)?;
    let read_str: Option<String> = row.get(6)?;

    Ok(Message {
        id: parse_uuid(0, &id_str)?,
        sender_id: parse_participant(1, &sender_str)?,
        receiver_id: parse_participant(2, &receiver_str)?,
        content,
        created_at: parse_ts(4, &created_str)?,
        is_read,
        read_at: read_str.map(|s| parse_ts(6, &s)).transpose()?,
    })
}
