//! Participant directory: display names, existence checks and token lookup.

use rusqlite::{params, OptionalExtension};

use matchday_shared::ParticipantId;

use crate::codec::{format_ts, now, parse_participant, parse_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Participant;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a participant. `token_hash` is the hex digest of its bearer token.
    pub fn create_participant(&self, display_name: &str, token_hash: &str) -> Result<Participant> {
        let participant = Participant {
            id: ParticipantId::new(),
            display_name: display_name.trim().to_string(),
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO participants (id, display_name, token_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                participant.id.to_string(),
                participant.display_name,
                token_hash,
                format_ts(&participant.created_at),
            ],
        )?;

        tracing::debug!(participant = %participant.id, "participant registered");
        Ok(participant)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_participant(&self, id: ParticipantId) -> Result<Participant> {
        self.conn()
            .query_row(
                "SELECT id, display_name, created_at FROM participants WHERE id = ?1",
                params![id.to_string()],
                row_to_participant,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn participant_exists(&self, id: ParticipantId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM participants WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn find_participant_by_token_hash(&self, token_hash: &str) -> Result<Option<Participant>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id, display_name, created_at FROM participants WHERE token_hash = ?1",
                params![token_hash],
                row_to_participant,
            )
            .optional()?)
    }

    /// Everyone except `me`, ordered by display name.
    pub fn list_participants_except(&self, me: ParticipantId) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, created_at
             FROM participants
             WHERE id <> ?1
             ORDER BY display_name COLLATE NOCASE ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![me.to_string()], row_to_participant)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }
}

pub(crate) fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let created_str: String = row.get(2)?;

    Ok(Participant {
        id: parse_participant(0, &id_str)?,
        display_name,
        created_at: parse_ts(2, &created_str)?,
    })
}
